//! ONNX Runtime session management
//!
//! Loads detector weights and picks an execution device.

use anyhow::{Context, Result};
use ort::session::{builder::GraphOptimizationLevel, Session};
use std::fmt;
use std::path::Path;
use tracing::{info, warn};

/// Execution device for inference
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Device {
    #[default]
    Cpu,
    /// Accelerator by index (`cuda:N`)
    Gpu(u32),
}

impl Device {
    /// Parse `cpu`, `cuda` or `cuda:N`; anything else falls back to CPU
    pub fn parse(spec: &str) -> Self {
        let spec = spec.trim().to_lowercase();
        let Some(rest) = spec.strip_prefix("cuda") else {
            if !spec.is_empty() && spec != "cpu" {
                warn!("Unknown device '{}', using CPU", spec);
            }
            return Device::Cpu;
        };

        if rest.is_empty() {
            return Device::Gpu(0);
        }
        match rest.strip_prefix(':').and_then(|n| n.parse().ok()) {
            Some(index) => Device::Gpu(index),
            None => {
                warn!("Invalid device index in '{}', using cuda:0", spec);
                Device::Gpu(0)
            }
        }
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Device::Cpu => write!(f, "cpu"),
            Device::Gpu(index) => write!(f, "cuda:{}", index),
        }
    }
}

/// ONNX Runtime session wrapper
pub struct OnnxSession {
    session: Session,
    input_names: Vec<String>,
    output_names: Vec<String>,
    device: Device,
}

impl OnnxSession {
    /// Load a model for `device`, falling back to CPU when the accelerator is unavailable
    pub fn load(model_path: &Path, device: Device) -> Result<Self> {
        match device {
            Device::Cpu => Self::new(model_path),
            Device::Gpu(index) => Self::new_with_gpu(model_path, index).or_else(|e| {
                warn!("GPU session unavailable ({}), falling back to CPU", e);
                Self::new(model_path)
            }),
        }
    }

    /// Create a CPU session from a model file
    pub fn new(model_path: &Path) -> Result<Self> {
        info!("Loading ONNX model from {:?}", model_path);

        let session = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(4)?
            .commit_from_file(model_path)
            .context("Failed to load ONNX model")?;

        Ok(Self::from_session(session, Device::Cpu))
    }

    /// Create a session on CUDA device `index`
    pub fn new_with_gpu(model_path: &Path, index: u32) -> Result<Self> {
        use ort::execution_providers::{CUDAExecutionProvider, ExecutionProvider};

        info!("Loading ONNX model on cuda:{} from {:?}", index, model_path);

        let provider = CUDAExecutionProvider::default().with_device_id(index as i32);
        if !provider.is_available()? {
            anyhow::bail!("CUDA execution provider is not available");
        }

        let session = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_execution_providers([provider.build().error_on_failure()])?
            .commit_from_file(model_path)
            .context("Failed to load ONNX model")?;

        Ok(Self::from_session(session, Device::Gpu(index)))
    }

    fn from_session(session: Session, device: Device) -> Self {
        let input_names: Vec<String> = session.inputs.iter().map(|i| i.name.clone()).collect();
        let output_names: Vec<String> = session.outputs.iter().map(|o| o.name.clone()).collect();

        info!(
            "Model loaded on {}. Inputs: {:?}, Outputs: {:?}",
            device, input_names, output_names
        );

        Self {
            session,
            input_names,
            output_names,
            device,
        }
    }

    /// Get the underlying session mutably for running inference
    pub fn session_mut(&mut self) -> &mut Session {
        &mut self.session
    }

    pub fn input_names(&self) -> &[String] {
        &self.input_names
    }

    pub fn output_names(&self) -> &[String] {
        &self.output_names
    }

    /// Device the session actually runs on
    pub fn device(&self) -> Device {
        self.device
    }
}
