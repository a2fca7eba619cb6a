//! Application Configuration
//!
//! Run settings stored in TOML format. Loaded once at startup and handed to
//! the pipeline by reference.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::rename::files::crops_dir_for;
use crate::vision::{Device, OcrBackend, YoloConfig};

/// Default ledger file name, written under the input root
pub const DEFAULT_LEDGER_NAME: &str = "rename_mapping.csv";

/// Application settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// What to process and where results go
    pub task: TaskSettings,
    /// Object detector settings
    pub detector: DetectorSettings,
    /// OCR backend settings
    pub ocr: OcrSettings,
}

/// Input, output and run-mode settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskSettings {
    /// Directory scanned for images
    pub input_dir: PathBuf,
    /// Base directory; each source sub-directory gets `<name>_output` below it
    pub output_root: PathBuf,
    /// Where crops are saved; `<output_root>/cropped` when unset
    pub crops_dir: Option<PathBuf>,
    pub save_crops: bool,
    /// Empty each output sub-directory once before first use
    pub clean_output: bool,
    /// Descend into sub-directories of the input
    pub recursive: bool,
    /// Append `-N` to every planned name so names never collide
    pub duplicates: bool,
    /// Plan and write the ledger without moving any file
    pub dry_run: bool,
    pub ledger_name: String,
    /// Give each run its own ledger file
    pub namespace_ledger: bool,
}

impl Default for TaskSettings {
    fn default() -> Self {
        Self {
            input_dir: PathBuf::new(),
            output_root: PathBuf::new(),
            crops_dir: None,
            save_crops: true,
            clean_output: true,
            recursive: false,
            duplicates: true,
            dry_run: false,
            ledger_name: DEFAULT_LEDGER_NAME.to_string(),
            namespace_ledger: false,
        }
    }
}

impl TaskSettings {
    /// Directory crops are written to, or `None` when crops are not saved
    pub fn effective_crops_dir(&self) -> Option<PathBuf> {
        if !self.save_crops {
            return None;
        }
        Some(
            self.crops_dir
                .clone()
                .unwrap_or_else(|| crops_dir_for(&self.output_root)),
        )
    }
}

/// Object detector settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorSettings {
    /// ONNX weights file
    pub weights: PathBuf,
    /// `cpu`, `cuda` or `cuda:N`
    pub device: String,
    /// Class whose boxes are cropped and read
    pub target_class: String,
    /// Class names by model id
    pub class_names: Vec<String>,
    pub input_size: u32,
    pub confidence: f32,
    pub iou: f32,
    /// Use the tight bounds of segmentation masks when present.
    ///
    /// `YoloDetector` decodes boxes only and never attaches masks, so this
    /// takes effect only with a detector that fills `Detection::mask`.
    pub use_mask_tight_bbox: bool,
}

impl Default for DetectorSettings {
    fn default() -> Self {
        Self {
            weights: PathBuf::from("best.onnx"),
            device: "cpu".to_string(),
            target_class: "WhiteTag".to_string(),
            class_names: vec!["WhiteTag".to_string()],
            input_size: 640,
            confidence: 0.25,
            iou: 0.45,
            use_mask_tight_bbox: false,
        }
    }
}

impl DetectorSettings {
    pub fn yolo_config(&self) -> YoloConfig {
        YoloConfig {
            weights: self.weights.clone(),
            device: Device::parse(&self.device),
            input_size: self.input_size,
            confidence: self.confidence,
            iou: self.iou,
            class_names: self.class_names.clone(),
        }
    }
}

/// OCR backend settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OcrSettings {
    pub backend: OcrBackend,
    pub model: String,
    /// Falls back to `ARK_API_KEY` when unset
    pub api_key: Option<String>,
    pub base_url: String,
    pub prompt: String,
    pub timeout_secs: u64,
}

impl Default for OcrSettings {
    fn default() -> Self {
        Self {
            backend: OcrBackend::Ark,
            model: "doubao-1-5-thinking-vision-pro-250428".to_string(),
            api_key: None,
            base_url: "https://ark.cn-beijing.volces.com/api/v3".to_string(),
            prompt: "Read the text printed on this tag. Answer with the text only.".to_string(),
            timeout_secs: 30,
        }
    }
}

/// Load configuration from file
pub fn load_config(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config {:?}", path))?;
    let config: AppConfig =
        toml::from_str(&content).with_context(|| format!("Invalid config {:?}", path))?;
    Ok(config)
}

/// Load configuration, falling back to defaults when the file is missing or invalid
pub fn load_or_default(path: &Path) -> AppConfig {
    if !path.exists() {
        info!("No config at {:?}, using defaults", path);
        return AppConfig::default();
    }
    match load_config(path) {
        Ok(config) => {
            info!("Loaded config from {:?}", path);
            config
        }
        Err(e) => {
            warn!("{:#}; using defaults", e);
            AppConfig::default()
        }
    }
}

/// Save configuration to file
pub fn save_config(config: &AppConfig, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content)?;
    Ok(())
}
