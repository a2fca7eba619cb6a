//! YOLO object detection via ONNX Runtime
//!
//! Runs an Ultralytics-style detection export: square NCHW input in [0, 1],
//! one output of `[1, 4 + classes, anchors]` (or transposed) holding center
//! boxes and per-class scores. Results are filtered by confidence, suppressed
//! class-wise and scaled back to source pixels.

use anyhow::{Context, Result};
use image::{imageops::FilterType, DynamicImage};
use ndarray::Array4;
use ort::value::Value;
use parking_lot::Mutex;
use std::path::PathBuf;
use std::time::Instant;
use tracing::{debug, info};

use super::models::{Device, OnnxSession};
use super::{BoundingBox, Detection, Detector};
use crate::error::DetectorError;

/// Configuration for the YOLO detector
#[derive(Debug, Clone)]
pub struct YoloConfig {
    /// Path to the `.onnx` export
    pub weights: PathBuf,
    pub device: Device,
    /// Square input edge the model was exported with
    pub input_size: u32,
    /// Minimum class score to keep a candidate
    pub confidence: f32,
    /// IoU above which a lower-scored box of the same class is suppressed
    pub iou: f32,
    /// Class names by id; unknown ids are named by their number
    pub class_names: Vec<String>,
}

impl Default for YoloConfig {
    fn default() -> Self {
        Self {
            weights: PathBuf::from("best.onnx"),
            device: Device::Cpu,
            input_size: 640,
            confidence: 0.25,
            iou: 0.45,
            class_names: Vec::new(),
        }
    }
}

/// YOLO detector backed by an ONNX session
pub struct YoloDetector {
    session: Mutex<OnnxSession>,
    config: YoloConfig,
}

impl YoloDetector {
    /// Load the model described by `config`
    pub fn new(config: YoloConfig) -> Result<Self> {
        if !config.weights.exists() {
            return Err(DetectorError::Load {
                path: config.weights.clone(),
                message: "file not found".to_string(),
            }
            .into());
        }

        let session = OnnxSession::load(&config.weights, config.device).map_err(|e| DetectorError::Load {
            path: config.weights.clone(),
            message: e.to_string(),
        })?;

        info!(
            "YOLO detector ready ({}px, {} classes, device {})",
            config.input_size,
            config.class_names.len(),
            session.device()
        );

        Ok(Self {
            session: Mutex::new(session),
            config,
        })
    }

    pub fn config(&self) -> &YoloConfig {
        &self.config
    }

    /// Resize to the model input and lay out as NCHW f32
    fn preprocess(&self, image: &DynamicImage) -> Array4<f32> {
        let size = self.config.input_size;
        let resized = image.resize_exact(size, size, FilterType::Triangle).to_rgb8();

        let mut tensor = Array4::<f32>::zeros((1, 3, size as usize, size as usize));
        for (x, y, pixel) in resized.enumerate_pixels() {
            let (x, y) = (x as usize, y as usize);
            tensor[[0, 0, y, x]] = pixel[0] as f32 / 255.0;
            tensor[[0, 1, y, x]] = pixel[1] as f32 / 255.0;
            tensor[[0, 2, y, x]] = pixel[2] as f32 / 255.0;
        }
        tensor
    }

    fn run(&self, tensor: Array4<f32>) -> Result<(Vec<usize>, Vec<f32>)> {
        let shape: Vec<usize> = tensor.shape().to_vec();
        let (data, _offset) = tensor.into_raw_vec_and_offset();
        let input = Value::from_array(([shape[0], shape[1], shape[2], shape[3]], data))?;

        let mut guard = self.session.lock();
        let input_name = guard
            .input_names()
            .first()
            .cloned()
            .context("Detector model has no inputs")?;
        let output_name = guard
            .output_names()
            .first()
            .cloned()
            .context("Detector model has no outputs")?;

        let outputs = guard
            .session_mut()
            .run(ort::inputs![input_name.as_str() => input])
            .map_err(|e| DetectorError::Inference(e.to_string()))?;
        let output = outputs
            .get(output_name.as_str())
            .context("Detector output missing")?;
        let (out_shape, values) = output.try_extract_tensor::<f32>()?;

        let dims: Vec<usize> = out_shape.iter().map(|&d| d as usize).collect();
        Ok((dims, values.to_vec()))
    }
}

impl Detector for YoloDetector {
    fn detect(&self, image: &DynamicImage) -> Result<Vec<Detection>> {
        let start = Instant::now();

        let tensor = self.preprocess(image);
        let (dims, values) = self.run(tensor)?;

        let size = self.config.input_size as f32;
        let scale = (image.width() as f32 / size, image.height() as f32 / size);
        let candidates = decode_predictions(&values, &dims, &self.config, scale)?;
        let kept = non_maximum_suppression(candidates, self.config.iou);

        debug!("Detection complete in {:?}: {} objects", start.elapsed(), kept.len());
        Ok(kept)
    }
}

/// Decode raw YOLO output into detections at source scale.
///
/// `scale` maps model-input pixels to source pixels on each axis.
pub fn decode_predictions(
    values: &[f32],
    dims: &[usize],
    config: &YoloConfig,
    scale: (f32, f32),
) -> Result<Vec<Detection>, DetectorError> {
    if dims.len() != 3 || dims[0] != 1 {
        return Err(DetectorError::OutputShape(dims.to_vec()));
    }

    // Channel-first exports are [1, C, N] with C much smaller than N
    let channels_first = dims[1] < dims[2];
    let (channels, anchors) = if channels_first { (dims[1], dims[2]) } else { (dims[2], dims[1]) };
    if channels < 5 || values.len() < channels * anchors {
        return Err(DetectorError::OutputShape(dims.to_vec()));
    }

    let at = |anchor: usize, channel: usize| -> f32 {
        if channels_first {
            values[channel * anchors + anchor]
        } else {
            values[anchor * channels + channel]
        }
    };

    // Segmentation exports append mask coefficients after the class scores;
    // they are skipped and no mask is attached
    let class_count = if config.class_names.is_empty() {
        channels - 4
    } else {
        config.class_names.len().min(channels - 4)
    };

    let mut detections = Vec::new();
    for anchor in 0..anchors {
        let (best_class, best_score) = (0..class_count)
            .map(|c| (c, at(anchor, 4 + c)))
            .fold((0, f32::MIN), |best, cur| if cur.1 > best.1 { cur } else { best });

        if best_score < config.confidence {
            continue;
        }

        let (cx, cy, w, h) = (at(anchor, 0), at(anchor, 1), at(anchor, 2), at(anchor, 3));
        let bbox = BoundingBox::new(
            (cx - w / 2.0) * scale.0,
            (cy - h / 2.0) * scale.1,
            (cx + w / 2.0) * scale.0,
            (cy + h / 2.0) * scale.1,
        );

        let class_name = config
            .class_names
            .get(best_class)
            .cloned()
            .unwrap_or_else(|| best_class.to_string());

        detections.push(Detection {
            class_id: best_class as i64,
            class_name,
            confidence: Some(best_score),
            bbox,
            mask: None,
        });
    }

    Ok(detections)
}

/// Class-wise non-maximum suppression, highest confidence first
pub fn non_maximum_suppression(mut detections: Vec<Detection>, iou_threshold: f32) -> Vec<Detection> {
    detections.sort_by(|a, b| {
        b.confidence
            .unwrap_or(0.0)
            .total_cmp(&a.confidence.unwrap_or(0.0))
    });

    let mut kept: Vec<Detection> = Vec::new();
    for candidate in detections {
        let suppressed = kept.iter().any(|k| {
            k.class_id == candidate.class_id && k.bbox.iou(&candidate.bbox) > iou_threshold
        });
        if !suppressed {
            kept.push(candidate);
        }
    }
    kept
}
