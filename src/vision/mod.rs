//! Vision Layer
//!
//! Detection and OCR collaborators plus the geometry that sits between them:
//! filtering detections to the target class, merging their boxes and cropping
//! the tag region out of the source image.
//!
//! Supported backends:
//! - YOLO detector exported to ONNX, run through ONNX Runtime
//! - Vision-language OCR over an OpenAI-style chat completions endpoint

pub mod detection;
pub mod models;
pub mod ocr;

pub use detection::{YoloConfig, YoloDetector};
pub use models::{Device, OnnxSession};
pub use ocr::{build_recognizer, ArkOcrClient, OcrBackend, OfflineRecognizer, TextRecognizer};

use anyhow::Result;
use image::{DynamicImage, GrayImage, ImageDecoder, ImageReader};
use std::path::Path;

use crate::error::ImageError;

/// Axis-aligned box in source pixel coordinates (x1, y1) - (x2, y2)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl BoundingBox {
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    pub fn width(&self) -> f32 {
        (self.x2 - self.x1).max(0.0)
    }

    pub fn height(&self) -> f32 {
        (self.y2 - self.y1).max(0.0)
    }

    pub fn area(&self) -> f32 {
        self.width() * self.height()
    }

    /// Intersection over union with `other`
    pub fn iou(&self, other: &BoundingBox) -> f32 {
        let ix1 = self.x1.max(other.x1);
        let iy1 = self.y1.max(other.y1);
        let ix2 = self.x2.min(other.x2);
        let iy2 = self.y2.min(other.y2);
        let inter = (ix2 - ix1).max(0.0) * (iy2 - iy1).max(0.0);
        let union = self.area() + other.area() - inter;
        if union <= 0.0 {
            0.0
        } else {
            inter / union
        }
    }
}

/// One object reported by a detector
#[derive(Debug, Clone)]
pub struct Detection {
    pub class_id: i64,
    pub class_name: String,
    pub confidence: Option<f32>,
    pub bbox: BoundingBox,
    /// Segmentation mask at source resolution (nonzero = object)
    pub mask: Option<GrayImage>,
}

/// Object detector collaborator
pub trait Detector: Send + Sync {
    fn detect(&self, image: &DynamicImage) -> Result<Vec<Detection>>;
}

/// Whether `class_name` is the target class (trimmed, case-insensitive)
pub fn matches_target(class_name: &str, target: &str) -> bool {
    class_name.trim().to_lowercase() == target.trim().to_lowercase()
}

/// Boxes of the detections belonging to `target`.
///
/// With `use_mask_tight_bbox`, a detection carrying a usable mask contributes
/// the tight bounds of its mask instead of its box.
pub fn target_boxes(detections: &[Detection], target: &str, use_mask_tight_bbox: bool) -> Vec<BoundingBox> {
    detections
        .iter()
        .filter(|d| matches_target(&d.class_name, target))
        .map(|d| {
            if use_mask_tight_bbox {
                if let Some(tight) = d.mask.as_ref().and_then(bbox_from_mask) {
                    return tight;
                }
            }
            d.bbox
        })
        .collect()
}

/// Smallest box enclosing all `boxes`; `None` when empty
pub fn merge_boxes(boxes: &[BoundingBox]) -> Option<BoundingBox> {
    let first = boxes.first()?;
    Some(boxes.iter().skip(1).fold(*first, |acc, b| BoundingBox {
        x1: acc.x1.min(b.x1),
        y1: acc.y1.min(b.y1),
        x2: acc.x2.max(b.x2),
        y2: acc.y2.max(b.y2),
    }))
}

/// Tight bounds of the nonzero pixels of `mask`
pub fn bbox_from_mask(mask: &GrayImage) -> Option<BoundingBox> {
    let mut bounds: Option<(u32, u32, u32, u32)> = None;

    for (x, y, pixel) in mask.enumerate_pixels() {
        if pixel.0[0] == 0 {
            continue;
        }
        bounds = Some(match bounds {
            None => (x, y, x, y),
            Some((x1, y1, x2, y2)) => (x1.min(x), y1.min(y), x2.max(x), y2.max(y)),
        });
    }

    bounds.map(|(x1, y1, x2, y2)| BoundingBox::new(x1 as f32, y1 as f32, x2 as f32, y2 as f32))
}

/// Crop `image` to `bbox`, rounding to whole pixels.
///
/// The crop is at least 1x1 and never extends past the image edges.
pub fn crop_to_box(image: &DynamicImage, bbox: &BoundingBox) -> DynamicImage {
    let (width, height) = (image.width(), image.height());

    let x1 = (bbox.x1.round().max(0.0) as u32).min(width.saturating_sub(1));
    let y1 = (bbox.y1.round().max(0.0) as u32).min(height.saturating_sub(1));
    let x2 = (bbox.x2.round().max(0.0) as u32).max(x1 + 1).min(width.max(x1 + 1));
    let y2 = (bbox.y2.round().max(0.0) as u32).max(y1 + 1).min(height.max(y1 + 1));

    image.crop_imm(x1, y1, x2 - x1, y2 - y1)
}

/// Decode an image file, applying its EXIF orientation
pub fn load_image(path: &Path) -> Result<DynamicImage, ImageError> {
    let open_err = |source| ImageError::Open {
        path: path.to_path_buf(),
        source,
    };
    let decode_err = |source| ImageError::Decode {
        path: path.to_path_buf(),
        source,
    };

    let reader = ImageReader::open(path)
        .map_err(open_err)?
        .with_guessed_format()
        .map_err(open_err)?;
    let mut decoder = reader.into_decoder().map_err(decode_err)?;
    let orientation = decoder.orientation().map_err(decode_err)?;
    let mut image = DynamicImage::from_decoder(decoder).map_err(decode_err)?;
    image.apply_orientation(orientation);

    Ok(image)
}
