//! Error taxonomy for the rename pipeline
//!
//! Per-image failures are recorded as statuses and never abort a run; these
//! types carry the detail into logs and ledger text.

use std::path::PathBuf;
use thiserror::Error;

/// An image that could not be opened or decoded
#[derive(Debug, Error)]
pub enum ImageError {
    #[error("failed to open {path:?}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to decode {path:?}: {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
}

/// Failures of the detector collaborator
#[derive(Debug, Error)]
pub enum DetectorError {
    #[error("failed to load detector model {path:?}: {message}")]
    Load { path: PathBuf, message: String },
    #[error("detector inference failed: {0}")]
    Inference(String),
    #[error("unexpected detector output shape {0:?}")]
    OutputShape(Vec<usize>),
}

/// Failures of the OCR collaborator
#[derive(Debug, Error)]
pub enum OcrError {
    #[error("failed to encode crop: {0}")]
    Encode(#[from] image::ImageError),
    #[error("OCR request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("OCR endpoint returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("malformed OCR response: {0}")]
    Response(String),
}

/// Failures of a single rename entry
#[derive(Debug, Error)]
pub enum RenameError {
    /// Destination already occupied when the commit phase reached it
    #[error("destination already exists: {0:?}")]
    Collision(PathBuf),
    #[error("rename {from:?} -> {to:?} failed: {source}")]
    Io {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
