//! tag-rename - batch image renaming from detected tag regions
//!
//! Finds a tag in each image with an object detector, reads it with OCR, and
//! renames the image after the text. Names are planned conflict-free per
//! destination directory, every decision is written to a CSV ledger, and the
//! renames are committed in two phases so no file is ever overwritten.

pub mod config;
pub mod error;
pub mod naming;
pub mod pipeline;
pub mod rename;
pub mod storage;
pub mod vision;
