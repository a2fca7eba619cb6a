//! Filesystem helpers: image discovery and directory housekeeping

use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

/// File extensions treated as images (lower-case, without the dot)
pub const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "bmp", "tif", "tiff", "webp"];

/// Whether `path` has one of the image extensions (case-insensitive)
pub fn is_image_path(path: &Path) -> bool {
    path.extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .is_some_and(|e| IMAGE_EXTENSIONS.contains(&e.as_str()))
}

/// List image files under `folder`, sorted by path.
///
/// Only the folder itself is scanned unless `recursive` is set.
pub fn iter_images(folder: &Path, recursive: bool) -> io::Result<Vec<PathBuf>> {
    let max_depth = if recursive { usize::MAX } else { 1 };
    let mut images = Vec::new();

    for entry in WalkDir::new(folder).min_depth(1).max_depth(max_depth) {
        let entry = entry.map_err(io::Error::from)?;
        if entry.file_type().is_file() && is_image_path(entry.path()) {
            images.push(entry.into_path());
        }
    }

    images.sort();
    Ok(images)
}

/// Create `dir` and its parents if missing
pub fn ensure_dir(dir: &Path) -> io::Result<()> {
    std::fs::create_dir_all(dir)
}

/// Remove everything inside `dir`, keeping `dir` itself.
///
/// Entries that cannot be removed are skipped. Returns the number removed.
pub fn safe_clean_dir(dir: &Path) -> usize {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(_) => return 0,
    };

    let mut removed = 0;
    for entry in entries.flatten() {
        let path = entry.path();
        let result = match entry.file_type() {
            Ok(ft) if ft.is_dir() => std::fs::remove_dir_all(&path),
            _ => std::fs::remove_file(&path),
        };
        match result {
            Ok(()) => removed += 1,
            Err(e) => warn!("Could not remove {:?}: {}", path, e),
        }
    }

    debug!("Cleaned {} entries from {:?}", removed, dir);
    removed
}

/// Resolve the crops directory: `dir` itself when it is named `cropped`,
/// otherwise `dir/cropped`
pub fn crops_dir_for(dir: &Path) -> PathBuf {
    let is_cropped = dir
        .file_name()
        .is_some_and(|n| n.to_string_lossy().eq_ignore_ascii_case("cropped"));
    if is_cropped {
        dir.to_path_buf()
    } else {
        dir.join("cropped")
    }
}

/// Empty the crops directory resolved from `dir`
pub fn clear_crops(dir: &Path) -> io::Result<usize> {
    let target = crops_dir_for(dir);
    if !target.exists() {
        return Ok(0);
    }
    if !target.is_dir() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("{:?} is not a directory", target),
        ));
    }
    Ok(safe_clean_dir(&target))
}
