//! Destination name planning and per-directory deduplication

use std::collections::HashSet;
use std::io;
use std::path::Path;

use super::sanitize::sanitize_and_upper;

/// Upper-cased stems already taken inside one destination directory.
///
/// A stem is reserved at planning time, before anything moves on disk, so two
/// images in the same batch never plan onto the same name.
#[derive(Debug, Clone, Default)]
pub struct DuplicateIndex {
    stems: HashSet<String>,
}

impl DuplicateIndex {
    /// Create an empty index
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an index from the files currently in `dir` (non-recursive).
    ///
    /// A missing directory yields an empty index.
    pub fn collect_existing(dir: &Path) -> io::Result<Self> {
        let mut index = Self::new();
        if !dir.exists() {
            return Ok(index);
        }

        for entry in std::fs::read_dir(dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            if let Some(stem) = entry.path().file_stem() {
                index.insert(&stem.to_string_lossy());
            }
        }

        Ok(index)
    }

    /// Whether `stem` (case-insensitive) is taken
    pub fn contains(&self, stem: &str) -> bool {
        self.stems.contains(&stem.to_uppercase())
    }

    /// Reserve `stem`; returns false if it was already taken
    pub fn insert(&mut self, stem: &str) -> bool {
        self.stems.insert(stem.to_uppercase())
    }

    pub fn len(&self) -> usize {
        self.stems.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stems.is_empty()
    }
}

impl<S: AsRef<str>> FromIterator<S> for DuplicateIndex {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        let mut index = Self::new();
        for stem in iter {
            index.insert(stem.as_ref());
        }
        index
    }
}

/// Decide the final file name for `base` + `extension`.
///
/// With `duplicates_enabled` the first free `BASE-<n>` (n = 1, 2, ...) is
/// reserved in `index` and returned; without it the name is `BASE<ext>` and
/// collisions are left to the commit phase. The extension is lower-cased.
/// An empty sanitized base is not special-cased here.
pub fn plan_name(
    base: &str,
    extension: &str,
    index: &mut DuplicateIndex,
    duplicates_enabled: bool,
) -> String {
    let base = sanitize_and_upper(base);
    let extension = extension.to_lowercase();

    if !duplicates_enabled {
        return format!("{}{}", base, extension);
    }

    let mut n: u32 = 1;
    loop {
        let stem = format!("{}-{}", base, n);
        if index.insert(&stem) {
            return format!("{}{}", stem, extension);
        }
        n += 1;
    }
}
