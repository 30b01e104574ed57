//! Target file creation
//!
//! Targets are plain files named `_test_00.bin`, `_test_01.bin`, ... in the
//! configured directory, created (or truncated) at startup. Every write in
//! the run lands at offset zero, so the files stay one block long; they exist
//! to give the kernel real file-backed work, not to accumulate data.

use crate::Result;
use anyhow::Context;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

/// Filename for the target at a given index
pub fn target_name(index: usize) -> String {
    format!("_test_{:02}.bin", index)
}

/// Create (or truncate) `count` target files under `dir`.
///
/// The returned handles must stay open for the lifetime of the ring: their
/// descriptors are registered into the fixed-file table.
pub fn open_targets(dir: &Path, count: usize) -> Result<Vec<File>> {
    anyhow::ensure!(count > 0, "at least one target file is required");

    let mut files = Vec::with_capacity(count);
    for i in 0..count {
        let path: PathBuf = dir.join(target_name(i));
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)
            .with_context(|| format!("Failed to create target file {}", path.display()))?;
        files.push(file);
    }
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn names_are_zero_padded() {
        assert_eq!(target_name(0), "_test_00.bin");
        assert_eq!(target_name(7), "_test_07.bin");
        assert_eq!(target_name(12), "_test_12.bin");
    }

    #[test]
    fn open_creates_the_requested_files() {
        let dir = TempDir::new().unwrap();
        let files = open_targets(dir.path(), 3).unwrap();
        assert_eq!(files.len(), 3);
        for i in 0..3 {
            let path = dir.path().join(target_name(i));
            assert!(path.exists());
            assert_eq!(std::fs::metadata(&path).unwrap().len(), 0);
        }
    }

    #[test]
    fn open_truncates_existing_files() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(target_name(0));
        std::fs::write(&path, b"leftover from a previous run").unwrap();

        let _files = open_targets(dir.path(), 1).unwrap();
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 0);
    }

    #[test]
    fn open_fails_in_missing_directory() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("nope");
        assert!(open_targets(&missing, 1).is_err());
    }

    #[test]
    fn zero_count_is_rejected() {
        let dir = TempDir::new().unwrap();
        assert!(open_targets(dir.path(), 0).is_err());
    }
}
