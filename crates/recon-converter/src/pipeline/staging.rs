//! Local staging area
//!
//! Each channel stages under its own subtree:
//! `<root>/before/<channel>/` for fetched workbooks and
//! `<root>/after/<channel>/` for converted output. [`StagingFile`] deletes
//! its file when dropped, so artifacts never outlive the job that made them.

use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Staging phase directory
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Before,
    After,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Before => "before",
            Phase::After => "after",
        }
    }
}

/// Channel-partitioned staging tree
#[derive(Debug, Clone)]
pub struct StagingArea {
    root: PathBuf,
    channel: String,
}

impl StagingArea {
    pub fn new(root: impl Into<PathBuf>, channel: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            channel: channel.into(),
        }
    }

    pub fn dir(&self, phase: Phase) -> PathBuf {
        self.root.join(phase.as_str()).join(&self.channel)
    }

    /// Create the phase directory if needed and return it
    pub fn prepare(&self, phase: Phase) -> io::Result<PathBuf> {
        let dir = self.dir(phase);
        std::fs::create_dir_all(&dir)?;
        Ok(dir)
    }
}

/// A staged file, removed on drop
#[derive(Debug)]
pub struct StagingFile {
    path: PathBuf,
}

impl StagingFile {
    /// Create (or truncate) `path`; the guard owns it from here on
    pub fn create(path: impl Into<PathBuf>) -> io::Result<(Self, File)> {
        let path = path.into();
        let file = File::create(&path)?;
        Ok((Self { path }, file))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for StagingFile {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!(path = %self.path.display(), "Removed staging file"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {},
            Err(e) => warn!(path = %self.path.display(), error = %e, "Failed to remove staging file"),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_dirs_are_channel_partitioned() {
        let area = StagingArea::new("/tmp/recon", "OVO");
        assert_eq!(area.dir(Phase::Before), PathBuf::from("/tmp/recon/before/OVO"));
        assert_eq!(area.dir(Phase::After), PathBuf::from("/tmp/recon/after/OVO"));
    }

    #[test]
    fn test_staging_file_removed_on_drop() {
        let root = tempfile::tempdir().unwrap();
        let area = StagingArea::new(root.path(), "OVO");
        let dir = area.prepare(Phase::Before).unwrap();
        assert!(dir.is_dir());

        let path = dir.join("a.xlsx");
        {
            let (guard, mut file) = StagingFile::create(&path).unwrap();
            file.write_all(b"data").unwrap();
            assert_eq!(guard.path(), path.as_path());
            assert!(path.exists());
        }
        assert!(!path.exists());
    }

    #[test]
    fn test_drop_tolerates_already_removed_file() {
        let root = tempfile::tempdir().unwrap();
        let path = root.path().join("gone.csv");
        let (guard, file) = StagingFile::create(&path).unwrap();
        drop(file);
        std::fs::remove_file(&path).unwrap();
        drop(guard);
    }

    #[test]
    fn test_prepare_fails_when_root_is_a_file() {
        let root = tempfile::tempdir().unwrap();
        let blocker = root.path().join("blocker");
        std::fs::write(&blocker, b"x").unwrap();
        let area = StagingArea::new(&blocker, "OVO");
        assert!(area.prepare(Phase::After).is_err());
    }
}
