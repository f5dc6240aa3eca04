//! Per-attempt scratch directories
//!
//! Removed when dropped, so an attempt that times out, fails, or is
//! cancelled leaves nothing behind.

use std::io;
use std::path::{Path, PathBuf};

use tempfile::TempDir;
use tracing::{debug, warn};

#[derive(Debug)]
pub struct ScratchDir {
    dir: TempDir,
}

impl ScratchDir {
    pub fn new(prefix: &str) -> io::Result<Self> {
        let dir = tempfile::Builder::new().prefix(prefix).tempdir()?;
        debug!("Created scratch dir {}", dir.path().display());
        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Path of a file inside the scratch dir; nothing is created
    pub fn file(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    /// Remove now and report failures instead of ignoring them on drop
    pub fn close(self) {
        let path = self.dir.path().to_path_buf();
        if let Err(e) = self.dir.close() {
            warn!("Failed to remove scratch dir {}: {}", path.display(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_removed_on_drop() {
        let scratch = ScratchDir::new("sluice-test").unwrap();
        let path = scratch.path().to_path_buf();
        std::fs::write(scratch.file("audio.wav"), b"RIFF").unwrap();
        assert!(path.exists());

        drop(scratch);
        assert!(!path.exists());
    }

    #[test]
    fn test_removed_on_close() {
        let scratch = ScratchDir::new("sluice-test").unwrap();
        let path = scratch.path().to_path_buf();
        std::fs::create_dir(scratch.file("nested")).unwrap();

        scratch.close();
        assert!(!path.exists());
    }

    #[test]
    fn test_prefix_applied() {
        let scratch = ScratchDir::new("sluice-audio").unwrap();
        let name = scratch.path().file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("sluice-audio"));
    }
}
