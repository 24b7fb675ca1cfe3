//! Per-package build locks.

use anyhow::{Context, Result};
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Exclusive advisory lock on one package name, released on drop.
#[derive(Debug)]
pub struct PackageLock {
    file: File,
    path: PathBuf,
}

impl PackageLock {
    /// Block until the lock for `name` under `workspace_dir` is held.
    pub fn acquire(workspace_dir: &Path, name: &str) -> Result<Self> {
        let dir = workspace_dir.join(".locks");
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create lock directory {}", dir.display()))?;
        let path = dir.join(format!("{name}.lock"));

        // Lock files stay on disk. Unlinking one that another process has
        // open would let a third process lock a fresh inode at the same path.
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&path)
            .with_context(|| format!("Failed to create lock file: {}", path.display()))?;
        file.lock_exclusive()
            .with_context(|| format!("Failed to lock {}", path.display()))?;
        debug!("locked {}", path.display());

        Ok(Self { file, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for PackageLock {
    fn drop(&mut self) {
        let _ = self.file.unlock();
    }
}
