//! Per-request temporary directories.

use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use uuid::Uuid;

/// A uniquely named directory owned by one request.
///
/// The directory is removed exactly once: by [`TempWorkspace::cleanup`] once
/// its files have been relayed, or on drop when the request bails out early.
#[derive(Debug)]
pub struct TempWorkspace {
    path: PathBuf,
    armed: bool,
}

impl TempWorkspace {
    /// Create `<system temp>/<prefix>_<uuid>`
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created.
    pub async fn create(prefix: &str) -> io::Result<Self> {
        Self::create_in(&std::env::temp_dir(), prefix).await
    }

    /// Create `<base>/<prefix>_<uuid>`
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created.
    pub async fn create_in(base: &Path, prefix: &str) -> io::Result<Self> {
        let path = base.join(format!("{prefix}_{}", Uuid::new_v4().simple()));
        tokio::fs::create_dir_all(&path).await?;
        debug!(path = %path.display(), "Created workspace");
        Ok(Self { path, armed: true })
    }

    /// Directory path
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Remove the directory and everything in it.
    ///
    /// # Errors
    ///
    /// Returns an error if removal fails; the directory is not retried on drop.
    pub async fn cleanup(mut self) -> io::Result<()> {
        self.armed = false;
        match tokio::fs::remove_dir_all(&self.path).await {
            Ok(()) => {
                debug!(path = %self.path.display(), "Removed workspace");
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }
}

impl Drop for TempWorkspace {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        match std::fs::remove_dir_all(&self.path) {
            Ok(()) => debug!(path = %self.path.display(), "Removed abandoned workspace"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %self.path.display(), error = %e, "Failed to remove workspace"),
        }
    }
}
