//! Snapshots read from a file under the game's `script-output` directory.
//!
//! The file is re-read on every acquisition, there is no caching. A missing
//! file is expected while the server starts and the in-game script has not
//! written its first snapshot yet.

use std::{io, path::PathBuf};

use serde::{Deserialize, Serialize};
use tracing::trace;

use super::Error;

fn default_path() -> PathBuf {
    PathBuf::from("/factorio/script-output/metrics.json")
}

/// Configuration of [`File`].
#[derive(Debug, Deserialize, Serialize, PartialEq, Clone)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Path of the snapshot file.
    #[serde(default = "default_path")]
    pub path: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            path: default_path(),
        }
    }
}

/// A file-backed snapshot source.
#[derive(Debug, Clone)]
pub struct File {
    path: PathBuf,
}

impl File {
    /// Create a new [`File`] source.
    #[must_use]
    pub fn new(config: &Config) -> Self {
        Self {
            path: config.path.clone(),
        }
    }

    /// Read the full contents of the snapshot file.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] or [`Error::PermissionDenied`] for those
    /// conditions and [`Error::Io`] for any other read failure.
    pub async fn acquire(&self) -> Result<Vec<u8>, Error> {
        trace!("reading snapshot from {}", self.path.display());
        tokio::fs::read(&self.path).await.map_err(|source| {
            let path = self.path.clone();
            match source.kind() {
                io::ErrorKind::NotFound => Error::NotFound { path },
                io::ErrorKind::PermissionDenied => Error::PermissionDenied { path },
                _ => Error::Io { path, source },
            }
        })
    }
}
