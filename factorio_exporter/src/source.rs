//! Snapshot sources.
//!
//! A [`Source`] obtains the raw bytes of one snapshot, either by reading a
//! file the game writes under `script-output` or by asking the server over
//! RCON. Both variants yield the same document format.

use std::{io, path::PathBuf, time::Duration};

use serde::{Deserialize, Serialize};

use crate::snapshot::Snapshot;

pub mod file;
pub mod remote;

/// Errors produced while acquiring a snapshot.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The snapshot file does not exist.
    #[error("snapshot file {path:?} not found")]
    NotFound {
        /// Path that was read.
        path: PathBuf,
    },
    /// The snapshot file exists but may not be read.
    #[error("permission denied reading snapshot file {path:?}")]
    PermissionDenied {
        /// Path that was read.
        path: PathBuf,
    },
    /// Any other failure reading the snapshot file.
    #[error("failed to read snapshot file {path:?}: {source}")]
    Io {
        /// Path that was read.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: io::Error,
    },
    /// The RCON transport failed.
    #[error("RCON transport failed: {0}")]
    Transport(#[source] factorio_rcon::Error),
    /// The server did not reply in time.
    #[error("no reply from server within {0:?}")]
    Timeout(Duration),
    /// The payload is not a snapshot document.
    #[error("malformed snapshot payload: {0}")]
    MalformedPayload(#[from] serde_json::Error),
}

impl Error {
    /// A short, stable name for this failure, suitable as a label value.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Error::NotFound { .. } => "not_found",
            Error::PermissionDenied { .. } => "permission_denied",
            Error::Io { .. } => "io",
            Error::Transport(_) => "transport",
            Error::Timeout(_) => "timeout",
            Error::MalformedPayload(_) => "malformed_payload",
        }
    }
}

/// Configuration of the snapshot source.
#[derive(Debug, Deserialize, Serialize, PartialEq, Clone)]
#[serde(rename_all = "snake_case")]
#[serde(deny_unknown_fields)]
pub enum Config {
    /// Read snapshots from a file.
    File(file::Config),
    /// Request snapshots over RCON.
    Rcon(remote::Config),
}

impl Default for Config {
    fn default() -> Self {
        Self::File(file::Config::default())
    }
}

/// Where snapshots come from.
#[derive(Debug, Clone)]
pub enum Source {
    /// See [`file::File`].
    File(file::File),
    /// See [`remote::Remote`].
    Remote(remote::Remote),
}

impl Source {
    /// Acquire the raw bytes of the current snapshot.
    ///
    /// # Errors
    ///
    /// See the per-variant documentation.
    pub async fn acquire(&self) -> Result<Vec<u8>, Error> {
        match self {
            Source::File(inner) => inner.acquire().await,
            Source::Remote(inner) => inner.acquire().await,
        }
    }

    /// Acquire and parse the current snapshot.
    ///
    /// # Errors
    ///
    /// Returns an error if acquisition fails or the payload is malformed.
    pub async fn snapshot(&self) -> Result<Snapshot, Error> {
        let raw = self.acquire().await?;
        parse(&raw)
    }
}

/// Parse a raw payload into a [`Snapshot`].
///
/// # Errors
///
/// Returns [`Error::MalformedPayload`] if `raw` is not a JSON object.
pub fn parse(raw: &[u8]) -> Result<Snapshot, Error> {
    Ok(Snapshot::from_slice(raw)?)
}
