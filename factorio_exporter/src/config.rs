//! Configuration parsing from the end user. The YAML file is optional, every
//! field has a default and command line flags are applied on top of it.
use std::{
    fs, io,
    net::SocketAddr,
    path::{Path, PathBuf},
};

use serde::Deserialize;

use crate::{pacer, source};

/// Errors produced by [`Config`]
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Error for a serde [`serde_yaml`].
    #[error("Failed to deserialize yaml: {0}")]
    SerdeYaml(#[from] serde_yaml::Error),
    /// Error reading config file
    #[error("Failed to read config file {path:?}: {source}")]
    ReadFile {
        /// File path
        path: PathBuf,
        /// Underlying IO error
        #[source]
        source: Box<io::Error>,
    },
    /// Error reading the RCON password file
    #[error("Failed to read RCON password from {path:?}: {source}")]
    RconPassword {
        /// Password file path
        path: PathBuf,
        /// Underlying IO error
        #[source]
        source: io::Error,
    },
    /// Auto-pause was requested without an RCON source
    #[error("autopause requires the rcon source")]
    AutopauseWithoutRcon,
    /// A period or limit that must be positive is zero
    #[error("{0} must be greater than zero")]
    Zero(&'static str),
}

fn default_metrics_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 9102))
}

fn default_concurrent_requests_max() -> usize {
    100
}

/// Main configuration struct for this program
#[derive(Debug, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Address the metrics endpoint listens on
    #[serde(default = "default_metrics_addr")]
    pub metrics_addr: SocketAddr,
    /// Maximum number of connections served at once
    #[serde(default = "default_concurrent_requests_max")]
    pub concurrent_requests_max: usize,
    /// Where snapshots come from
    #[serde(default)]
    #[serde(with = "serde_yaml::with::singleton_map")]
    pub source: source::Config,
    /// Periodic auto-pause command, RCON only
    #[serde(default)]
    pub autopause: Option<pacer::Config>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            metrics_addr: default_metrics_addr(),
            concurrent_requests_max: default_concurrent_requests_max(),
            source: source::Config::default(),
            autopause: None,
        }
    }
}

impl Config {
    /// Check invariants serde cannot express.
    ///
    /// # Errors
    ///
    /// Returns an error if auto-pause is configured without the rcon source
    /// or a limit or period is zero.
    pub fn validate(&self) -> Result<(), Error> {
        if self.concurrent_requests_max == 0 {
            return Err(Error::Zero("concurrent_requests_max"));
        }
        if matches!(&self.source, source::Config::Rcon(rcon) if rcon.timeout_millis == 0) {
            return Err(Error::Zero("rcon.timeout_millis"));
        }
        if let Some(autopause) = &self.autopause {
            if !matches!(self.source, source::Config::Rcon(_)) {
                return Err(Error::AutopauseWithoutRcon);
            }
            if autopause.interval_millis == 0 {
                return Err(Error::Zero("autopause.interval_millis"));
            }
        }
        Ok(())
    }
}

/// Load configuration from a YAML file at `path`.
///
/// # Errors
///
/// Returns an error if the file cannot be read, is not valid YAML for
/// [`Config`] or fails [`Config::validate`].
pub fn load_config_from_path(path: &Path) -> Result<Config, Error> {
    let contents = fs::read_to_string(path).map_err(|source| Error::ReadFile {
        path: path.to_path_buf(),
        source: Box::new(source),
    })?;
    let config: Config = serde_yaml::from_str(&contents)?;
    config.validate()?;
    Ok(config)
}
