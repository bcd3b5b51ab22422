//! Snapshots requested from the server over RCON.
//!
//! Each acquisition sends the current metrics command through the shared
//! [`Channel`] and treats the reply as the snapshot payload.

use std::{path::PathBuf, time::Duration};

use serde::{Deserialize, Serialize};
use tracing::trace;

use super::Error;
use crate::{channel::Channel, commander::Command, config};

fn default_address() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    27015
}

fn default_password_path() -> PathBuf {
    PathBuf::from("/factorio/config/rconpw")
}

fn default_script_path() -> PathBuf {
    PathBuf::from("/factorio/exporter/metrics.lua")
}

fn default_timeout_millis() -> u64 {
    3_000
}

/// Configuration of [`Remote`].
#[derive(Debug, Deserialize, Serialize, PartialEq, Clone)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Hostname or IP address of the server.
    #[serde(default = "default_address")]
    pub address: String,
    /// RCON port of the server.
    #[serde(default = "default_port")]
    pub port: u16,
    /// RCON password. Takes precedence over `password_path`.
    #[serde(default)]
    pub password: Option<String>,
    /// File holding the RCON password, as written by the server.
    #[serde(default = "default_password_path")]
    pub password_path: PathBuf,
    /// Lua script whose output is the snapshot.
    #[serde(default = "default_script_path")]
    pub script_path: PathBuf,
    /// Upper bound on one request/reply exchange, in milliseconds.
    #[serde(default = "default_timeout_millis")]
    pub timeout_millis: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            address: default_address(),
            port: default_port(),
            password: None,
            password_path: default_password_path(),
            script_path: default_script_path(),
            timeout_millis: default_timeout_millis(),
        }
    }
}

impl Config {
    /// `address:port` of the server.
    #[must_use]
    pub fn addr(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }

    /// Request timeout.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_millis)
    }

    /// Resolve the RCON password.
    ///
    /// # Errors
    ///
    /// Returns [`config::Error::RconPassword`] if no password is configured
    /// inline and `password_path` cannot be read.
    pub fn password(&self) -> Result<String, config::Error> {
        if let Some(password) = &self.password {
            return Ok(password.clone());
        }
        let raw = std::fs::read_to_string(&self.password_path).map_err(|source| {
            config::Error::RconPassword {
                path: self.password_path.clone(),
                source,
            }
        })?;
        Ok(raw.trim().to_string())
    }
}

/// An RCON-backed snapshot source.
#[derive(Debug, Clone)]
pub struct Remote {
    channel: Channel,
    command: Command,
    timeout: Duration,
}

impl Remote {
    /// Create a new [`Remote`] sending `command` through `channel`.
    #[must_use]
    pub fn new(channel: Channel, command: Command, timeout: Duration) -> Self {
        Self {
            channel,
            command,
            timeout,
        }
    }

    /// Send the current command and return the reply.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Transport`] or [`Error::Timeout`] if the exchange
    /// fails.
    pub async fn acquire(&self) -> Result<Vec<u8>, Error> {
        let command = self.command.current();
        let reply = self.channel.execute(&command, self.timeout).await?;
        trace!("received {} byte reply", reply.len());
        Ok(reply.into_bytes())
    }
}
