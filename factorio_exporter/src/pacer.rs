//! The auto-pause pacer.
//!
//! Factorio keeps simulating an empty multiplayer game unless told to pause.
//! The pacer sends a pause-management command through the shared channel at
//! a fixed interval. Replies are discarded and failures logged, the pacer
//! never stops before shutdown.

use std::{path::PathBuf, time::Duration};

use metrics::counter;
use serde::{Deserialize, Serialize};
use tokio::{pin, select, time::MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::{channel::Channel, commander::Command, signals::Watcher};

fn default_script_path() -> PathBuf {
    PathBuf::from("/factorio/exporter/autopause.lua")
}

fn default_interval_millis() -> u64 {
    100
}

/// Configuration of the [`Pacer`].
#[derive(Debug, Deserialize, Serialize, PartialEq, Clone)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Lua script to send on every tick.
    #[serde(default = "default_script_path")]
    pub script_path: PathBuf,
    /// Time between sends, in milliseconds.
    #[serde(default = "default_interval_millis")]
    pub interval_millis: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            script_path: default_script_path(),
            interval_millis: default_interval_millis(),
        }
    }
}

impl Config {
    /// Time between sends.
    #[must_use]
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_millis)
    }
}

/// Periodically sends a command through a shared [`Channel`].
#[derive(Debug)]
pub struct Pacer {
    channel: Channel,
    command: Command,
    interval: Duration,
    timeout: Duration,
    shutdown: Watcher,
}

impl Pacer {
    /// Create a new [`Pacer`].
    #[must_use]
    pub fn new(
        channel: Channel,
        command: Command,
        interval: Duration,
        timeout: Duration,
        shutdown: Watcher,
    ) -> Self {
        Self {
            channel,
            command,
            interval,
            timeout,
            shutdown,
        }
    }

    /// Run until shutdown is signaled.
    pub async fn run(self) {
        info!("auto-pause pacer running every {:?}", self.interval);
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let shutdown_wait = self.shutdown.recv();
        pin!(shutdown_wait);
        loop {
            select! {
                _ = ticker.tick() => {
                    let command = self.command.current();
                    match self.channel.execute(&command, self.timeout).await {
                        Ok(_reply) => {
                            counter!("exporter_pacer_sends_total", "outcome" => "ok").increment(1);
                        }
                        Err(err) => {
                            counter!("exporter_pacer_sends_total", "outcome" => "error").increment(1);
                            warn!("auto-pause command failed: {err}");
                        }
                    }
                }
                () = &mut shutdown_wait => {
                    debug!("shutdown signal received, stopping pacer");
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        channel::mock::{Mock, Reply},
        signals,
    };

    #[tokio::test]
    async fn sends_until_shutdown() {
        let (mock, log) = Mock::new(Reply::Fixed(String::new()));
        let (watcher, broadcaster) = signals::signal();
        let pacer = Pacer::new(
            Channel::new(mock),
            Command::fixed("/silent-command pause()"),
            Duration::from_millis(10),
            Duration::from_secs(1),
            watcher,
        );
        let handle = tokio::spawn(pacer.run());

        tokio::time::sleep(Duration::from_millis(100)).await;
        broadcaster.signal();
        handle.await.expect("pacer panicked");

        let commands = log.commands();
        assert!(commands.len() >= 3, "only {} sends", commands.len());
        assert!(commands.iter().all(|c| c == "/silent-command pause()"));

        // No sends after shutdown.
        let sent = commands.len();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(log.commands().len(), sent);
    }

    #[tokio::test]
    async fn failures_do_not_stop_the_pacer() {
        let (mock, log) = Mock::new(Reply::Fail);
        let (watcher, broadcaster) = signals::signal();
        let pacer = Pacer::new(
            Channel::new(mock),
            Command::fixed("/silent-command pause()"),
            Duration::from_millis(10),
            Duration::from_secs(1),
            watcher,
        );
        let handle = tokio::spawn(pacer.run());

        tokio::time::sleep(Duration::from_millis(100)).await;
        broadcaster.signal();
        handle.await.expect("pacer panicked");
        assert!(log.commands().len() >= 3);
    }

    #[test]
    fn config_defaults() {
        let config: Config = serde_yaml::from_str("{}").expect("failed to deserialize");
        assert_eq!(config, Config::default());
        assert_eq!(config.interval(), Duration::from_millis(100));
    }
}
