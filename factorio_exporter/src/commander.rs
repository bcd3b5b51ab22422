//! Hot-reloadable RCON commands.
//!
//! Commands sent to the server are built from Lua scripts on disk. A
//! [`Reloader`] owns one script: it loads it at startup, watches it for
//! changes and publishes each rebuilt command through a [`Command`] handle.
//! Readers always see a complete command, either the one before or the one
//! after a reload.
//!
//! A script that cannot be read at startup is fatal. Once running, a failed
//! reload keeps the previous command in service.

use std::{
    io,
    path::{Path, PathBuf},
    sync::Arc,
};

use metrics::counter;
use notify::{Event, EventKind, RecursiveMode, Watcher as _};
use tokio::{
    pin, select,
    sync::{mpsc, watch},
};
use tracing::{debug, error, info, warn};

use crate::signals::Watcher;

/// Prefix that executes the remainder of a console line as Lua without
/// echoing it to players.
pub const COMMAND_PREFIX: &str = "/silent-command ";

/// Errors produced by [`Reloader`].
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The script could not be read.
    #[error("failed to read command script {path:?}: {source}")]
    Read {
        /// Script path.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: io::Error,
    },
    /// The script could not be watched for changes.
    #[error("failed to watch command script {path:?}: {source}")]
    Watch {
        /// Script path.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: notify::Error,
    },
}

/// Build the console line that runs `script`.
#[must_use]
pub fn build(script: &str) -> String {
    format!("{COMMAND_PREFIX}{script}")
}

/// A read handle on the current command.
#[derive(Debug, Clone)]
pub struct Command {
    receiver: watch::Receiver<Arc<str>>,
}

impl Command {
    /// A command that never changes.
    #[must_use]
    pub fn fixed(command: &str) -> Self {
        let (_sender, receiver) = watch::channel(Arc::from(command));
        Self { receiver }
    }

    /// The command currently in service.
    #[must_use]
    pub fn current(&self) -> Arc<str> {
        Arc::clone(&self.receiver.borrow())
    }
}

/// Owner of one command script.
#[derive(Debug)]
pub struct Reloader {
    path: PathBuf,
    sender: watch::Sender<Arc<str>>,
}

async fn read(path: &Path) -> Result<String, Error> {
    tokio::fs::read_to_string(path)
        .await
        .map_err(|source| Error::Read {
            path: path.to_path_buf(),
            source,
        })
}

impl Reloader {
    /// Load the script at `path` and return its reloader along with a
    /// handle on the built command.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Read`] if the script cannot be read.
    pub async fn load(path: impl AsRef<Path>) -> Result<(Self, Command), Error> {
        let path = path.as_ref();
        // Symlinks stay unresolved, the configured directory is the one watched.
        let path = std::path::absolute(path).map_err(|source| Error::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let script = read(&path).await?;
        let (sender, receiver) = watch::channel(Arc::from(build(&script)));
        info!("loaded command script {}", path.display());

        Ok((Self { path, sender }, Command { receiver }))
    }

    /// Re-read the script and publish the rebuilt command if it differs from
    /// the one in service. Returns whether a new command was published.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Read`] if the script cannot be read. The previously
    /// published command stays in service.
    pub async fn reload(&mut self) -> Result<bool, Error> {
        let command: Arc<str> = Arc::from(build(&read(&self.path).await?));
        let changed = self.sender.send_if_modified(|current| {
            if *current == command {
                return false;
            }
            *current = command;
            true
        });
        if changed {
            counter!("exporter_command_reloads_total").increment(1);
            info!("reloaded command script {}", self.path.display());
        }
        Ok(changed)
    }

    fn is_change(&self, event: &notify::Result<Event>) -> bool {
        match event {
            Ok(event) => matches!(
                event.kind,
                EventKind::Modify(_) | EventKind::Create(_) | EventKind::Remove(_)
            ),
            Err(err) => {
                warn!("error watching {}: {err}", self.path.display());
                false
            }
        }
    }

    /// Watch the script and reload it whenever it changes, until `shutdown`
    /// is signaled.
    ///
    /// The script is re-read once the watch is in place, so an edit made
    /// after [`Reloader::load`] is not missed. Changes arriving while a
    /// reload is in progress are coalesced into one further reload.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Watch`] if the watch cannot be established.
    pub async fn run(mut self, shutdown: Watcher) -> Result<(), Error> {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut watcher = notify::recommended_watcher(move |event: notify::Result<Event>| {
            // The receiver is only gone once we are shutting down.
            let _ = tx.send(event);
        })
        .map_err(|source| Error::Watch {
            path: self.path.clone(),
            source,
        })?;
        // Editors and volume mounts replace files rather than write them in
        // place, so watch the directory. Any change there triggers a re-read.
        let target = self.path.parent().unwrap_or(&self.path).to_path_buf();
        watcher
            .watch(&target, RecursiveMode::NonRecursive)
            .map_err(|source| Error::Watch {
                path: self.path.clone(),
                source,
            })?;
        info!("watching {} for changes", self.path.display());
        if let Err(err) = self.reload().await {
            warn!("keeping previous command: {err}");
        }

        let shutdown_wait = shutdown.recv();
        pin!(shutdown_wait);
        loop {
            select! {
                event = rx.recv() => {
                    let Some(event) = event else {
                        error!("file watcher for {} stopped", self.path.display());
                        return Ok(());
                    };
                    let mut changed = self.is_change(&event);
                    while let Ok(event) = rx.try_recv() {
                        changed |= self.is_change(&event);
                    }
                    if changed {
                        debug!("directory of {} changed, re-reading", self.path.display());
                        if let Err(err) = self.reload().await {
                            warn!("keeping previous command: {err}");
                        }
                    }
                }
                () = &mut shutdown_wait => {
                    debug!("shutdown signal received, no longer watching {}", self.path.display());
                    return Ok(());
                }
            }
        }
    }
}
