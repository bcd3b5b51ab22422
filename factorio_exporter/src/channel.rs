//! The shared remote command channel.
//!
//! The game server is reached over a single RCON connection that does not
//! tolerate interleaved requests. Every component that talks to the server,
//! scrape-triggered snapshot acquisition and the pacer alike, goes through a
//! clone of the same [`Channel`]. A channel serializes each send/receive pair
//! behind one mutex and bounds it with a timeout.

use std::{fmt, sync::Arc, time::Duration};

use factorio_rcon::Client;
use futures::future::BoxFuture;
use tokio::{sync::Mutex, time::sleep};
use tracing::{debug, info, warn};

use crate::source::Error;

/// Something that executes console commands on the game server.
///
/// Implementations need not be safe for concurrent use, [`Channel`] ensures
/// exclusive access.
pub trait Transport: Send + fmt::Debug {
    /// Execute `command` and return the server's reply.
    fn execute<'a>(
        &'a mut self,
        command: &'a str,
    ) -> BoxFuture<'a, Result<String, factorio_rcon::Error>>;
}

/// A mutually exclusive, cloneable handle on one [`Transport`].
#[derive(Debug, Clone)]
pub struct Channel {
    inner: Arc<Mutex<Box<dyn Transport>>>,
}

impl Channel {
    /// Wrap `transport` for shared use.
    #[must_use]
    pub fn new<T>(transport: T) -> Self
    where
        T: Transport + 'static,
    {
        Self {
            inner: Arc::new(Mutex::new(Box::new(transport))),
        }
    }

    /// Execute `command`, waiting for exclusive access first.
    ///
    /// The lock is held only for the send/receive pair. `timeout` bounds that
    /// pair, not the wait for the lock.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Transport`] if the transport fails and
    /// [`Error::Timeout`] if no reply arrives within `timeout`.
    pub async fn execute(&self, command: &str, timeout: Duration) -> Result<String, Error> {
        let mut transport = self.inner.lock().await;
        match tokio::time::timeout(timeout, transport.execute(command)).await {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(err)) => Err(Error::Transport(err)),
            Err(_elapsed) => Err(Error::Timeout(timeout)),
        }
    }
}

/// [`Transport`] over an RCON connection.
///
/// A failed or abandoned request drops the connection, the next request
/// reconnects once before sending. A reply that arrives late can therefore
/// never be read as the answer to a later request.
pub struct Rcon {
    addr: String,
    password: String,
    client: Option<Client>,
}

impl fmt::Debug for Rcon {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Rcon")
            .field("addr", &self.addr)
            .field("connected", &self.client.is_some())
            .finish_non_exhaustive()
    }
}

impl Rcon {
    /// Connect and authenticate to `addr`.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection cannot be established or the
    /// password is rejected.
    pub async fn connect(addr: String, password: String) -> Result<Self, factorio_rcon::Error> {
        let client = Client::connect(addr.as_str(), &password).await?;
        info!("connected to Factorio server via RCON at {addr}");
        Ok(Self {
            addr,
            password,
            client: Some(client),
        })
    }

    /// Connect to `addr`, retrying every `backoff` until it succeeds.
    pub async fn connect_with_retry(addr: String, password: String, backoff: Duration) -> Self {
        loop {
            debug!("attempting to connect to server via RCON at {addr}...");
            match Self::connect(addr.clone(), password.clone()).await {
                Ok(rcon) => return rcon,
                Err(err) => {
                    warn!("RCON connection to {addr} failed, retrying in {backoff:?}: {err}");
                    sleep(backoff).await;
                }
            }
        }
    }
}

impl Transport for Rcon {
    fn execute<'a>(
        &'a mut self,
        command: &'a str,
    ) -> BoxFuture<'a, Result<String, factorio_rcon::Error>> {
        Box::pin(async move {
            let mut client = match self.client.take() {
                Some(client) => client,
                None => {
                    info!("reconnecting to Factorio server via RCON at {}", self.addr);
                    Client::connect(self.addr.as_str(), &self.password).await?
                }
            };
            let reply = client.execute(command).await?;
            self.client = Some(client);
            Ok(reply)
        })
    }
}

#[cfg(test)]
pub(crate) mod mock {
    use std::sync::{
        Arc,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    };

    use super::*;

    /// What the mock answers with.
    #[derive(Debug, Clone)]
    pub(crate) enum Reply {
        Fixed(String),
        Fail,
        Stall,
    }

    /// Shared record of what a [`Mock`] observed.
    #[derive(Debug, Default, Clone)]
    pub(crate) struct Log {
        commands: Arc<std::sync::Mutex<Vec<String>>>,
        in_use: Arc<AtomicBool>,
        overlaps: Arc<AtomicUsize>,
    }

    impl Log {
        pub(crate) fn commands(&self) -> Vec<String> {
            self.commands.lock().expect("log poisoned").clone()
        }

        pub(crate) fn overlaps(&self) -> usize {
            self.overlaps.load(Ordering::SeqCst)
        }
    }

    /// A transport that flags any overlapping use.
    #[derive(Debug)]
    pub(crate) struct Mock {
        pub(crate) log: Log,
        pub(crate) reply: Reply,
    }

    impl Mock {
        pub(crate) fn new(reply: Reply) -> (Self, Log) {
            let log = Log::default();
            (
                Self {
                    log: log.clone(),
                    reply,
                },
                log,
            )
        }
    }

    impl Transport for Mock {
        fn execute<'a>(
            &'a mut self,
            command: &'a str,
        ) -> BoxFuture<'a, Result<String, factorio_rcon::Error>> {
            Box::pin(async move {
                if self.log.in_use.swap(true, Ordering::SeqCst) {
                    self.log.overlaps.fetch_add(1, Ordering::SeqCst);
                }
                // Hold the "wire" across a suspension point so overlapping
                // callers would be observed.
                tokio::time::sleep(Duration::from_millis(1)).await;
                self.log
                    .commands
                    .lock()
                    .expect("log poisoned")
                    .push(command.to_string());
                self.log.in_use.store(false, Ordering::SeqCst);

                match &self.reply {
                    Reply::Fixed(reply) => Ok(reply.clone()),
                    Reply::Fail => Err(factorio_rcon::Error::Io(std::io::Error::new(
                        std::io::ErrorKind::ConnectionReset,
                        "mock transport failure",
                    ))),
                    Reply::Stall => futures::future::pending().await,
                }
            })
        }
    }
}
