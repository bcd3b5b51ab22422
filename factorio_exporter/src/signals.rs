//! Module to signal shutdown to the exporter's long-lived tasks.
//!
//! The exporter runs an HTTP accept loop, zero or more command hot-reloaders
//! and possibly a pacer. None of these finish on their own, they run until the
//! process is asked to stop. That stop is communicated with the pair built by
//! [`signal`]: one [`Broadcaster`] and any number of cloned [`Watcher`]
//! instances.
//!
//! The signal is a one-time event. Once sent, every current and future call
//! to [`Watcher::recv`] resolves immediately. Dropping the `Broadcaster`
//! without signaling is treated the same as signaling.

use tokio::sync::watch;
use tracing::info;

/// Construct a `Watcher` and `Broadcaster` pair.
#[must_use]
pub fn signal() -> (Watcher, Broadcaster) {
    let (sender, receiver) = watch::channel(false);
    (Watcher { receiver }, Broadcaster { sender })
}

#[derive(Debug)]
/// Mechanism to notify one or more `Watcher` instances that shutdown has been
/// requested.
pub struct Broadcaster {
    sender: watch::Sender<bool>,
}

impl Broadcaster {
    /// Send the signal through to any `Watcher` instances.
    ///
    /// Function will NOT block until all peers have dropped off.
    pub fn signal(self) {
        self.sender.send_replace(true);
    }

    /// Send the signal through to any `Watcher` instances.
    ///
    /// Function WILL block until every `Watcher` has been dropped.
    pub async fn signal_and_wait(self) {
        self.sender.send_replace(true);
        let peers = self.sender.receiver_count();
        if peers > 0 {
            info!("Waiting for {peers} peers");
        }
        self.sender.closed().await;
    }
}

#[derive(Debug, Clone)]
/// Mechanism to watch for shutdown.
pub struct Watcher {
    receiver: watch::Receiver<bool>,
}

impl Watcher {
    /// Receive the shutdown notice. This function will block if a notice has
    /// not already been sent.
    ///
    /// The `Watcher` is consumed, so a task holding one is released from
    /// [`Broadcaster::signal_and_wait`] as soon as it observes shutdown.
    pub async fn recv(mut self) {
        // An error means the broadcaster is gone, which is also shutdown.
        let _ = self.receiver.wait_for(|signaled| *signaled).await;
    }

    #[cfg(test)]
    fn try_recv(&self) -> bool {
        *self.receiver.borrow() || self.receiver.has_changed().is_err()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn every_clone_observes_the_signal() {
        let (watcher, broadcaster) = signal();
        let other = watcher.clone();
        assert!(!watcher.try_recv());

        let first = tokio::spawn(watcher.recv());
        let second = tokio::spawn(other.recv());
        broadcaster.signal();

        first.await.expect("watcher task panicked");
        second.await.expect("watcher task panicked");
    }

    #[tokio::test]
    async fn watcher_created_after_signal_returns_immediately() {
        let (watcher, broadcaster) = signal();
        let late = watcher.clone();
        broadcaster.signal();
        assert!(late.try_recv());
        tokio::time::timeout(Duration::from_secs(1), late.recv())
            .await
            .expect("late watcher did not observe signal");
    }

    #[tokio::test]
    async fn dropped_broadcaster_counts_as_signal() {
        let (watcher, broadcaster) = signal();
        drop(broadcaster);
        assert!(watcher.try_recv());
        tokio::time::timeout(Duration::from_secs(1), watcher.recv())
            .await
            .expect("watcher did not observe dropped broadcaster");
    }

    #[tokio::test]
    async fn signal_and_wait_blocks_until_watchers_drop() {
        let (watcher, broadcaster) = signal();
        let task = tokio::spawn(async move {
            watcher.recv().await;
        });
        tokio::time::timeout(Duration::from_secs(1), broadcaster.signal_and_wait())
            .await
            .expect("signal_and_wait never returned");
        task.await.expect("watcher task panicked");
    }
}
