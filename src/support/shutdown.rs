//! Cooperative shutdown
//!
//! One `Shutdown` value is cloned through the gateway's task tree. Stopping
//! happens in a fixed order: the trigger flips once, the accept loop stops
//! taking sockets, every connection task observes the trigger and sends its
//! close frame, the bus consumers finish their in-flight message, and the
//! node heartbeat withdraws the directory advertisement. [`Shutdown::drain`]
//! then joins those tasks under a deadline so a stuck consumer cannot hold
//! the process hostage.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Cloneable shutdown trigger/observer.
///
/// The flag flips exactly once; observers that subscribe after the flip
/// resolve immediately.
#[derive(Clone)]
pub struct Shutdown {
    sender: Arc<watch::Sender<bool>>,
    receiver: watch::Receiver<bool>,
}

impl Shutdown {
    pub fn new() -> Self {
        let (sender, receiver) = watch::channel(false);
        Self {
            sender: Arc::new(sender),
            receiver,
        }
    }

    /// Flip the flag. Idempotent; every observer wakes once.
    pub fn trigger(&self) {
        if !self.sender.send_replace(true) {
            info!("Shutdown triggered");
        }
    }

    pub fn is_triggered(&self) -> bool {
        *self.receiver.borrow()
    }

    /// Resolves once shutdown is triggered. Safe to race in `select!`; each
    /// call observes its own receiver, so no wake-up is lost across loop
    /// iterations.
    pub async fn triggered(&self) {
        let mut receiver = self.receiver.clone();
        // Only errors when every sender is gone, which `self` prevents.
        let _ = receiver.wait_for(|triggered| *triggered).await;
    }

    /// Trigger on SIGTERM/SIGINT (Ctrl+C elsewhere).
    pub fn install_signal_handler(&self) {
        let shutdown = self.clone();
        tokio::spawn(async move {
            #[cfg(unix)]
            {
                use tokio::signal::unix::{signal, SignalKind};

                let mut sigterm = match signal(SignalKind::terminate()) {
                    Ok(stream) => stream,
                    Err(err) => {
                        error!(%err, "Failed to install SIGTERM handler");
                        return;
                    }
                };
                let mut sigint = match signal(SignalKind::interrupt()) {
                    Ok(stream) => stream,
                    Err(err) => {
                        error!(%err, "Failed to install SIGINT handler");
                        return;
                    }
                };

                tokio::select! {
                    _ = sigterm.recv() => info!("Received SIGTERM"),
                    _ = sigint.recv() => info!("Received SIGINT"),
                }
            }

            #[cfg(not(unix))]
            {
                if let Err(err) = tokio::signal::ctrl_c().await {
                    error!(%err, "Failed to install Ctrl+C handler");
                    return;
                }
                info!("Received Ctrl+C");
            }

            shutdown.trigger();
        });
    }

    /// Join the gateway's background tasks, giving them `deadline` to drain
    /// after the trigger. Returns `false` when the deadline passed with
    /// tasks still running; those are left to die with the process.
    pub async fn drain(tasks: Vec<JoinHandle<()>>, deadline: Duration) -> bool {
        let count = tasks.len();
        let join_all = async {
            for task in tasks {
                let _ = task.await;
            }
        };

        match tokio::time::timeout(deadline, join_all).await {
            Ok(()) => {
                info!(tasks = count, "Shutdown drain complete");
                true
            }
            Err(_) => {
                warn!(
                    tasks = count,
                    deadline_secs = deadline.as_secs(),
                    "Shutdown drain deadline exceeded; abandoning remaining tasks"
                );
                false
            }
        }
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn trigger_wakes_current_and_future_observers() {
        let shutdown = Shutdown::new();
        assert!(!shutdown.is_triggered());

        let early = {
            let shutdown = shutdown.clone();
            tokio::spawn(async move { shutdown.triggered().await })
        };
        tokio::task::yield_now().await;

        shutdown.trigger();
        tokio::time::timeout(Duration::from_secs(1), early)
            .await
            .unwrap()
            .unwrap();

        // A late observer resolves immediately.
        tokio::time::timeout(Duration::from_secs(1), shutdown.triggered())
            .await
            .unwrap();
        assert!(shutdown.is_triggered());
    }

    #[tokio::test]
    async fn trigger_is_idempotent() {
        let shutdown = Shutdown::new();
        shutdown.trigger();
        shutdown.trigger();
        assert!(shutdown.is_triggered());
    }

    #[tokio::test]
    async fn drain_joins_tasks_within_deadline() {
        let shutdown = Shutdown::new();
        let task = {
            let shutdown = shutdown.clone();
            tokio::spawn(async move { shutdown.triggered().await })
        };
        shutdown.trigger();
        assert!(Shutdown::drain(vec![task], Duration::from_secs(1)).await);
    }

    #[tokio::test]
    async fn drain_gives_up_on_stuck_tasks() {
        let stuck = tokio::spawn(async {
            tokio::time::sleep(Duration::from_secs(60)).await;
        });
        assert!(!Shutdown::drain(vec![stuck], Duration::from_millis(20)).await);
    }
}
