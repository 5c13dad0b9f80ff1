//! Process-wide termination signal.
//!
//! Created once at startup and handed (cloned) to every component that waits:
//! the executor's backoff, the pool start-up loop and the pool monitor. It is
//! set exactly once during shutdown and stays set.

use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct TerminationSignal {
    tx: Arc<watch::Sender<bool>>,
}

impl TerminationSignal {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Set the signal. Returns `true` for the call that actually set it.
    pub fn set(&self) -> bool {
        let first = self.tx.send_if_modified(|set| {
            if *set {
                false
            } else {
                *set = true;
                true
            }
        });
        if first {
            info!("Termination signal set");
        }
        first
    }

    pub fn is_set(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolve once the signal is set (immediately if it already is).
    pub async fn wait(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives as long as `self`, so this cannot observe a closed channel.
        let _ = rx.wait_for(|set| *set).await;
    }

    /// Set the signal when the process receives Ctrl-C.
    pub fn set_on_ctrl_c(&self) -> JoinHandle<()> {
        let signal = self.clone();
        tokio::spawn(async move {
            tokio::select! {
                result = tokio::signal::ctrl_c() => {
                    if let Err(e) = result {
                        warn!(error = %e, "Failed to listen for Ctrl-C");
                        return;
                    }
                    info!("Ctrl-C received, shutting down");
                    signal.set();
                }
                _ = signal.wait() => {}
            }
        })
    }
}

impl Default for TerminationSignal {
    fn default() -> Self {
        Self::new()
    }
}
