//! Ctrl+C delivery to whatever the session is currently waiting on.

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Cloneable interrupt source backed by a generation counter.
///
/// Waiters call [`Interrupt::arm`] right before they start waiting; only
/// triggers that happen after that point wake them, so a Ctrl+C pressed
/// during one action never cancels a later one.
#[derive(Debug, Clone)]
pub struct Interrupt {
    tx: Arc<watch::Sender<u64>>,
}

impl Default for Interrupt {
    fn default() -> Self {
        Self::new()
    }
}

impl Interrupt {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(0);
        Self { tx: Arc::new(tx) }
    }

    pub fn trigger(&self) {
        self.tx.send_modify(|generation| *generation += 1);
    }

    /// Snapshot the current generation.
    pub fn arm(&self) -> Armed {
        Armed {
            rx: self.tx.subscribe(),
        }
    }

    /// Forward every Ctrl+C to [`Interrupt::trigger`] until the signal
    /// handler can no longer be installed.
    pub fn spawn_ctrl_c_listener(&self) -> JoinHandle<()> {
        let interrupt = self.clone();
        tokio::spawn(async move {
            loop {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    warn!(error = %e, "failed to listen for Ctrl+C");
                    break;
                }
                debug!("interrupt requested");
                interrupt.trigger();
            }
        })
    }
}

/// A single armed wait on an [`Interrupt`].
#[derive(Debug)]
pub struct Armed {
    rx: watch::Receiver<u64>,
}

impl Armed {
    /// Resolves once the interrupt fires after this snapshot was taken.
    pub async fn triggered(&mut self) {
        if self.rx.changed().await.is_err() {
            // Sender gone: nothing can interrupt us any more.
            std::future::pending::<()>().await;
        }
    }

    pub fn is_triggered(&self) -> bool {
        self.rx.has_changed().unwrap_or(false)
    }
}
