//! Shutdown signalling. One flag, set once, observed at every wait.
//!
//! The round loop never sleeps directly. Every pause goes through
//! [`ShutdownListener::wait`], which returns early once [`Shutdown::trigger`]
//! has been called. Work already in progress (a chain call, a persist) is
//! never interrupted; only waits are.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

/// Named wait points of the round loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Lets the round-open announcement reach clients before negotiation.
    Announce,
    /// Backoff after a failed negotiation.
    Retry,
    /// Client submission window.
    MixWindow,
    /// Pause between rounds.
    RoundGap,
}

/// Owner side of the shutdown flag. Cheap to clone.
#[derive(Clone)]
pub struct Shutdown {
    tx: Arc<watch::Sender<bool>>,
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

impl Shutdown {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Set the flag. Returns true only for the call that actually set it.
    pub fn trigger(&self) -> bool {
        self.tx.send_if_modified(|closed| {
            if *closed {
                false
            } else {
                *closed = true;
                true
            }
        })
    }

    pub fn is_triggered(&self) -> bool {
        *self.tx.borrow()
    }

    pub fn listener(&self) -> ShutdownListener {
        ShutdownListener {
            rx: self.tx.subscribe(),
        }
    }
}

/// Observer side of the shutdown flag.
pub struct ShutdownListener {
    rx: watch::Receiver<bool>,
}

impl ShutdownListener {
    /// Resolves once shutdown has been triggered (or the owner is gone).
    pub async fn cancelled(&mut self) {
        let _ = self.rx.wait_for(|closed| *closed).await;
    }

    /// Sleep for `duration` unless shutdown arrives first.
    ///
    /// Returns true if the full duration elapsed, false if the wait was
    /// cut short. A listener that is already cancelled returns false
    /// without sleeping.
    pub async fn wait(&mut self, phase: Phase, duration: Duration) -> bool {
        if *self.rx.borrow() {
            return false;
        }
        tracing::trace!(?phase, ms = duration.as_millis() as u64, "waiting");
        tokio::select! {
            biased;
            _ = self.cancelled() => {
                tracing::debug!(?phase, "wait interrupted by shutdown");
                false
            }
            _ = tokio::time::sleep(duration) => true,
        }
    }

    /// Drive `fut` to completion unless shutdown arrives first.
    pub async fn guard<F: Future>(&mut self, fut: F) -> Option<F::Output> {
        if *self.rx.borrow() {
            return None;
        }
        tokio::select! {
            biased;
            _ = self.cancelled() => None,
            out = fut => Some(out),
        }
    }
}
