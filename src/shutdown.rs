//! Cooperative shutdown.
//!
//! A trigger flips a shared flag once; reapers consult the flag before they
//! start each deletion. Calls already in flight are never interrupted.

use tokio::sync::watch;

/// Sending half, owned by whoever observes process signals
#[derive(Debug)]
pub struct ShutdownTrigger {
    tx: watch::Sender<bool>,
}

impl ShutdownTrigger {
    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }
}

/// Receiving half, cloned into every component that can stop early
#[derive(Debug, Clone)]
pub struct ShutdownSignal {
    rx: Option<watch::Receiver<bool>>,
}

impl ShutdownSignal {
    pub fn channel() -> (ShutdownTrigger, ShutdownSignal) {
        let (tx, rx) = watch::channel(false);
        (ShutdownTrigger { tx }, ShutdownSignal { rx: Some(rx) })
    }

    /// A signal that never fires
    pub fn never() -> Self {
        Self { rx: None }
    }

    pub fn is_requested(&self) -> bool {
        self.rx.as_ref().is_some_and(|rx| *rx.borrow())
    }
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::never()
    }
}
