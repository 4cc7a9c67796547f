//! Change feed — a monotonically increasing revision number.
//!
//! Every mutation of chat messages or execution records bumps the revision.
//! Subscribers (the SSE route) re-read the snapshot when it changes.

use std::sync::Arc;

use tokio::sync::watch;

#[derive(Clone)]
pub struct ChangeFeed {
    tx: Arc<watch::Sender<u64>>,
}

impl ChangeFeed {
    #[must_use]
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(0);
        Self { tx: Arc::new(tx) }
    }

    pub fn bump(&self) {
        self.tx.send_modify(|rev| *rev += 1);
    }

    #[must_use]
    pub fn revision(&self) -> u64 {
        *self.tx.borrow()
    }

    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.tx.subscribe()
    }
}

impl Default for ChangeFeed {
    fn default() -> Self {
        Self::new()
    }
}
