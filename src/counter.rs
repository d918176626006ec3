//! In-flight load counter with an observable "is loading" signal

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::watch;

/// Counts in-flight load operations across concurrent pipelines
///
/// The count is incremented when an uncached fetch begins and decremented
/// when it completes, successfully or not. Observers see the derived
/// boolean signal (count > 0) through a watch channel, so consecutive
/// changes that do not flip the boolean are not re-broadcast.
#[derive(Clone)]
pub struct LoadingCounter {
    count: Arc<AtomicUsize>,
    tx: Arc<watch::Sender<bool>>,
}

impl LoadingCounter {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self {
            count: Arc::new(AtomicUsize::new(0)),
            tx: Arc::new(tx),
        }
    }

    /// Record the start of one load operation
    pub fn increment(&self) {
        self.count.fetch_add(1, Ordering::SeqCst);
        self.publish();
    }

    /// Record the completion of one load operation
    ///
    /// Saturates at zero; the count is never negative.
    pub fn decrement(&self) {
        let _ = self
            .count
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |c| {
                Some(c.saturating_sub(1))
            });
        self.publish();
    }

    /// Force the count back to zero (stream completion or disposal)
    pub fn reset(&self) {
        self.count.store(0, Ordering::SeqCst);
        self.publish();
    }

    /// Current number of in-flight operations
    pub fn count(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }

    /// Subscribe to the boolean "is loading" signal
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }

    fn publish(&self) {
        let loading = self.count() > 0;
        self.tx.send_if_modified(|state| {
            if *state != loading {
                *state = loading;
                true
            } else {
                false
            }
        });
    }
}

impl Default for LoadingCounter {
    fn default() -> Self {
        Self::new()
    }
}
