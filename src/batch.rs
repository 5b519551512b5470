//! Cooperative cancellation and progress reporting for batch passes.
//!
//! Workers poll [`BatchControl::is_cancelled`] between items and report
//! each finished item with [`BatchControl::tick`]. Work finished before a
//! cancellation is always kept by the caller.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

/// Callback receiving `(done, total)` after each item
pub type ProgressFn = dyn Fn(usize, usize) + Send + Sync;

/// Shared handle passed to every batch operation
#[derive(Clone, Default)]
pub struct BatchControl {
    cancelled: Arc<AtomicBool>,
    done: Arc<AtomicUsize>,
    total: Arc<AtomicUsize>,
    progress: Option<Arc<ProgressFn>>,
}

impl std::fmt::Debug for BatchControl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchControl")
            .field("cancelled", &self.is_cancelled())
            .field("done", &self.done())
            .field("total", &self.total.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl BatchControl {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_progress(mut self, progress: impl Fn(usize, usize) + Send + Sync + 'static) -> Self {
        self.progress = Some(Arc::new(progress));
        self
    }

    /// Request that running batch passes stop at the next item boundary.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Start a new pass of `total` items, resetting the counter.
    pub fn begin(&self, total: usize) {
        self.total.store(total, Ordering::Relaxed);
        self.done.store(0, Ordering::Relaxed);
    }

    /// Record one finished item.
    pub fn tick(&self) {
        let done = self.done.fetch_add(1, Ordering::Relaxed) + 1;
        if let Some(progress) = &self.progress {
            progress(done, self.total.load(Ordering::Relaxed));
        }
    }

    #[must_use]
    pub fn done(&self) -> usize {
        self.done.load(Ordering::Relaxed)
    }
}
