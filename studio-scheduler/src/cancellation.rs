//! Cooperative cancellation signal (spec §4.1, §5): the Graph Runner
//! observes this at each node boundary and each retry backoff wake-up.
//! Setting it never aborts anything by itself -- it's the receiver's job
//! to check it and stop starting new work.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Clone, Default)]
pub struct CancellationSignal(Arc<AtomicBool>);

impl CancellationSignal {
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(false)))
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}
