pub mod page;
pub mod pool;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

pub use page::{OutputReference, PageStatus, PageTask};
pub use pool::{FanOutPool, PoolCounts, PoolEvent, PoolHandle, PoolSummary};

/// Cooperative cancellation flag shared between a job and its pool.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}
