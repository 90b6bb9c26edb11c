//! Epoch oracle: withdrawal delays count epochs, never wall-clock time.

use std::sync::atomic::{AtomicU64, Ordering};
use stpool_common::Epoch;

pub trait EpochOracle: Send + Sync {
    fn current_epoch(&self) -> Epoch;
}

/// Externally advanced epoch counter used by the demo binary and tests.
#[derive(Debug, Default)]
pub struct ManualEpoch {
    epoch: AtomicU64,
}

impl ManualEpoch {
    pub fn new(start: Epoch) -> Self {
        Self {
            epoch: AtomicU64::new(start),
        }
    }

    pub fn set(&self, epoch: Epoch) {
        self.epoch.store(epoch, Ordering::Release);
    }

    pub fn advance(&self, epochs: u64) {
        self.epoch.fetch_add(epochs, Ordering::AcqRel);
    }
}

impl EpochOracle for ManualEpoch {
    fn current_epoch(&self) -> Epoch {
        self.epoch.load(Ordering::Acquire)
    }
}
