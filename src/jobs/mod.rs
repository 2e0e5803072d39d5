//! Batch jobs: derivation, candidate generation, feature building, training,
//! scoring, evaluation, seeding, and the daily orchestrator.
//!
//! Jobs iterate players as independent work units. Per-unit failures are
//! counted and logged, never fatal to the batch; every write is a per-row
//! append/upsert so a cancelled job leaves the store consistent.

pub mod candidates;
pub mod daily;
pub mod derive;
pub mod evaluate;
pub mod features;
pub mod predict;
pub mod seed;
pub mod train;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Cooperative cancellation signal, observed between player units.
#[derive(Debug, Clone, Default)]
pub struct StopFlag(Arc<AtomicBool>);

impl StopFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stop_flag_is_shared() {
        let flag = StopFlag::new();
        let clone = flag.clone();
        assert!(!clone.is_stopped());
        flag.stop();
        assert!(clone.is_stopped());
    }
}
