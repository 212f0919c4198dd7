//! Process-wide delivery sequence numbers.

use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

/// Shared source of delivery sequence numbers.
///
/// Numbers are unique process-wide, monotonically increasing, and never 0
/// (0 is the wire marker for "no reliability tracking requested"). Clones
/// share the same counter; reader pumps use it to stamp inbound frames
/// that carried no number, and broadcast issuers use it to open tracked
/// deliveries.
#[derive(Debug, Clone, Default)]
pub struct SequenceSource {
    counter: Arc<AtomicU64>,
}

impl SequenceSource {
    /// A fresh source starting at 1.
    pub fn new() -> Self {
        Self::default()
    }

    /// Next sequence number.
    pub fn next(&self) -> u64 {
        self.counter.fetch_add(1, Ordering::Relaxed) + 1
    }
}
