//! Transaction identifiers.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Identifies one unit of work for logging and savepoint ownership checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TransactionId(pub u64);

impl TransactionId {
    /// Wraps a raw id.
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// The raw id.
    pub fn value(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for TransactionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "txn.{}", self.0)
    }
}

/// Hands out increasing transaction ids, starting from 1.
pub struct TransactionIdGenerator {
    next_id: AtomicU64,
}

static GLOBAL_GENERATOR: TransactionIdGenerator = TransactionIdGenerator::new();

impl TransactionIdGenerator {
    pub const fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
        }
    }

    /// The process-wide generator used by transactions created without a manager.
    pub fn global() -> &'static TransactionIdGenerator {
        &GLOBAL_GENERATOR
    }

    /// Hands out the next id.
    pub fn next(&self) -> TransactionId {
        TransactionId::new(self.next_id.fetch_add(1, Ordering::SeqCst))
    }

    /// Last id handed out, or 0 if none yet.
    pub fn current(&self) -> TransactionId {
        let id = self.next_id.load(Ordering::SeqCst);
        TransactionId::new(id.saturating_sub(1))
    }
}

impl Default for TransactionIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}
