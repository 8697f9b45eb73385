//! Transaction manager for handing out transactions.
//!
//! The manager does not own the transactions it creates. It remembers which
//! one is current, passes its synchronizers on to every new transaction, and
//! is told through [`TransactionOwner::free`] when that transaction ends.

use std::sync::Arc;

use parking_lot::Mutex;

use super::coordinator::Transaction;
use super::error::{Result, TransactionError};
use super::id::{TransactionId, TransactionIdGenerator};
use crate::synchronizer::{Synchronizer, SynchronizerId, SynchronizerRegistry};

/// Receives a transaction back once it committed or aborted.
pub trait TransactionOwner: Send + Sync {
    fn free(&self, id: TransactionId) -> Result<()>;
}

pub struct TransactionManager {
    id_generator: TransactionIdGenerator,
    current: Mutex<Option<TransactionId>>,
    synchronizers: Mutex<SynchronizerRegistry>,
}

impl TransactionManager {
    /// Creates a manager with no current transaction.
    pub fn new() -> Self {
        Self {
            id_generator: TransactionIdGenerator::new(),
            current: Mutex::new(None),
            synchronizers: Mutex::new(SynchronizerRegistry::new()),
        }
    }

    /// Begins a new transaction and makes it current.
    ///
    /// A transaction that is still outstanding stops being current; freeing
    /// it later fails.
    pub fn begin(self: &Arc<Self>) -> Transaction {
        let id = self.id_generator.next();
        let synchronizers = self.synchronizers.lock().snapshot();
        let owner: Arc<dyn TransactionOwner> = Arc::clone(self) as Arc<dyn TransactionOwner>;

        if let Some(previous) = self.current.lock().replace(id) {
            log::warn!(
                target: "txn",
                "{}: begin while {} is still outstanding",
                id,
                previous
            );
        }

        let mut txn = Transaction::with_parts(id, synchronizers, Some(owner));
        txn.notify_new_transaction();
        txn
    }

    /// Id of the current transaction, if one is outstanding.
    pub fn current(&self) -> Option<TransactionId> {
        *self.current.lock()
    }

    /// True if `id` is the current transaction.
    pub fn is_current(&self, id: TransactionId) -> bool {
        self.current() == Some(id)
    }

    /// Registers a synchronizer for every transaction begun from now on.
    pub fn register_synch(&self, synch: &Arc<dyn Synchronizer>) -> SynchronizerId {
        self.synchronizers.lock().register(synch)
    }

    /// Stops passing a synchronizer on to new transactions.
    pub fn unregister_synch(&self, id: SynchronizerId) -> bool {
        self.synchronizers.lock().unregister(id)
    }

    /// Number of live manager-level synchronizers.
    pub fn synch_count(&self) -> usize {
        self.synchronizers.lock().len()
    }
}

impl Default for TransactionManager {
    fn default() -> Self {
        Self::new()
    }
}

impl TransactionOwner for TransactionManager {
    fn free(&self, id: TransactionId) -> Result<()> {
        let mut current = self.current.lock();
        if *current != Some(id) {
            return Err(TransactionError::InvalidState(format!(
                "Foreign transaction {}",
                id
            )));
        }
        *current = None;
        Ok(())
    }
}
