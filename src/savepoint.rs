//! Transaction savepoints.
//!
//! A [`Savepoint`] is a plain handle: the index it was given plus the id of
//! the transaction that issued it. The per-participant rollback handles live
//! in a [`SavepointTable`] owned by the transaction. Rolling back to a
//! savepoint drops every entry with a larger index, so those handles stop
//! being valid. A savepoint that is no longer needed is released explicitly.

use std::collections::BTreeMap;

use crate::resource::{ResourceSavepoint, SharedResource};
use crate::transaction::{Result, Transaction, TransactionError, TransactionId, TransactionMeta};

/// A rollback point inside a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Savepoint {
    index: u64,
    transaction: TransactionId,
}

impl Savepoint {
    pub(crate) fn new(index: u64, transaction: TransactionId) -> Self {
        Self { index, transaction }
    }

    /// Position in the transaction's savepoint sequence, starting at 1.
    pub fn index(&self) -> u64 {
        self.index
    }

    /// Id of the transaction that issued this savepoint.
    pub fn transaction(&self) -> TransactionId {
        self.transaction
    }

    /// False once a rollback to an earlier savepoint or the end of the
    /// transaction invalidated this one.
    pub fn valid(&self, txn: &Transaction) -> bool {
        txn.is_savepoint_valid(self)
    }

    pub fn rollback(&self, txn: &mut Transaction) -> Result<()> {
        txn.rollback(self)
    }

    /// Gives up this savepoint so `txn` stops holding its rollback state.
    pub fn release(self, txn: &mut Transaction) -> bool {
        txn.release_savepoint(&self)
    }
}

/// Rolls back a participant that joined after the savepoint was taken, by
/// aborting it and removing it from the transaction.
#[derive(Clone)]
pub struct AbortSavepoint {
    resource: SharedResource,
}

impl AbortSavepoint {
    pub fn new(resource: SharedResource) -> Self {
        Self { resource }
    }

    pub fn resource(&self) -> &SharedResource {
        &self.resource
    }

    pub(crate) fn rollback(&self, txn: &TransactionMeta) -> anyhow::Result<()> {
        self.resource.lock().abort(txn)
    }
}

/// Placeholder for participants that cannot roll back.
#[derive(Debug, Clone)]
pub struct NoRollbackSavepoint {
    resource: String,
}

impl NoRollbackSavepoint {
    pub fn new(resource: impl Into<String>) -> Self {
        Self {
            resource: resource.into(),
        }
    }

    pub fn rollback(&self) -> Result<()> {
        Err(TransactionError::SavepointsUnsupported {
            resource: self.resource.clone(),
        })
    }
}

/// The rollback handle for one participant.
pub(crate) enum SavepointHandle {
    Resource(Box<dyn ResourceSavepoint>),
    Abort(AbortSavepoint),
    NoRollback(NoRollbackSavepoint),
}

/// Open savepoints of one transaction, keyed by index.
#[derive(Default)]
pub(crate) struct SavepointTable {
    last_index: u64,
    entries: BTreeMap<u64, Vec<SavepointHandle>>,
}

impl SavepointTable {
    pub fn last_index(&self) -> u64 {
        self.last_index
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, index: u64) -> bool {
        self.entries.contains_key(&index)
    }

    pub fn insert(&mut self, handles: Vec<SavepointHandle>) -> u64 {
        self.last_index += 1;
        self.entries.insert(self.last_index, handles);
        self.last_index
    }

    /// Adds an abort handle for a newly joined participant to every open
    /// savepoint.
    pub fn add_joined(&mut self, resource: &SharedResource) {
        let handle = AbortSavepoint::new(resource.clone());
        for handles in self.entries.values_mut() {
            handles.push(SavepointHandle::Abort(handle.clone()));
        }
    }

    /// Forgets every savepoint taken after `index`.
    pub fn invalidate_after(&mut self, index: u64) -> usize {
        let later = self.entries.split_off(&(index + 1));
        later.len()
    }

    pub fn invalidate_all(&mut self) {
        self.entries.clear();
    }

    pub fn take(&mut self, index: u64) -> Option<Vec<SavepointHandle>> {
        self.entries.remove(&index)
    }

    pub fn restore(&mut self, index: u64, handles: Vec<SavepointHandle>) {
        self.entries.insert(index, handles);
    }
}
