//! The contract transaction participants implement.

use std::sync::Arc;

use anyhow::{bail, Result};
use parking_lot::Mutex;

use crate::transaction::TransactionMeta;

/// How a participant takes part in savepoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    /// Plain two-phase participant with no savepoint support.
    Transactional,
    /// Produces its own rollback handles through `savepoint()`.
    SavepointAware,
    /// Has no savepoint support, but does nothing irreversible before
    /// `tpc_finish`, so leaving it alone on rollback is tolerated.
    Optimistic,
}

/// A participant-level rollback point.
pub trait ResourceSavepoint: Send {
    fn rollback(&mut self) -> Result<()>;
}

/// A participant in the two-phase commit protocol.
///
/// The coordinator calls these methods in a fixed order:
/// `tpc_begin`, `commit`, `tpc_vote`, `tpc_finish` on success, or
/// `abort` / `tpc_abort` when something went wrong.
pub trait ResourceManager: Send {
    /// Ordering key. Participants commit in ascending key order.
    fn sort_key(&self) -> String;

    fn tpc_begin(&mut self, txn: &TransactionMeta) -> Result<()>;

    /// Stage the changes made during the transaction.
    fn commit(&mut self, txn: &TransactionMeta) -> Result<()>;

    /// Make sure `tpc_finish` cannot fail.
    fn tpc_vote(&mut self, txn: &TransactionMeta) -> Result<()>;

    /// Make the staged changes durable.
    fn tpc_finish(&mut self, txn: &TransactionMeta) -> Result<()>;

    /// Throw away changes made outside of the two-phase protocol.
    fn abort(&mut self, txn: &TransactionMeta) -> Result<()>;

    /// Abandon a two-phase commit that already started.
    fn tpc_abort(&mut self, txn: &TransactionMeta) -> Result<()>;

    fn capability(&self) -> Capability {
        Capability::Transactional
    }

    /// Only called when `capability()` is `SavepointAware`.
    fn savepoint(&mut self) -> Result<Box<dyn ResourceSavepoint>> {
        bail!("{} does not support savepoints", self.name())
    }

    /// Called once the transaction completed, whatever the outcome.
    fn after_completion(&mut self, _txn: &TransactionMeta) -> Result<()> {
        Ok(())
    }

    /// Name used in log messages and errors.
    fn name(&self) -> String {
        self.sort_key()
    }
}

/// A participant shared between its owner and the transactions it joins.
pub type SharedResource = Arc<Mutex<dyn ResourceManager>>;

/// Wraps a participant for joining.
pub fn shared<R: ResourceManager + 'static>(resource: R) -> Arc<Mutex<R>> {
    Arc::new(Mutex::new(resource))
}

/// Identity of a shared value, independent of its contents.
pub(crate) fn identity<T: ?Sized>(value: &Arc<T>) -> usize {
    Arc::as_ptr(value) as *const () as usize
}

/// A manager for individually registered objects.
///
/// The transaction groups every object with the same manager into one
/// participant, so the `tpc_*` methods are called once per manager while
/// `commit` and `abort` are called once per object.
pub trait ObjectManager: Send {
    fn sort_key(&self) -> String;
    fn tpc_begin(&mut self, txn: &TransactionMeta) -> Result<()>;
    fn commit(&mut self, obj: &dyn Persistent, txn: &TransactionMeta) -> Result<()>;
    fn tpc_vote(&mut self, txn: &TransactionMeta) -> Result<()>;
    fn tpc_finish(&mut self, txn: &TransactionMeta) -> Result<()>;
    fn abort(&mut self, obj: &dyn Persistent, txn: &TransactionMeta) -> Result<()>;
    fn tpc_abort(&mut self, txn: &TransactionMeta) -> Result<()>;
}

pub type SharedObjectManager = Arc<Mutex<dyn ObjectManager>>;

/// An object that records which manager stores it.
pub trait Persistent: Send + Sync {
    /// The manager responsible for storing this object, if any.
    fn jar(&self) -> Option<SharedObjectManager>;

    /// Short description for log messages.
    fn hint(&self) -> String {
        "object".to_string()
    }
}

pub type SharedObject = Arc<dyn Persistent>;

/// A single-phase manager that only knows `prepare`, `commit` and `abort`.
pub trait LegacyDataManager: Send {
    fn sort_key(&self) -> String;
    fn prepare(&mut self, txn: &TransactionMeta) -> Result<()>;
    fn commit(&mut self, txn: &TransactionMeta) -> Result<()>;
    fn abort(&mut self, txn: &TransactionMeta) -> Result<()>;
}

pub type SharedLegacyManager = Arc<Mutex<dyn LegacyDataManager>>;
