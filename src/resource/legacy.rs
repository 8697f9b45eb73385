//! Adapts single-phase managers to the two-phase protocol.

use anyhow::Result;

use super::manager::{ResourceManager, SharedLegacyManager};
use crate::transaction::TransactionMeta;

/// Maps `tpc_vote` to `prepare` and `tpc_finish` to `commit`.
/// `tpc_begin` and the staging `commit` do nothing.
pub struct LegacyAdapter {
    manager: SharedLegacyManager,
    prepared: bool,
}

impl LegacyAdapter {
    /// Wraps a single-phase manager.
    pub fn new(manager: SharedLegacyManager) -> Self {
        Self {
            manager,
            prepared: false,
        }
    }

    /// The wrapped manager.
    pub fn manager(&self) -> &SharedLegacyManager {
        &self.manager
    }
}

impl ResourceManager for LegacyAdapter {
    fn sort_key(&self) -> String {
        self.manager.lock().sort_key()
    }

    fn tpc_begin(&mut self, _txn: &TransactionMeta) -> Result<()> {
        self.prepared = false;
        Ok(())
    }

    fn commit(&mut self, _txn: &TransactionMeta) -> Result<()> {
        Ok(())
    }

    fn tpc_vote(&mut self, txn: &TransactionMeta) -> Result<()> {
        self.manager.lock().prepare(txn)?;
        self.prepared = true;
        Ok(())
    }

    fn tpc_finish(&mut self, txn: &TransactionMeta) -> Result<()> {
        self.manager.lock().commit(txn)?;
        self.prepared = false;
        Ok(())
    }

    fn abort(&mut self, txn: &TransactionMeta) -> Result<()> {
        self.manager.lock().abort(txn)
    }

    fn tpc_abort(&mut self, txn: &TransactionMeta) -> Result<()> {
        if self.prepared {
            self.prepared = false;
            return Ok(());
        }
        self.manager.lock().abort(txn)
    }

    fn name(&self) -> String {
        format!("legacy {}", self.sort_key())
    }
}
