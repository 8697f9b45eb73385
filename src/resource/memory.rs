//! In-memory key/value participant.
//!
//! Keeps a committed and an uncommitted copy of its data. Writes go to the
//! uncommitted copy and become visible in the committed copy once
//! `tpc_finish` runs. Failures can be injected per protocol call, which
//! makes the store useful for exercising coordinator error paths.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use anyhow::{bail, Result};
use parking_lot::Mutex;

use super::manager::{Capability, ResourceManager, ResourceSavepoint};
use crate::transaction::TransactionMeta;

/// A protocol call on a participant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, clap::ValueEnum)]
pub enum Call {
    TpcBegin,
    Commit,
    TpcVote,
    TpcFinish,
    Abort,
    TpcAbort,
    Savepoint,
    Rollback,
}

impl Call {
    /// Protocol name of the call.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TpcBegin => "tpc_begin",
            Self::Commit => "commit",
            Self::TpcVote => "tpc_vote",
            Self::TpcFinish => "tpc_finish",
            Self::Abort => "abort",
            Self::TpcAbort => "tpc_abort",
            Self::Savepoint => "savepoint",
            Self::Rollback => "rollback",
        }
    }
}

impl std::fmt::Display for Call {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TpcPhase {
    Idle,
    Begun,
    Voted,
}

#[derive(Debug)]
struct StoreState {
    committed: BTreeMap<String, String>,
    uncommitted: BTreeMap<String, String>,
    phase: TpcPhase,
    failures: HashSet<Call>,
    journal: Vec<Call>,
}

impl StoreState {
    fn record(&mut self, name: &str, call: Call) -> Result<()> {
        self.journal.push(call);
        if self.failures.contains(&call) {
            bail!("{} failed in {}", name, call);
        }
        Ok(())
    }

    fn reset(&mut self) {
        self.uncommitted = self.committed.clone();
        self.phase = TpcPhase::Idle;
    }
}

pub struct MemoryStore {
    name: String,
    capability: Capability,
    state: Arc<Mutex<StoreState>>,
}

impl MemoryStore {
    /// Creates an empty savepoint-aware store. `name` is also its sort key.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            capability: Capability::SavepointAware,
            state: Arc::new(Mutex::new(StoreState {
                committed: BTreeMap::new(),
                uncommitted: BTreeMap::new(),
                phase: TpcPhase::Idle,
                failures: HashSet::new(),
                journal: Vec::new(),
            })),
        }
    }

    /// Declares what the store reports as its savepoint support.
    pub fn with_capability(mut self, capability: Capability) -> Self {
        self.capability = capability;
        self
    }

    /// Makes every future `call` on this store fail.
    pub fn fail_on(self, call: Call) -> Self {
        self.state.lock().failures.insert(call);
        self
    }

    /// Turns the injected failure for `call` on or off.
    pub fn set_failure(&self, call: Call, fail: bool) {
        let mut state = self.state.lock();
        if fail {
            state.failures.insert(call);
        } else {
            state.failures.remove(&call);
        }
    }

    /// Reads the working copy.
    pub fn get(&self, key: &str) -> Option<String> {
        self.state.lock().uncommitted.get(key).cloned()
    }

    pub fn set(&self, key: impl Into<String>, value: impl Into<String>) {
        self.state.lock().uncommitted.insert(key.into(), value.into());
    }

    pub fn remove(&self, key: &str) -> Option<String> {
        self.state.lock().uncommitted.remove(key)
    }

    /// Data published by the last successful `tpc_finish`.
    pub fn committed(&self) -> BTreeMap<String, String> {
        self.state.lock().committed.clone()
    }

    pub fn uncommitted(&self) -> BTreeMap<String, String> {
        self.state.lock().uncommitted.clone()
    }

    /// Protocol calls received so far, in order.
    pub fn journal(&self) -> Vec<Call> {
        self.state.lock().journal.clone()
    }

    pub fn clear_journal(&self) {
        self.state.lock().journal.clear();
    }
}

impl ResourceManager for MemoryStore {
    fn sort_key(&self) -> String {
        self.name.clone()
    }

    fn tpc_begin(&mut self, _txn: &TransactionMeta) -> Result<()> {
        let mut state = self.state.lock();
        state.record(&self.name, Call::TpcBegin)?;
        if state.phase != TpcPhase::Idle {
            bail!("{}: tpc_begin called during two-phase commit", self.name);
        }
        state.phase = TpcPhase::Begun;
        Ok(())
    }

    fn commit(&mut self, _txn: &TransactionMeta) -> Result<()> {
        let mut state = self.state.lock();
        state.record(&self.name, Call::Commit)?;
        if state.phase != TpcPhase::Begun {
            bail!("{}: commit called outside the first phase", self.name);
        }
        Ok(())
    }

    fn tpc_vote(&mut self, _txn: &TransactionMeta) -> Result<()> {
        let mut state = self.state.lock();
        state.record(&self.name, Call::TpcVote)?;
        if state.phase != TpcPhase::Begun {
            bail!("{}: tpc_vote called outside the first phase", self.name);
        }
        state.phase = TpcPhase::Voted;
        Ok(())
    }

    fn tpc_finish(&mut self, _txn: &TransactionMeta) -> Result<()> {
        let mut state = self.state.lock();
        state.record(&self.name, Call::TpcFinish)?;
        if state.phase != TpcPhase::Voted {
            bail!("{}: tpc_finish called before voting", self.name);
        }
        state.committed = state.uncommitted.clone();
        state.phase = TpcPhase::Idle;
        Ok(())
    }

    fn abort(&mut self, _txn: &TransactionMeta) -> Result<()> {
        let mut state = self.state.lock();
        state.record(&self.name, Call::Abort)?;
        state.uncommitted = state.committed.clone();
        Ok(())
    }

    fn tpc_abort(&mut self, _txn: &TransactionMeta) -> Result<()> {
        let mut state = self.state.lock();
        state.record(&self.name, Call::TpcAbort)?;
        if state.phase == TpcPhase::Idle {
            bail!("{}: tpc_abort called outside two-phase commit", self.name);
        }
        state.reset();
        Ok(())
    }

    fn capability(&self) -> Capability {
        self.capability
    }

    fn savepoint(&mut self) -> Result<Box<dyn ResourceSavepoint>> {
        let mut state = self.state.lock();
        state.record(&self.name, Call::Savepoint)?;
        Ok(Box::new(MemorySavepoint {
            name: self.name.clone(),
            snapshot: state.uncommitted.clone(),
            state: Arc::clone(&self.state),
        }))
    }

    fn name(&self) -> String {
        self.name.clone()
    }
}

/// Restores the uncommitted data captured when the savepoint was taken.
struct MemorySavepoint {
    name: String,
    snapshot: BTreeMap<String, String>,
    state: Arc<Mutex<StoreState>>,
}

impl ResourceSavepoint for MemorySavepoint {
    fn rollback(&mut self) -> Result<()> {
        let mut state = self.state.lock();
        state.record(&self.name, Call::Rollback)?;
        state.uncommitted = self.snapshot.clone();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transaction::TransactionId;

    fn meta() -> TransactionMeta {
        TransactionMeta::new(TransactionId::new(1))
    }

    #[test]
    fn test_full_commit_publishes_data() {
        let mut store = MemoryStore::new("store");
        store.set("name", "bob");
        assert!(store.committed().is_empty());

        let meta = meta();
        store.tpc_begin(&meta).unwrap();
        store.commit(&meta).unwrap();
        store.tpc_vote(&meta).unwrap();
        store.tpc_finish(&meta).unwrap();

        assert_eq!(store.committed().get("name"), Some(&"bob".to_string()));
        assert_eq!(
            store.journal(),
            vec![Call::TpcBegin, Call::Commit, Call::TpcVote, Call::TpcFinish]
        );
    }

    #[test]
    fn test_abort_discards_uncommitted() {
        let mut store = MemoryStore::new("store");
        store.set("a", "1");
        store.abort(&meta()).unwrap();
        assert_eq!(store.get("a"), None);
    }

    #[test]
    fn test_savepoint_rollback_restores_snapshot() {
        let mut store = MemoryStore::new("store");
        store.set("a", "1");
        let mut sp = store.savepoint().unwrap();
        store.set("a", "2");
        store.set("b", "3");

        sp.rollback().unwrap();
        assert_eq!(store.get("a"), Some("1".to_string()));
        assert_eq!(store.get("b"), None);
    }

    #[test]
    fn test_injected_failure() {
        let mut store = MemoryStore::new("store").fail_on(Call::TpcVote);
        let meta = meta();
        store.tpc_begin(&meta).unwrap();
        let err = store.tpc_vote(&meta).unwrap_err();
        assert_eq!(err.to_string(), "store failed in tpc_vote");

        store.set_failure(Call::TpcVote, false);
        store.tpc_vote(&meta).unwrap();
    }

    #[test]
    fn test_out_of_order_calls_rejected() {
        let mut store = MemoryStore::new("store");
        let meta = meta();
        assert!(store.tpc_finish(&meta).is_err());
        assert!(store.tpc_abort(&meta).is_err());
    }
}
