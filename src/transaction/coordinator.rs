//! The transaction coordinator.
//!
//! A [`Transaction`] collects participants and drives them through the
//! two-phase commit protocol:
//!
//! 1. before-commit hooks, then `before_completion` on synchronizers
//! 2. `tpc_begin` and `commit` on every participant, in `sort_key` order
//! 3. `tpc_vote` on every participant
//! 4. `tpc_finish` on every participant that voted
//!
//! A failure in step 1 aborts every joined participant. A failure in steps
//! 2-3 aborts the participants that already started. Either leaves the
//! transaction in `CommitFailed`. A failure in step 4 cannot be
//! undone and is reported without cleanup.

use std::any::Any;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::Mutex;

use super::error::{Result, TransactionError};
use super::hooks::HookQueues;
use super::id::{TransactionId, TransactionIdGenerator};
use super::manager::TransactionOwner;
use super::meta::TransactionMeta;
use super::state::{ParticipantPhase, TransactionStatus};
use crate::resource::manager::identity;
use crate::resource::{
    Capability, LegacyAdapter, MultiObjectResourceAdapter, SharedLegacyManager, SharedObject,
    SharedResource,
};
use crate::savepoint::{NoRollbackSavepoint, Savepoint, SavepointHandle, SavepointTable};
use crate::synchronizer::{Synchronizer, SynchronizerId, SynchronizerRegistry};

const LOG_TARGET: &str = "txn";

pub struct Transaction {
    meta: TransactionMeta,
    status: TransactionStatus,
    /// Participants in join order.
    resources: Vec<SharedResource>,
    /// Object adapters keyed by the identity of their object manager.
    adapters: HashMap<usize, Arc<Mutex<MultiObjectResourceAdapter>>>,
    /// Participants that voted during the last commit attempt.
    voted: HashSet<usize>,
    savepoints: SavepointTable,
    hooks: HookQueues,
    synchronizers: SynchronizerRegistry,
    failure: Option<String>,
    data: HashMap<usize, Box<dyn Any + Send>>,
    owner: Option<Arc<dyn TransactionOwner>>,
}

impl Transaction {
    /// Creates a standalone transaction with an id from the global generator.
    pub fn new() -> Self {
        Self::with_parts(
            TransactionIdGenerator::global().next(),
            SynchronizerRegistry::new(),
            None,
        )
    }

    /// Creates a transaction whose completion is reported to `owner`.
    pub fn with_parts(
        id: TransactionId,
        synchronizers: SynchronizerRegistry,
        owner: Option<Arc<dyn TransactionOwner>>,
    ) -> Self {
        log::debug!(target: LOG_TARGET, "{}: new transaction", id);
        Self {
            meta: TransactionMeta::new(id),
            status: TransactionStatus::Active,
            resources: Vec::new(),
            adapters: HashMap::new(),
            voted: HashSet::new(),
            savepoints: SavepointTable::default(),
            hooks: HookQueues::default(),
            synchronizers,
            failure: None,
            data: HashMap::new(),
            owner,
        }
    }

    /// Id of this transaction.
    pub fn id(&self) -> TransactionId {
        self.meta.id
    }

    /// Current status.
    pub fn status(&self) -> TransactionStatus {
        self.status
    }

    /// Metadata passed to every participant call.
    pub fn meta(&self) -> &TransactionMeta {
        &self.meta
    }

    /// The recorded user, `"path user"` or empty.
    pub fn user(&self) -> &str {
        &self.meta.user
    }

    /// Notes joined by newlines.
    pub fn description(&self) -> &str {
        &self.meta.description
    }

    /// Extended info set through [`Transaction::set_extended_info`].
    pub fn extension(&self) -> &std::collections::BTreeMap<String, String> {
        &self.meta.extension
    }

    /// Participants currently joined, in join order.
    pub fn resources(&self) -> &[SharedResource] {
        &self.resources
    }

    /// Index given to the most recent savepoint, 0 if none was taken.
    pub fn savepoint_index(&self) -> u64 {
        self.savepoints.last_index()
    }

    /// Number of savepoints that can still be rolled back to.
    pub fn open_savepoints(&self) -> usize {
        self.savepoints.len()
    }

    /// Number of participants that voted in the last commit attempt.
    pub fn voted_count(&self) -> usize {
        self.voted.len()
    }

    /// True once [`Transaction::doom`] was called.
    pub fn is_doomed(&self) -> bool {
        self.status.is_doomed()
    }

    /// The failure that poisoned this transaction, if any.
    pub fn failure(&self) -> Option<&str> {
        self.failure.as_deref()
    }

    /// Hooks still queued to run before the next commit.
    pub fn before_commit_hook_count(&self) -> usize {
        self.hooks.before_commit_len()
    }

    /// Hooks still queued to run after the next commit.
    pub fn after_commit_hook_count(&self) -> usize {
        self.hooks.after_commit_len()
    }

    /// Marks the transaction so that it can only be aborted.
    pub fn doom(&mut self) -> Result<()> {
        match self.status {
            TransactionStatus::Doomed => Ok(()),
            TransactionStatus::Active => {
                self.status = TransactionStatus::Doomed;
                Ok(())
            }
            other => Err(TransactionError::InvalidState(format!(
                "non-doomable: transaction is {}",
                other
            ))),
        }
    }

    /// Adds a participant. Joining the same participant twice has no effect.
    pub fn join(&mut self, resource: SharedResource) -> Result<()> {
        self.ensure_accepts_work()?;

        let key = identity(&resource);
        if self.resources.iter().any(|r| identity(r) == key) {
            return Ok(());
        }
        if !self.savepoints.is_empty() {
            // Rolling back to an earlier savepoint must undo this join.
            self.savepoints.add_joined(&resource);
        }
        log::debug!(target: LOG_TARGET, "{}: join {}", self.meta.id, resource.lock().name());
        self.resources.push(resource);
        Ok(())
    }

    /// Joins a single-phase manager through a [`LegacyAdapter`] and returns
    /// the participant that was joined.
    pub fn join_legacy(&mut self, manager: SharedLegacyManager) -> Result<SharedResource> {
        let adapter: SharedResource = Arc::new(Mutex::new(LegacyAdapter::new(manager)));
        self.join(adapter.clone())?;
        Ok(adapter)
    }

    /// Registers an object with the participant for its manager, creating
    /// and joining that participant on first use.
    pub fn register(&mut self, obj: SharedObject) -> Result<()> {
        let manager = obj
            .jar()
            .ok_or_else(|| TransactionError::InvalidState("Register with no manager".to_string()))?;
        self.ensure_accepts_work()?;

        let key = identity(&manager);
        if let Some(adapter) = self.adapters.get(&key) {
            if !adapter.lock().add_object(obj) {
                return Err(TransactionError::InvalidState(
                    "object already registered".to_string(),
                ));
            }
            return Ok(());
        }

        let mut adapter = MultiObjectResourceAdapter::new(manager);
        adapter.add_object(obj);
        let adapter = Arc::new(Mutex::new(adapter));
        self.join(adapter.clone())?;
        self.adapters.insert(key, adapter);
        Ok(())
    }

    /// Queues a hook that runs before the next commit.
    pub fn add_before_commit_hook<F>(&mut self, hook: F)
    where
        F: FnMut() -> anyhow::Result<()> + Send + 'static,
    {
        self.hooks.add_before_commit(Box::new(hook));
    }

    /// The hook receives `true` if the commit succeeded.
    pub fn add_after_commit_hook<F>(&mut self, hook: F)
    where
        F: FnMut(bool) -> anyhow::Result<()> + Send + 'static,
    {
        self.hooks.add_after_commit(Box::new(hook));
    }

    /// Registers a synchronizer for this transaction only.
    pub fn register_synch(&mut self, synch: &Arc<dyn Synchronizer>) -> SynchronizerId {
        self.synchronizers.register(synch)
    }

    pub fn unregister_synch(&mut self, id: SynchronizerId) -> bool {
        self.synchronizers.unregister(id)
    }

    pub fn synch_count(&self) -> usize {
        self.synchronizers.len()
    }

    /// Sets the user as `"/ {user_name}"`.
    pub fn set_user(&mut self, user_name: &str) {
        self.meta.set_user(user_name, "/");
    }

    pub fn set_user_with_path(&mut self, user_name: &str, path: &str) {
        self.meta.set_user(user_name, path);
    }

    pub fn set_extended_info(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.meta.extension.insert(name.into(), value.into());
    }

    /// Appends a line to the description.
    pub fn note(&mut self, text: &str) {
        self.meta.note(text);
    }

    /// Stores `value` under the identity of `key` until the transaction ends.
    pub fn set_data<K: ?Sized, V: Any + Send>(&mut self, key: &K, value: V) {
        self.data.insert(data_key(key), Box::new(value));
    }

    /// Looks up data stored with [`Transaction::set_data`].
    pub fn data<K: ?Sized, V: Any>(&self, key: &K) -> Result<&V> {
        self.data
            .get(&data_key(key))
            .and_then(|value| (**value).downcast_ref::<V>())
            .ok_or(TransactionError::DataNotFound)
    }

    /// Runs the two-phase commit.
    pub fn commit(&mut self) -> Result<()> {
        match self.status {
            TransactionStatus::Active => {}
            TransactionStatus::Doomed => return Err(TransactionError::Doomed),
            TransactionStatus::CommitFailed => return Err(self.prior_failure()),
            other => {
                return Err(TransactionError::InvalidState(format!(
                    "cannot commit a transaction that is {}",
                    other
                )))
            }
        }

        let primary = match self.run_commit() {
            Ok(()) => {
                self.status = TransactionStatus::Committed;
                None
            }
            Err(e) => Some(self.record_failure(e)),
        };
        let success = primary.is_none();

        let after_completion = self.notify_after_completion();

        let id = self.meta.id;
        self.hooks.run_after_commit(success, |position, e| {
            log::error!(
                target: LOG_TARGET,
                "{}: Error in after commit hook #{}: {:#}",
                id,
                position,
                e
            );
        });

        self.release();
        log::debug!(target: LOG_TARGET, "{}: commit ({})", id, self.status);

        match primary {
            Some(e) => Err(e),
            None => after_completion.map_err(TransactionError::Synchronizer),
        }
    }

    /// Aborts every participant. The transaction can be reused afterwards.
    ///
    /// Hooks are left queued for a later commit.
    pub fn abort(&mut self) -> Result<()> {
        let meta = &self.meta;
        let mut deferred = self
            .synchronizers
            .for_each(|s| s.before_completion(meta))
            .err()
            .map(TransactionError::Synchronizer);

        self.savepoints.invalidate_all();

        for rm in &self.resources {
            let mut rm = rm.lock();
            if let Err(e) = rm.abort(&self.meta) {
                log::error!(
                    target: LOG_TARGET,
                    "{}: Failed to abort resource manager: {}: {:#}",
                    self.meta.id,
                    rm.name(),
                    e
                );
                deferred.get_or_insert(TransactionError::Resource(e));
            }
        }

        if let Err(e) = self.notify_after_completion() {
            deferred.get_or_insert(TransactionError::Synchronizer(e));
        }

        self.release();
        if !self.status.is_failed() {
            self.status = TransactionStatus::Active;
        }
        log::debug!(target: LOG_TARGET, "{}: abort", self.meta.id);

        match deferred {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Takes a savepoint covering every joined participant.
    ///
    /// With `optimistic` set, participants without savepoint support are
    /// tolerated as if they declared [`Capability::Optimistic`].
    pub fn savepoint(&mut self, optimistic: bool) -> Result<Savepoint> {
        self.ensure_accepts_work()?;

        let handles = match self.collect_savepoint_handles(optimistic) {
            Ok(handles) => handles,
            Err(e) => return Err(self.record_failure(e)),
        };
        let index = self.savepoints.insert(handles);
        log::debug!(target: LOG_TARGET, "{}: savepoint {}", self.meta.id, index);
        Ok(Savepoint::new(index, self.meta.id))
    }

    /// True if `savepoint` belongs to this transaction and can be rolled back to.
    pub fn is_savepoint_valid(&self, savepoint: &Savepoint) -> bool {
        savepoint.transaction() == self.meta.id && self.savepoints.contains(savepoint.index())
    }

    /// Drops the rollback state held for `savepoint`. Other savepoints stay
    /// valid. Returns false if it was already gone.
    pub fn release_savepoint(&mut self, savepoint: &Savepoint) -> bool {
        if !self.is_savepoint_valid(savepoint) {
            return false;
        }
        self.savepoints.take(savepoint.index()).is_some()
    }

    /// Rolls back to `savepoint`, invalidating every later savepoint and
    /// removing participants that joined after it.
    pub fn rollback(&mut self, savepoint: &Savepoint) -> Result<()> {
        if self.status.is_failed() {
            return Err(self.prior_failure());
        }
        let index = savepoint.index();
        if !self.is_savepoint_valid(savepoint) {
            return Err(TransactionError::InvalidSavepointRollback(format!(
                "savepoint {} of {} was invalidated",
                index,
                savepoint.transaction()
            )));
        }

        let discarded = self.savepoints.invalidate_after(index);
        let mut handles = self.savepoints.take(index).unwrap_or_default();

        let mut outcome = Ok(());
        let mut unjoined = Vec::new();
        for handle in handles.iter_mut() {
            let result = match handle {
                SavepointHandle::Resource(sp) => sp.rollback().map_err(TransactionError::Resource),
                SavepointHandle::Abort(sp) => match sp.rollback(&self.meta) {
                    Ok(()) => {
                        unjoined.push(sp.resource().clone());
                        Ok(())
                    }
                    Err(e) => Err(TransactionError::Resource(e)),
                },
                SavepointHandle::NoRollback(sp) => sp.rollback(),
            };
            if let Err(e) = result {
                outcome = Err(e);
                break;
            }
        }

        // Aborted participants are gone; a rejoin adds a fresh handle.
        handles.retain(|h| !matches!(h, SavepointHandle::Abort(_)));
        self.savepoints.restore(index, handles);
        for resource in &unjoined {
            self.unjoin(resource);
        }

        log::debug!(
            target: LOG_TARGET,
            "{}: rollback to savepoint {} ({} later savepoints discarded)",
            self.meta.id,
            index,
            discarded
        );
        outcome.map_err(|e| self.record_failure(e))
    }

    fn run_commit(&mut self) -> Result<()> {
        if let Err(e) = self.before_commit() {
            // Staged changes survive unless every participant is aborted.
            self.abort_resources();
            return Err(e);
        }

        self.status = TransactionStatus::Committing;
        self.commit_resources()
    }

    /// Hooks and `before_completion`, run before any participant is touched.
    fn before_commit(&mut self) -> Result<()> {
        self.hooks
            .run_before_commit()
            .map_err(TransactionError::Hook)?;

        self.savepoints.invalidate_all();

        let meta = &self.meta;
        self.synchronizers
            .for_each(|s| s.before_completion(meta))
            .map_err(TransactionError::Synchronizer)
    }

    /// Calls `abort` on every joined participant, logging failures.
    fn abort_resources(&self) {
        for rm in &self.resources {
            let mut rm = rm.lock();
            if let Err(e) = rm.abort(&self.meta) {
                log::error!(
                    target: LOG_TARGET,
                    "{}: Error in abort() on manager {}: {:#}",
                    self.meta.id,
                    rm.name(),
                    e
                );
            }
        }
    }

    fn commit_resources(&mut self) -> Result<()> {
        let mut participants = self.resources.clone();
        participants.sort_by_cached_key(|rm| rm.lock().sort_key());

        let mut phases = vec![ParticipantPhase::NotStarted; participants.len()];
        self.voted.clear();

        if let Err(e) = self.prepare(&participants, &mut phases) {
            self.cleanup(&participants, &phases);
            return Err(TransactionError::Resource(e));
        }

        for (rm, phase) in participants.iter().zip(phases.iter_mut()) {
            if *phase != ParticipantPhase::Voted {
                continue;
            }
            let mut rm = rm.lock();
            if let Err(e) = rm.tpc_finish(&self.meta) {
                log::error!(
                    target: LOG_TARGET,
                    "{}: CRITICAL: A storage error occurred during the second phase of the \
                     two-phase commit. Resources may be in an inconsistent state. {}: {:#}",
                    self.meta.id,
                    rm.name(),
                    e
                );
                return Err(TransactionError::Resource(e));
            }
            *phase = ParticipantPhase::Finished;
        }
        Ok(())
    }

    /// Begin, stage and vote, recording each participant's progress.
    fn prepare(
        &mut self,
        participants: &[SharedResource],
        phases: &mut [ParticipantPhase],
    ) -> anyhow::Result<()> {
        for (rm, phase) in participants.iter().zip(phases.iter_mut()) {
            rm.lock().tpc_begin(&self.meta)?;
            *phase = ParticipantPhase::Begun;
        }
        for (rm, phase) in participants.iter().zip(phases.iter_mut()) {
            let mut rm = rm.lock();
            rm.commit(&self.meta)?;
            *phase = ParticipantPhase::Committed;
            log::debug!(target: LOG_TARGET, "{}: commit {}", self.meta.id, rm.name());
        }
        for (rm, phase) in participants.iter().zip(phases.iter_mut()) {
            rm.lock().tpc_vote(&self.meta)?;
            *phase = ParticipantPhase::Voted;
            self.voted.insert(identity(rm));
        }
        Ok(())
    }

    /// Best-effort cleanup after a failed first phase or vote. Errors are
    /// logged and do not replace the original failure.
    fn cleanup(&self, participants: &[SharedResource], phases: &[ParticipantPhase]) {
        for (rm, phase) in participants.iter().zip(phases) {
            if !phase.needs_abort() {
                continue;
            }
            let mut rm = rm.lock();
            if let Err(e) = rm.abort(&self.meta) {
                log::error!(
                    target: LOG_TARGET,
                    "{}: Error in abort() on manager {}: {:#}",
                    self.meta.id,
                    rm.name(),
                    e
                );
            }
        }
        for (rm, phase) in participants.iter().zip(phases) {
            if !phase.needs_tpc_abort() {
                continue;
            }
            let mut rm = rm.lock();
            if let Err(e) = rm.tpc_abort(&self.meta) {
                log::error!(
                    target: LOG_TARGET,
                    "{}: Error in tpc_abort() on manager {}: {:#}",
                    self.meta.id,
                    rm.name(),
                    e
                );
            }
        }
    }

    /// Tells every synchronizer and participant that the transaction is
    /// over. Everyone is notified; the first error is returned.
    fn notify_after_completion(&mut self) -> anyhow::Result<()> {
        let meta = &self.meta;
        let mut first_error = self
            .synchronizers
            .for_each_deferred(|s| s.after_completion(meta))
            .err();

        for rm in &self.resources {
            if let Err(e) = rm.lock().after_completion(meta) {
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => {
                log::error!(
                    target: LOG_TARGET,
                    "{}: Error in after_completion: {:#}",
                    self.meta.id,
                    e
                );
                Err(e)
            }
            None => Ok(()),
        }
    }

    fn collect_savepoint_handles(&self, optimistic: bool) -> Result<Vec<SavepointHandle>> {
        let mut handles = Vec::with_capacity(self.resources.len());
        for rm in &self.resources {
            let mut rm = rm.lock();
            let handle = match rm.capability() {
                Capability::SavepointAware => {
                    SavepointHandle::Resource(rm.savepoint().map_err(TransactionError::Resource)?)
                }
                Capability::Optimistic => {
                    SavepointHandle::NoRollback(NoRollbackSavepoint::new(rm.name()))
                }
                Capability::Transactional if optimistic => {
                    SavepointHandle::NoRollback(NoRollbackSavepoint::new(rm.name()))
                }
                Capability::Transactional => {
                    return Err(TransactionError::SavepointsUnsupported { resource: rm.name() })
                }
            };
            handles.push(handle);
        }
        Ok(handles)
    }

    fn unjoin(&mut self, resource: &SharedResource) {
        let key = identity(resource);
        self.resources.retain(|r| identity(r) != key);
        self.adapters.retain(|_, adapter| identity(&*adapter) != key);
    }

    /// Clears per-unit-of-work state and hands the transaction back to its
    /// owner.
    ///
    /// The owner is told only once; a transaction reused after that is no
    /// longer tracked by it.
    fn release(&mut self) {
        self.resources.clear();
        self.adapters.clear();
        self.data.clear();
        self.savepoints.invalidate_all();
        if let Some(owner) = self.owner.take() {
            if let Err(e) = owner.free(self.meta.id) {
                log::error!(target: LOG_TARGET, "{}: {}", self.meta.id, e);
            }
        }
    }

    fn ensure_accepts_work(&self) -> Result<()> {
        if self.status.is_failed() {
            return Err(self.prior_failure());
        }
        if !self.status.accepts_work() {
            return Err(TransactionError::InvalidState(format!(
                "expected txn status {} or {}, but it's {}",
                TransactionStatus::Active,
                TransactionStatus::Doomed,
                self.status
            )));
        }
        Ok(())
    }

    /// Poisons the transaction with `error` and returns it for propagation.
    fn record_failure(&mut self, error: TransactionError) -> TransactionError {
        self.status = TransactionStatus::CommitFailed;
        self.failure = Some(error.traceback());
        error
    }

    fn prior_failure(&self) -> TransactionError {
        TransactionError::Failed {
            traceback: self.failure.clone().unwrap_or_default(),
        }
    }

    pub(crate) fn notify_new_transaction(&mut self) {
        let meta = &self.meta;
        if let Err(e) = self.synchronizers.for_each_deferred(|s| s.new_transaction(meta)) {
            log::error!(target: LOG_TARGET, "{}: Error in new_transaction: {:#}", meta.id, e);
        }
    }
}

impl Default for Transaction {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Transaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.meta.id)
            .field("status", &self.status)
            .field("resources", &self.resources.len())
            .field("savepoint_index", &self.savepoints.last_index())
            .finish()
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if !self.resources.is_empty() {
            if let Err(e) = self.abort() {
                log::error!(target: LOG_TARGET, "{}: abort on drop: {:#}", self.meta.id, e);
            }
        }
    }
}

fn data_key<K: ?Sized>(key: &K) -> usize {
    key as *const K as *const () as usize
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::{shared, Call, MemoryStore};

    fn store(name: &str) -> Arc<Mutex<MemoryStore>> {
        shared(MemoryStore::new(name))
    }

    #[test]
    fn test_fresh_transaction() {
        let txn = Transaction::new();
        assert_eq!(txn.status(), TransactionStatus::Active);
        assert!(txn.resources().is_empty());
        assert_eq!(txn.savepoint_index(), 0);
        assert!(txn.failure().is_none());
    }

    #[test]
    fn test_empty_commit() {
        let mut txn = Transaction::new();
        txn.commit().unwrap();
        assert_eq!(txn.status(), TransactionStatus::Committed);
    }

    #[test]
    fn test_commit_twice_is_rejected() {
        let mut txn = Transaction::new();
        txn.commit().unwrap();
        assert!(matches!(txn.commit(), Err(TransactionError::InvalidState(_))));
    }

    #[test]
    fn test_doom_state_machine() {
        let mut txn = Transaction::new();
        txn.doom().unwrap();
        txn.doom().unwrap();
        assert!(txn.is_doomed());

        let rm = store("a");
        txn.join(rm.clone()).unwrap();
        assert!(matches!(txn.commit(), Err(TransactionError::Doomed)));
        assert!(rm.lock().journal().is_empty());

        txn.abort().unwrap();
        assert_eq!(txn.status(), TransactionStatus::Active);
        assert_eq!(rm.lock().journal(), vec![Call::Abort]);
    }

    #[test]
    fn test_doom_after_commit_fails() {
        let mut txn = Transaction::new();
        txn.commit().unwrap();
        assert!(matches!(txn.doom(), Err(TransactionError::InvalidState(_))));
    }

    #[test]
    fn test_join_after_commit_fails() {
        let mut txn = Transaction::new();
        txn.commit().unwrap();
        assert!(matches!(
            txn.join(store("a")),
            Err(TransactionError::InvalidState(_))
        ));
    }

    #[test]
    fn test_join_is_idempotent() {
        let mut txn = Transaction::new();
        let rm: SharedResource = store("a");
        txn.join(rm.clone()).unwrap();
        txn.join(rm).unwrap();
        assert_eq!(txn.resources().len(), 1);
    }

    #[test]
    fn test_commit_publishes_and_clears() {
        let mut txn = Transaction::new();
        let rm = store("a");
        rm.lock().set("k", "v");
        txn.join(rm.clone()).unwrap();

        txn.commit().unwrap();

        assert_eq!(rm.lock().committed().get("k"), Some(&"v".to_string()));
        assert!(txn.resources().is_empty());
        assert_eq!(txn.voted_count(), 1);
    }

    #[test]
    fn test_vote_failure_poisons() {
        let mut txn = Transaction::new();
        let good = store("a");
        let bad = shared(MemoryStore::new("b").fail_on(Call::TpcVote));
        txn.join(good.clone()).unwrap();
        txn.join(bad.clone()).unwrap();

        let err = txn.commit().unwrap_err();
        assert_eq!(err.to_string(), "b failed in tpc_vote");
        assert_eq!(txn.status(), TransactionStatus::CommitFailed);

        // "a" voted, so it is only told the commit is over.
        assert_eq!(
            good.lock().journal(),
            vec![Call::TpcBegin, Call::Commit, Call::TpcVote, Call::TpcAbort]
        );
        assert_eq!(
            bad.lock().journal(),
            vec![Call::TpcBegin, Call::Commit, Call::TpcVote, Call::Abort, Call::TpcAbort]
        );

        for result in [txn.commit(), txn.join(store("c")), txn.savepoint(false).map(|_| ())] {
            match result {
                Err(TransactionError::Failed { traceback }) => {
                    assert!(traceback.contains("b failed in tpc_vote"))
                }
                other => panic!("expected poisoned transaction, got {:?}", other),
            }
        }
    }

    #[test]
    fn test_data_scoped_to_transaction() {
        let mut txn = Transaction::new();
        let key = String::from("cache");
        let other = 5u32;

        assert!(matches!(
            txn.data::<_, u32>(&key),
            Err(TransactionError::DataNotFound)
        ));
        txn.set_data(&key, 42u32);
        assert_eq!(*txn.data::<_, u32>(&key).unwrap(), 42);
        assert!(txn.data::<_, String>(&key).is_err());
        assert!(txn.data::<_, u32>(&other).is_err());

        txn.commit().unwrap();
        assert!(matches!(
            txn.data::<_, u32>(&key),
            Err(TransactionError::DataNotFound)
        ));
    }

    #[test]
    fn test_metadata() {
        let mut txn = Transaction::new();
        txn.set_user("alice");
        txn.note("first");
        txn.note(" second ");
        txn.set_extended_info("request", "17");

        assert_eq!(txn.user(), "/ alice");
        assert_eq!(txn.description(), "first\nsecond");
        assert_eq!(txn.extension().get("request"), Some(&"17".to_string()));

        txn.set_user_with_path("bob", "/admin");
        assert_eq!(txn.meta().user, "/admin bob");
    }

    #[test]
    fn test_drop_aborts_joined_resources() {
        let rm = store("a");
        rm.lock().set("k", "v");
        {
            let mut txn = Transaction::new();
            txn.join(rm.clone()).unwrap();
        }
        assert_eq!(rm.lock().journal(), vec![Call::Abort]);
        assert_eq!(rm.lock().get("k"), None);
    }

    struct Veto;

    impl Synchronizer for Veto {
        fn before_completion(&self, _txn: &TransactionMeta) -> anyhow::Result<()> {
            anyhow::bail!("vetoed")
        }

        fn after_completion(&self, _txn: &TransactionMeta) -> anyhow::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_before_completion_failure_aborts_participants() {
        let rm = store("a");
        rm.lock().set("k", "v");
        let veto: Arc<dyn Synchronizer> = Arc::new(Veto);
        let mut txn = Transaction::new();
        txn.register_synch(&veto);
        txn.join(rm.clone()).unwrap();

        assert!(matches!(txn.commit(), Err(TransactionError::Synchronizer(_))));
        assert_eq!(txn.status(), TransactionStatus::CommitFailed);
        assert_eq!(rm.lock().journal(), vec![Call::Abort]);
        assert_eq!(rm.lock().get("k"), None);
    }

    #[derive(Default)]
    struct CountingOwner {
        freed: Mutex<Vec<TransactionId>>,
    }

    impl TransactionOwner for CountingOwner {
        fn free(&self, id: TransactionId) -> Result<()> {
            self.freed.lock().push(id);
            Ok(())
        }
    }

    #[test]
    fn test_owner_is_freed_once() {
        let owner = Arc::new(CountingOwner::default());
        let id = TransactionIdGenerator::global().next();
        let mut txn = Transaction::with_parts(
            id,
            SynchronizerRegistry::new(),
            Some(owner.clone() as Arc<dyn TransactionOwner>),
        );
        txn.join(store("a")).unwrap();
        txn.add_before_commit_hook(|| anyhow::bail!("no"));

        assert!(txn.commit().is_err());
        txn.abort().unwrap();

        assert_eq!(*owner.freed.lock(), vec![id]);
    }
}
