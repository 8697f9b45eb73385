//! Listeners notified around transaction completion.
//!
//! Registration never keeps a listener alive: the registry holds `Weak`
//! references, and entries whose listener was dropped are pruned the next
//! time the registry is walked. Entries can also be removed explicitly with
//! the id returned at registration.

use std::sync::{Arc, Weak};

use anyhow::Result;

use crate::transaction::TransactionMeta;

pub trait Synchronizer: Send + Sync {
    fn before_completion(&self, txn: &TransactionMeta) -> Result<()>;

    fn after_completion(&self, txn: &TransactionMeta) -> Result<()>;

    /// Called when a transaction manager starts a new transaction.
    fn new_transaction(&self, _txn: &TransactionMeta) -> Result<()> {
        Ok(())
    }
}

/// Handle returned by registration, used to unregister.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SynchronizerId {
    slot: usize,
    generation: u64,
}

struct Slot {
    generation: u64,
    synch: Option<Weak<dyn Synchronizer>>,
}

/// Index-addressed table of weakly held synchronizers.
#[derive(Default)]
pub struct SynchronizerRegistry {
    slots: Vec<Slot>,
    free: Vec<usize>,
    order: Vec<usize>,
}

impl SynchronizerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `synch`. Registering the same listener twice returns its
    /// existing id.
    pub fn register(&mut self, synch: &Arc<dyn Synchronizer>) -> SynchronizerId {
        if let Some(id) = self.find(synch) {
            return id;
        }
        let weak = Arc::downgrade(synch);
        let slot = match self.free.pop() {
            Some(slot) => {
                let entry = &mut self.slots[slot];
                entry.generation += 1;
                entry.synch = Some(weak);
                slot
            }
            None => {
                self.slots.push(Slot {
                    generation: 0,
                    synch: Some(weak),
                });
                self.slots.len() - 1
            }
        };
        self.order.push(slot);
        SynchronizerId {
            slot,
            generation: self.slots[slot].generation,
        }
    }

    /// Returns false if `id` was already unregistered.
    pub fn unregister(&mut self, id: SynchronizerId) -> bool {
        match self.slots.get(id.slot) {
            Some(entry) if entry.generation == id.generation && entry.synch.is_some() => {
                self.release(id.slot);
                true
            }
            _ => false,
        }
    }

    /// Unregisters by listener identity.
    pub fn unregister_synch(&mut self, synch: &Arc<dyn Synchronizer>) -> bool {
        match self.find(synch) {
            Some(id) => self.unregister(id),
            None => false,
        }
    }

    /// Number of live listeners.
    pub fn len(&self) -> usize {
        self.order
            .iter()
            .filter(|slot| {
                self.slots[**slot]
                    .synch
                    .as_ref()
                    .is_some_and(|weak| weak.strong_count() > 0)
            })
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Live listeners in registration order. Dead entries are pruned.
    pub fn live(&mut self) -> Vec<Arc<dyn Synchronizer>> {
        let mut live = Vec::with_capacity(self.order.len());
        let mut dead = Vec::new();
        for &slot in &self.order {
            match self.slots[slot].synch.as_ref().and_then(Weak::upgrade) {
                Some(synch) => live.push(synch),
                None => dead.push(slot),
            }
        }
        for slot in dead {
            self.release(slot);
        }
        live
    }

    /// Calls `f` on every listener, stopping at the first error.
    pub fn for_each<F>(&mut self, mut f: F) -> Result<()>
    where
        F: FnMut(&dyn Synchronizer) -> Result<()>,
    {
        for synch in self.live() {
            f(synch.as_ref())?;
        }
        Ok(())
    }

    /// Calls `f` on every listener and returns the first error after all ran.
    pub fn for_each_deferred<F>(&mut self, mut f: F) -> Result<()>
    where
        F: FnMut(&dyn Synchronizer) -> Result<()>,
    {
        let mut first_error = None;
        for synch in self.live() {
            if let Err(e) = f(synch.as_ref()) {
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Copies every live listener into a new registry.
    pub fn snapshot(&mut self) -> SynchronizerRegistry {
        let mut copy = SynchronizerRegistry::new();
        for synch in self.live() {
            copy.register(&synch);
        }
        copy
    }

    fn find(&self, synch: &Arc<dyn Synchronizer>) -> Option<SynchronizerId> {
        let target = Arc::as_ptr(synch) as *const () as usize;
        self.order.iter().find_map(|&slot| {
            let entry = &self.slots[slot];
            let weak = entry.synch.as_ref()?;
            (weak.as_ptr() as *const () as usize == target && weak.strong_count() > 0).then_some(
                SynchronizerId {
                    slot,
                    generation: entry.generation,
                },
            )
        })
    }

    fn release(&mut self, slot: usize) {
        self.slots[slot].synch = None;
        self.order.retain(|s| *s != slot);
        self.free.push(slot);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::bail;
    use parking_lot::Mutex;

    struct Recorder {
        name: &'static str,
        log: Arc<Mutex<Vec<String>>>,
        fail: bool,
    }

    impl Synchronizer for Recorder {
        fn before_completion(&self, _txn: &TransactionMeta) -> Result<()> {
            self.log.lock().push(format!("before {}", self.name));
            Ok(())
        }

        fn after_completion(&self, _txn: &TransactionMeta) -> Result<()> {
            self.log.lock().push(format!("after {}", self.name));
            if self.fail {
                bail!("{} failed", self.name);
            }
            Ok(())
        }
    }

    fn recorder(
        name: &'static str,
        log: &Arc<Mutex<Vec<String>>>,
        fail: bool,
    ) -> Arc<dyn Synchronizer> {
        Arc::new(Recorder {
            name,
            log: Arc::clone(log),
            fail,
        })
    }

    #[test]
    fn test_register_and_unregister() {
        let log = Arc::new(Mutex::new(vec![]));
        let mut registry = SynchronizerRegistry::new();
        let a = recorder("a", &log, false);
        let b = recorder("b", &log, false);

        let id_a = registry.register(&a);
        registry.register(&b);
        assert_eq!(registry.register(&a), id_a);
        assert_eq!(registry.len(), 2);

        assert!(registry.unregister(id_a));
        assert!(!registry.unregister(id_a));
        assert_eq!(registry.len(), 1);

        assert!(registry.unregister_synch(&b));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_registry_does_not_keep_listeners_alive() {
        let log = Arc::new(Mutex::new(vec![]));
        let mut registry = SynchronizerRegistry::new();
        let a = recorder("a", &log, false);
        registry.register(&a);
        {
            let b = recorder("b", &log, false);
            registry.register(&b);
            assert_eq!(registry.len(), 2);
        }
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.live().len(), 1);
    }

    #[test]
    fn test_stale_id_after_slot_reuse() {
        let log = Arc::new(Mutex::new(vec![]));
        let mut registry = SynchronizerRegistry::new();
        let a = recorder("a", &log, false);
        let b = recorder("b", &log, false);

        let id_a = registry.register(&a);
        registry.unregister(id_a);
        let id_b = registry.register(&b);

        assert_ne!(id_a, id_b);
        assert!(!registry.unregister(id_a));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_deferred_notification_reaches_everyone() {
        let log = Arc::new(Mutex::new(vec![]));
        let mut registry = SynchronizerRegistry::new();
        let a = recorder("a", &log, true);
        let b = recorder("b", &log, false);
        registry.register(&a);
        registry.register(&b);

        let meta = TransactionMeta::new(crate::transaction::TransactionId::new(1));
        let err = registry
            .for_each_deferred(|s| s.after_completion(&meta))
            .unwrap_err();

        assert_eq!(err.to_string(), "a failed");
        assert_eq!(*log.lock(), vec!["after a", "after b"]);
    }
}
