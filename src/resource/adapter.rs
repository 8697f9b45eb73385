//! Groups objects that share one manager into a single participant.

use anyhow::Result;

use super::manager::{ResourceManager, SharedObject, SharedObjectManager};
use crate::transaction::TransactionMeta;

pub struct MultiObjectResourceAdapter {
    manager: SharedObjectManager,
    objects: Vec<SharedObject>,
    committed_count: usize,
}

impl MultiObjectResourceAdapter {
    /// Creates an adapter with no objects yet.
    pub fn new(manager: SharedObjectManager) -> Self {
        Self {
            manager,
            objects: Vec::new(),
            committed_count: 0,
        }
    }

    /// The object manager every registered object belongs to.
    pub fn manager(&self) -> &SharedObjectManager {
        &self.manager
    }

    /// Registered objects, in registration order.
    pub fn objects(&self) -> &[SharedObject] {
        &self.objects
    }

    /// Returns false if this exact object is already registered.
    pub fn add_object(&mut self, obj: SharedObject) -> bool {
        let id = super::manager::identity(&obj);
        if self
            .objects
            .iter()
            .any(|existing| super::manager::identity(existing) == id)
        {
            return false;
        }
        self.objects.push(obj);
        true
    }

    /// Objects staged by `commit` so far.
    pub fn committed_count(&self) -> usize {
        self.committed_count
    }
}

impl std::fmt::Debug for MultiObjectResourceAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MultiObjectResourceAdapter")
            .field("sort_key", &self.manager.lock().sort_key())
            .field("objects", &self.objects.len())
            .finish()
    }
}

impl ResourceManager for MultiObjectResourceAdapter {
    fn sort_key(&self) -> String {
        self.manager.lock().sort_key()
    }

    fn tpc_begin(&mut self, txn: &TransactionMeta) -> Result<()> {
        self.manager.lock().tpc_begin(txn)
    }

    fn commit(&mut self, txn: &TransactionMeta) -> Result<()> {
        let mut manager = self.manager.lock();
        for obj in &self.objects {
            manager.commit(obj.as_ref(), txn)?;
            self.committed_count += 1;
        }
        Ok(())
    }

    fn tpc_vote(&mut self, txn: &TransactionMeta) -> Result<()> {
        self.manager.lock().tpc_vote(txn)
    }

    fn tpc_finish(&mut self, txn: &TransactionMeta) -> Result<()> {
        self.manager.lock().tpc_finish(txn)
    }

    fn abort(&mut self, txn: &TransactionMeta) -> Result<()> {
        let mut manager = self.manager.lock();
        let mut first_error = None;
        for obj in &self.objects {
            if let Err(e) = manager.abort(obj.as_ref(), txn) {
                log::error!(target: "txn", "{}: failed to abort object: {}: {:#}", txn.id, obj.hint(), e);
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn tpc_abort(&mut self, txn: &TransactionMeta) -> Result<()> {
        self.manager.lock().tpc_abort(txn)
    }

    fn name(&self) -> String {
        format!("objects of {}", self.sort_key())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::manager::{ObjectManager, Persistent};
    use crate::transaction::TransactionId;
    use anyhow::bail;
    use parking_lot::Mutex;
    use std::sync::Arc;

    #[derive(Default)]
    struct Jar {
        calls: Vec<String>,
        broken_abort: Option<String>,
    }

    impl ObjectManager for Jar {
        fn sort_key(&self) -> String {
            "jar".to_string()
        }
        fn tpc_begin(&mut self, _txn: &TransactionMeta) -> Result<()> {
            self.calls.push("tpc_begin".to_string());
            Ok(())
        }
        fn commit(&mut self, obj: &dyn Persistent, _txn: &TransactionMeta) -> Result<()> {
            self.calls.push(format!("commit {}", obj.hint()));
            Ok(())
        }
        fn tpc_vote(&mut self, _txn: &TransactionMeta) -> Result<()> {
            self.calls.push("tpc_vote".to_string());
            Ok(())
        }
        fn tpc_finish(&mut self, _txn: &TransactionMeta) -> Result<()> {
            self.calls.push("tpc_finish".to_string());
            Ok(())
        }
        fn abort(&mut self, obj: &dyn Persistent, _txn: &TransactionMeta) -> Result<()> {
            self.calls.push(format!("abort {}", obj.hint()));
            if self.broken_abort.as_deref() == Some(obj.hint().as_str()) {
                bail!("cannot abort {}", obj.hint());
            }
            Ok(())
        }
        fn tpc_abort(&mut self, _txn: &TransactionMeta) -> Result<()> {
            self.calls.push("tpc_abort".to_string());
            Ok(())
        }
    }

    struct Obj(&'static str);

    impl Persistent for Obj {
        fn jar(&self) -> Option<SharedObjectManager> {
            None
        }
        fn hint(&self) -> String {
            self.0.to_string()
        }
    }

    fn setup(jar: Jar) -> (Arc<Mutex<Jar>>, MultiObjectResourceAdapter) {
        let jar = Arc::new(Mutex::new(jar));
        let mut adapter = MultiObjectResourceAdapter::new(jar.clone());
        adapter.add_object(Arc::new(Obj("a")));
        adapter.add_object(Arc::new(Obj("b")));
        adapter.add_object(Arc::new(Obj("c")));
        (jar, adapter)
    }

    #[test]
    fn test_tpc_calls_once_commit_per_object() {
        let (jar, mut adapter) = setup(Jar::default());
        let meta = TransactionMeta::new(TransactionId::new(1));

        adapter.tpc_begin(&meta).unwrap();
        adapter.commit(&meta).unwrap();
        adapter.tpc_vote(&meta).unwrap();
        adapter.tpc_finish(&meta).unwrap();

        assert_eq!(
            jar.lock().calls,
            vec!["tpc_begin", "commit a", "commit b", "commit c", "tpc_vote", "tpc_finish"]
        );
        assert_eq!(adapter.committed_count(), 3);
        assert_eq!(adapter.sort_key(), "jar");
    }

    #[test]
    fn test_abort_continues_after_failure() {
        let (jar, mut adapter) = setup(Jar {
            broken_abort: Some("b".to_string()),
            ..Jar::default()
        });
        let meta = TransactionMeta::new(TransactionId::new(1));

        let err = adapter.abort(&meta).unwrap_err();
        assert_eq!(err.to_string(), "cannot abort b");
        assert_eq!(jar.lock().calls, vec!["abort a", "abort b", "abort c"]);
    }

    #[test]
    fn test_add_object_rejects_duplicates() {
        let jar: SharedObjectManager = Arc::new(Mutex::new(Jar::default()));
        let mut adapter = MultiObjectResourceAdapter::new(jar);
        let obj: Arc<dyn Persistent> = Arc::new(Obj("a"));

        assert!(adapter.add_object(obj.clone()));
        assert!(!adapter.add_object(obj));
        assert_eq!(adapter.objects().len(), 1);
    }
}
