//! Before- and after-commit hook queues.

use anyhow::Result;

pub type BeforeCommitHook = Box<dyn FnMut() -> Result<()> + Send>;

/// Receives `true` if the commit succeeded.
pub type AfterCommitHook = Box<dyn FnMut(bool) -> Result<()> + Send>;

#[derive(Default)]
pub(crate) struct HookQueues {
    before_commit: Vec<BeforeCommitHook>,
    after_commit: Vec<AfterCommitHook>,
}

impl HookQueues {
    pub fn add_before_commit(&mut self, hook: BeforeCommitHook) {
        self.before_commit.push(hook);
    }

    pub fn add_after_commit(&mut self, hook: AfterCommitHook) {
        self.after_commit.push(hook);
    }

    pub fn before_commit_len(&self) -> usize {
        self.before_commit.len()
    }

    pub fn after_commit_len(&self) -> usize {
        self.after_commit.len()
    }

    /// Runs before-commit hooks in order. The first error stops the run and
    /// leaves the queue in place; the queue is emptied only when all succeed.
    pub fn run_before_commit(&mut self) -> Result<()> {
        for hook in self.before_commit.iter_mut() {
            hook()?;
        }
        self.before_commit.clear();
        Ok(())
    }

    /// Runs every after-commit hook and empties the queue. Errors are handed
    /// to `on_error` with the hook's position so that the remaining hooks
    /// still run.
    pub fn run_after_commit<F>(&mut self, success: bool, mut on_error: F)
    where
        F: FnMut(usize, anyhow::Error),
    {
        for (position, mut hook) in self.after_commit.drain(..).enumerate() {
            if let Err(e) = hook(success) {
                on_error(position, e);
            }
        }
    }
}
