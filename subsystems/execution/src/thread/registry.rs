//! # Thread Registry
//!
//! Index of every allocated, not yet released thread control block.

use super::Thread;
use crate::{ExecError, ExecResult, ThreadId};
use alloc::collections::BTreeMap;
use alloc::sync::Arc;
#[cfg(test)]
use alloc::vec::Vec;
use spin::RwLock;

/// Thread registry
pub struct ThreadRegistry {
    /// All threads by ID
    threads: RwLock<BTreeMap<ThreadId, Arc<Thread>>>,
}

impl ThreadRegistry {
    /// Create a new registry
    pub const fn new() -> Self {
        Self {
            threads: RwLock::new(BTreeMap::new()),
        }
    }

    /// Register a new thread
    pub fn register(&self, thread: Arc<Thread>) -> ExecResult<()> {
        let id = thread.id();

        let mut threads = self.threads.write();
        if threads.contains_key(&id) {
            return Err(ExecError::AlreadyExists);
        }

        threads.insert(id, thread);
        Ok(())
    }

    /// Unregister a thread
    pub fn unregister(&self, id: ThreadId) -> ExecResult<Arc<Thread>> {
        self.threads.write().remove(&id).ok_or(ExecError::ThreadNotFound)
    }

    /// Get a thread by ID
    pub fn get(&self, id: ThreadId) -> Option<Arc<Thread>> {
        self.threads.read().get(&id).cloned()
    }

    /// Every registered thread, by ascending ID
    #[cfg(test)]
    pub(crate) fn all(&self) -> Vec<Arc<Thread>> {
        self.threads.read().values().cloned().collect()
    }

    /// Get thread count
    pub fn count(&self) -> usize {
        self.threads.read().len()
    }
}

impl Default for ThreadRegistry {
    fn default() -> Self {
        Self::new()
    }
}
