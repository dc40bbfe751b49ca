//! Per-resource mutual exclusion for mutating operations.
//!
//! At most one in-flight mutating operation per target domain directory and
//! per backup id. Modeled as an explicit registry keyed by resource
//! identity, owned by the manager rather than ambient global state. Read
//! operations take no locks.

use dashmap::DashMap;
use std::sync::Arc;

use crate::error::EngineError;

#[derive(Debug, Default, Clone)]
pub struct LockRegistry {
    held: Arc<DashMap<String, ()>>,
}

/// Releases its key when dropped, including on panic and early return.
#[derive(Debug)]
pub struct LockGuard {
    key: String,
    held: Arc<DashMap<String, ()>>,
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        self.held.remove(&self.key);
    }
}

impl LockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn try_acquire_domain(&self, domain: &str) -> crate::Result<LockGuard> {
        self.try_acquire(format!("domain:{domain}"), || {
            format!("another operation is in progress for domain {domain}")
        })
    }

    pub fn try_acquire_backup(&self, id: &str) -> crate::Result<LockGuard> {
        self.try_acquire(format!("backup:{id}"), || {
            format!("another operation is in progress for backup {id}")
        })
    }

    fn try_acquire(
        &self,
        key: String,
        conflict_message: impl FnOnce() -> String,
    ) -> crate::Result<LockGuard> {
        use dashmap::mapref::entry::Entry;

        match self.held.entry(key.clone()) {
            Entry::Occupied(_) => Err(EngineError::Conflict(conflict_message())),
            Entry::Vacant(slot) => {
                slot.insert(());
                Ok(LockGuard {
                    key,
                    held: self.held.clone(),
                })
            }
        }
    }
}
