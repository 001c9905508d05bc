//! Per-key async critical sections.
//!
//! Check-then-act sequences such as "is this version free? then publish it"
//! run under the lock for the package name (or user name), so two tasks in
//! this process cannot interleave them. Locks are created on demand and
//! dropped again once nobody holds or waits on them.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::trace;

/// Held for the duration of one critical section.
pub type KeyGuard = OwnedMutexGuard<()>;

#[derive(Debug, Default)]
pub struct KeyedLocks {
    locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl KeyedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn table(&self) -> MutexGuard<'_, HashMap<String, Arc<AsyncMutex<()>>>> {
        self.locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Wait for exclusive access to `key`.
    pub async fn lock(&self, key: &str) -> KeyGuard {
        let lock = {
            let mut table = self.table();
            // Only the table itself references idle locks
            table.retain(|_, lock| Arc::strong_count(lock) > 1);
            Arc::clone(table.entry(key.to_string()).or_default())
        };
        trace!(key = %key, "Acquiring keyed lock");
        lock.lock_owned().await
    }

    /// Number of keys currently locked or awaited.
    pub fn active(&self) -> usize {
        self.table()
            .values()
            .filter(|lock| Arc::strong_count(lock) > 1)
            .count()
    }
}
