//! Per-session mutual exclusion.
//!
//! Every pipeline run holds its session's guard from the first store read to
//! the last checkpoint, so concurrent runs on one key cannot interleave
//! writes to `interview_question_list`. Entries are dropped once idle.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

type LockTable = Arc<Mutex<HashMap<String, Arc<AsyncMutex<()>>>>>;

#[derive(Debug, Clone, Default)]
pub struct SessionLocks {
    table: LockTable,
}

/// Held for the duration of a run; released on drop, including on failure.
#[derive(Debug)]
pub struct SessionGuard {
    // Field order matters: the mutex is released before the entry is pruned.
    _guard: OwnedMutexGuard<()>,
    _claim: Claim,
}

/// Interest in a key's table entry, held by waiting and running callers
/// alike. Dropping the last claim removes the entry.
#[derive(Debug)]
struct Claim {
    key: String,
    table: LockTable,
}

impl Drop for Claim {
    fn drop(&mut self) {
        let mut table = self.table.lock().unwrap_or_else(|e| e.into_inner());
        // Only the table holds the lock: nobody runs or waits on it.
        if table
            .get(&self.key)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            table.remove(&self.key);
        }
    }
}

impl SessionLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits for exclusive use of `key`. A caller that gives up while
    /// waiting (the future is dropped) leaves no entry behind.
    pub async fn acquire(&self, key: &str) -> SessionGuard {
        let claim = Claim {
            key: key.to_string(),
            table: self.table.clone(),
        };
        let lock = {
            let mut table = self.table.lock().unwrap_or_else(|e| e.into_inner());
            table.entry(key.to_string()).or_default().clone()
        };
        let guard = lock.lock_owned().await;
        SessionGuard {
            _guard: guard,
            _claim: claim,
        }
    }

    /// Number of sessions with a live or pending run.
    #[cfg(test)]
    pub fn active(&self) -> usize {
        self.table.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}
