//! Per-key async mutexes that disappear once nobody holds or waits on them.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

type LockMap = Arc<Mutex<HashMap<String, Arc<AsyncMutex<()>>>>>;

#[derive(Debug, Default)]
pub struct KeyedLocks {
    inner: LockMap,
}

/// Held for the duration of one store operation on a key.
#[derive(Debug)]
pub struct KeyGuard {
    key: String,
    map: LockMap,
    guard: OwnedMutexGuard<()>,
}

impl KeyedLocks {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `key`.
    pub async fn lock(&self, key: &str) -> KeyGuard {
        let entry = {
            let mut map = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(map.entry(key.to_string()).or_default())
        };

        KeyGuard {
            key: key.to_string(),
            map: Arc::clone(&self.inner),
            guard: entry.lock_owned().await,
        }
    }

    /// Number of keys currently locked or waited on.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Drop for KeyGuard {
    fn drop(&mut self) {
        let mut map = self.map.lock().unwrap_or_else(PoisonError::into_inner);
        // One reference lives in the map and one in this guard; anything more is a waiter.
        if Arc::strong_count(OwnedMutexGuard::mutex(&self.guard)) <= 2 {
            map.remove(&self.key);
        }
    }
}
