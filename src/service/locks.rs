//! Per-key async mutexes.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Map of lazily created async mutexes, one per key.
///
/// Entries nobody holds or waits on are pruned as the map grows, so the map
/// stays proportional to the number of contended keys.
pub struct KeyedLocks {
    inner: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

const PRUNE_THRESHOLD: usize = 1024;

impl KeyedLocks {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(HashMap::new()),
        }
    }

    /// Wait for exclusive access to `key`.
    pub async fn acquire(&self, key: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut inner = self.inner.lock().await;
            if inner.len() >= PRUNE_THRESHOLD {
                inner.retain(|_, lock| Arc::strong_count(lock) > 1);
            }
            Arc::clone(
                inner
                    .entry(key.to_string())
                    .or_insert_with(|| Arc::new(Mutex::new(()))),
            )
        };
        lock.lock_owned().await
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.len()
    }
}

impl Default for KeyedLocks {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for KeyedLocks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyedLocks").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_same_key_is_exclusive() {
        let locks = Arc::new(KeyedLocks::new());
        let inside = Arc::new(AtomicUsize::new(0));
        let max_inside = Arc::new(AtomicUsize::new(0));

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let locks = Arc::clone(&locks);
                let inside = Arc::clone(&inside);
                let max_inside = Arc::clone(&max_inside);
                tokio::spawn(async move {
                    let _guard = locks.acquire("order:o1").await;
                    let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                    max_inside.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(2)).await;
                    inside.fetch_sub(1, Ordering::SeqCst);
                })
            })
            .collect();
        futures::future::join_all(tasks).await;

        assert_eq!(max_inside.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_different_keys_do_not_block() {
        let locks = KeyedLocks::new();
        let _a = locks.acquire("user:a").await;
        let b = tokio::time::timeout(Duration::from_millis(100), locks.acquire("user:b")).await;
        assert!(b.is_ok());
    }

    #[tokio::test]
    async fn test_idle_entries_pruned() {
        let locks = KeyedLocks::new();
        for i in 0..PRUNE_THRESHOLD {
            drop(locks.acquire(&format!("k{}", i)).await);
        }
        let _held = locks.acquire("last").await;
        assert_eq!(locks.len().await, 1);
    }
}
