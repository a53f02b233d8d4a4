//! At most one reconcile per resource key
//!
//! The kube-runtime scheduler already avoids running the same object twice,
//! but dependency watches and the periodic resync reach the same key through
//! different paths. Every reconcile takes the key's lock first.

use std::sync::Arc;

use dashmap::DashMap;
use o2_common::ResourceKey;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Async mutex per resource key
#[derive(Debug, Default)]
pub struct KeyedLocks {
    locks: DashMap<ResourceKey, Arc<Mutex<()>>>,
}

impl KeyedLocks {
    /// Create an empty lock table
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `key`
    pub async fn lock(&self, key: &ResourceKey) -> OwnedMutexGuard<()> {
        let lock = Arc::clone(
            self.locks
                .entry(key.clone())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .value(),
        );
        lock.lock_owned().await
    }

    /// Drop the lock of a released resource when nobody holds or waits on it
    pub fn forget(&self, key: &ResourceKey) {
        self.locks
            .remove_if(key, |_, lock| Arc::strong_count(lock) == 1);
    }

    /// Number of keys with a lock
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    /// Whether no lock exists
    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use o2_common::ResourceKind;

    fn key(name: &str) -> ResourceKey {
        ResourceKey::new(ResourceKind::Pipeline, "obs", name)
    }

    /// Story: Holders of the same key never overlap
    #[tokio::test]
    async fn story_same_key_serializes() {
        let locks = Arc::new(KeyedLocks::new());
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let (locks, active, peak) =
                    (Arc::clone(&locks), Arc::clone(&active), Arc::clone(&peak));
                tokio::spawn(async move {
                    let _guard = locks.lock(&key("ingest")).await;
                    let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    active.fetch_sub(1, Ordering::SeqCst);
                })
            })
            .collect();
        for t in tasks {
            t.await.unwrap();
        }
        assert_eq!(peak.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_different_keys_do_not_block() {
        let locks = KeyedLocks::new();
        let _a = locks.lock(&key("a")).await;
        let b = tokio::time::timeout(Duration::from_millis(50), locks.lock(&key("b"))).await;
        assert!(b.is_ok());
    }

    #[tokio::test]
    async fn test_forget_keeps_held_lock() {
        let locks = KeyedLocks::new();
        let guard = locks.lock(&key("a")).await;
        locks.forget(&key("a"));
        assert_eq!(locks.len(), 1);
        drop(guard);
        locks.forget(&key("a"));
        assert!(locks.is_empty());
    }
}
