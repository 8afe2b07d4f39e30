//! Per-key async locks.
//!
//! Score insert → count → decide → mute must not interleave for the same
//! member, or two concurrent messages can both read a stale count.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::moderation::model::ChatUserKey;

/// Table of lazily created locks, one per `ChatUserKey`.
#[derive(Default)]
pub struct KeyedLocks {
    locks: Mutex<HashMap<ChatUserKey, Arc<Mutex<()>>>>,
}

/// Held lock for one key. Idle entries are dropped from the table on release.
pub struct KeyGuard<'a> {
    owner: &'a KeyedLocks,
    key: ChatUserKey,
    guard: Option<OwnedMutexGuard<()>>,
}

impl KeyedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self, key: ChatUserKey) -> KeyGuard<'_> {
        let lock = {
            let mut locks = self.locks.lock().await;
            Arc::clone(locks.entry(key).or_default())
        };
        let guard = lock.lock_owned().await;
        KeyGuard {
            owner: self,
            key,
            guard: Some(guard),
        }
    }

    /// Number of keys currently tracked.
    pub async fn len(&self) -> usize {
        self.locks.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    async fn release(&self, key: ChatUserKey) {
        let mut locks = self.locks.lock().await;
        // Only the table holds it → nobody is waiting
        if locks.get(&key).is_some_and(|l| Arc::strong_count(l) == 1) {
            locks.remove(&key);
        }
    }
}

impl KeyGuard<'_> {
    /// Release the lock and prune the table entry if nobody else wants it.
    pub async fn unlock(mut self) {
        self.guard.take();
        self.owner.release(self.key).await;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn same_key_is_serialized() {
        let locks = Arc::new(KeyedLocks::new());
        let inside = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));
        let key = ChatUserKey::new(1, 1);

        let mut handles = Vec::new();
        for _ in 0..8 {
            let locks = Arc::clone(&locks);
            let inside = Arc::clone(&inside);
            let max_seen = Arc::clone(&max_seen);
            handles.push(tokio::spawn(async move {
                let guard = locks.lock(key).await;
                let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                max_seen.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                inside.fetch_sub(1, Ordering::SeqCst);
                guard.unlock().await;
            }));
        }
        for h in handles {
            h.await.unwrap();
        }

        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
        assert!(locks.is_empty().await);
    }

    #[tokio::test]
    async fn different_keys_do_not_block() {
        let locks = KeyedLocks::new();
        let a = locks.lock(ChatUserKey::new(1, 1)).await;
        let b = tokio::time::timeout(Duration::from_secs(1), locks.lock(ChatUserKey::new(1, 2)))
            .await
            .expect("second key should lock immediately");
        assert_eq!(locks.len().await, 2);
        a.unlock().await;
        b.unlock().await;
        assert!(locks.is_empty().await);
    }
}
