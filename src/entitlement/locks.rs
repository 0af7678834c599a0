//! Per-user mutual exclusion
//!
//! Read-modify-write cycles against one user's record are serialized through
//! an async mutex keyed by user id. Different users never contend.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::store::{bounded, StoreResult};

/// Entries are pruned once the table grows past this many idle users
const PRUNE_THRESHOLD: usize = 1024;

/// Table of per-user locks
#[derive(Clone, Default)]
pub struct UserLocks {
    inner: Arc<Mutex<HashMap<String, Arc<AsyncMutex<()>>>>>,
}

impl UserLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `user_id`
    pub async fn acquire(&self, user_id: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut table = self.inner.lock();
            if table.len() > PRUNE_THRESHOLD {
                // Only the table holds an idle lock
                table.retain(|_, lock| Arc::strong_count(lock) > 1);
            }
            table.entry(user_id.to_string()).or_default().clone()
        };

        lock.lock_owned().await
    }

    /// Acquire, giving up after `limit`
    ///
    /// A lock held past the store deadline is treated like a stalled store.
    pub async fn acquire_within(&self, user_id: &str, limit: Duration) -> StoreResult<OwnedMutexGuard<()>> {
        bounded(limit, async { Ok(self.acquire(user_id).await) }).await
    }

    /// Number of tracked users
    #[cfg(test)]
    fn len(&self) -> usize {
        self.inner.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::StoreError;

    #[tokio::test]
    async fn test_same_user_serializes() {
        let locks = UserLocks::new();
        let guard = locks.acquire("user-1").await;

        let contender = locks.clone();
        let blocked = tokio::time::timeout(Duration::from_millis(50), async move {
            contender.acquire("user-1").await;
        })
        .await;
        assert!(blocked.is_err());

        drop(guard);
        let _again = locks.acquire("user-1").await;
    }

    #[tokio::test]
    async fn test_acquire_within_times_out() {
        let locks = UserLocks::new();
        let _held = locks.acquire("user-1").await;

        let result = locks.acquire_within("user-1", Duration::from_millis(20)).await;
        assert!(matches!(result, Err(StoreError::Timeout(20))));
    }

    #[tokio::test]
    async fn test_different_users_do_not_contend() {
        let locks = UserLocks::new();
        let _a = locks.acquire("user-1").await;
        let b = tokio::time::timeout(Duration::from_millis(50), locks.acquire("user-2")).await;
        assert!(b.is_ok());
        assert_eq!(locks.len(), 2);
    }
}
