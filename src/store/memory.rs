//! In-memory entitlement store
//!
//! Used by tests and single-process development setups.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::RwLock;

use super::{normalize_email, EntitlementStore, RecordPatch, StoreError, StoreResult, WriteMode};
use crate::entitlement::{EntitlementRecord, UserEntitlement};

/// Map-backed entitlement store
#[derive(Clone, Default)]
pub struct InMemoryEntitlementStore {
    inner: Arc<InMemoryInner>,
}

#[derive(Default)]
struct InMemoryInner {
    records: RwLock<HashMap<String, EntitlementRecord>>,
    processed_events: RwLock<HashSet<String>>,
}

impl InMemoryEntitlementStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records
    pub async fn len(&self) -> usize {
        self.inner.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait::async_trait]
impl EntitlementStore for InMemoryEntitlementStore {
    async fn get(&self, user_id: &str) -> StoreResult<Option<EntitlementRecord>> {
        Ok(self.inner.records.read().await.get(user_id).cloned())
    }

    async fn set(&self, user_id: &str, patch: &RecordPatch, mode: WriteMode) -> StoreResult<()> {
        let mut records = self.inner.records.write().await;
        let record = patch.resolve(records.get(user_id).cloned(), mode);
        records.insert(user_id.to_string(), record);
        Ok(())
    }

    async fn find_by_email(&self, email: &str) -> StoreResult<Option<UserEntitlement>> {
        let email = normalize_email(email);
        let records = self.inner.records.read().await;

        let mut matches: Vec<UserEntitlement> = records
            .iter()
            .filter(|(_, r)| r.email.as_deref() == Some(email.as_str()))
            .map(|(user_id, record)| UserEntitlement {
                user_id: user_id.clone(),
                record: record.clone(),
            })
            .collect();

        match matches.len() {
            0 => Ok(None),
            1 => Ok(matches.pop()),
            count => Err(StoreError::AmbiguousEmail { email, count }),
        }
    }

    async fn is_event_processed(&self, event_id: &str) -> StoreResult<bool> {
        Ok(self.inner.processed_events.read().await.contains(event_id))
    }

    async fn mark_event_processed(&self, event_id: &str, _event_type: &str) -> StoreResult<()> {
        self.inner
            .processed_events
            .write()
            .await
            .insert(event_id.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_and_find_by_email() {
        let store = InMemoryEntitlementStore::new();
        let patch = RecordPatch {
            email: Some(Some("Reader@example.com".to_string())),
            ..Default::default()
        };

        store.set("user-1", &patch, WriteMode::Merge).await.unwrap();

        let found = store.find_by_email("reader@example.com").await.unwrap();
        assert_eq!(found.map(|f| f.user_id), Some("user-1".to_string()));
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_ambiguous_email() {
        let store = InMemoryEntitlementStore::new();
        let patch = RecordPatch {
            email: Some(Some("shared@example.com".to_string())),
            ..Default::default()
        };

        store.set("user-1", &patch, WriteMode::Merge).await.unwrap();
        store.set("user-2", &patch, WriteMode::Merge).await.unwrap();

        assert!(matches!(
            store.find_by_email("shared@example.com").await,
            Err(StoreError::AmbiguousEmail { count: 2, .. })
        ));
    }
}
