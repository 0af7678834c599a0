//! Document registry
//!
//! Uploaded text is addressed by an explicit document id and owned by the
//! uploading user. Nothing here is process-wide "current document" state.
//! Documents expire after a fixed lifetime; expired entries read as missing
//! and are swept on insert and by a background task.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::RwLock;
use uuid::Uuid;

/// How long an uploaded document stays readable
pub const DOCUMENT_TTL_HOURS: i64 = 24;

/// Document errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DocumentError {
    #[error("Document text is empty")]
    EmptyText,

    #[error("Document not found: {0}")]
    NotFound(Uuid),
}

/// A stored document
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredDocument {
    pub id: Uuid,
    #[serde(skip)]
    pub owner: String,
    pub title: Option<String>,
    pub text: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl StoredDocument {
    fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// In-memory documents keyed by id
#[derive(Clone)]
pub struct DocumentRegistry {
    documents: Arc<RwLock<HashMap<Uuid, StoredDocument>>>,
    ttl: ChronoDuration,
}

impl DocumentRegistry {
    pub fn new() -> Self {
        Self::with_ttl(ChronoDuration::hours(DOCUMENT_TTL_HOURS))
    }

    pub fn with_ttl(ttl: ChronoDuration) -> Self {
        Self {
            documents: Arc::new(RwLock::new(HashMap::new())),
            ttl,
        }
    }

    /// Validate text before anything is metered
    pub fn validate(text: &str) -> Result<(), DocumentError> {
        if text.trim().is_empty() {
            Err(DocumentError::EmptyText)
        } else {
            Ok(())
        }
    }

    /// Store a document for `owner`
    pub async fn insert(
        &self,
        owner: &str,
        title: Option<String>,
        text: String,
    ) -> Result<StoredDocument, DocumentError> {
        self.insert_at(owner, title, text, Utc::now()).await
    }

    pub async fn insert_at(
        &self,
        owner: &str,
        title: Option<String>,
        text: String,
        now: DateTime<Utc>,
    ) -> Result<StoredDocument, DocumentError> {
        Self::validate(&text)?;

        let document = StoredDocument {
            id: Uuid::new_v4(),
            owner: owner.to_string(),
            title: title.map(|t| t.trim().to_string()).filter(|t| !t.is_empty()),
            text,
            created_at: now,
            expires_at: now.checked_add_signed(self.ttl).unwrap_or(DateTime::<Utc>::MAX_UTC),
        };

        {
            let mut documents = self.documents.write().await;
            documents.retain(|_, doc| !doc.is_expired_at(now));
            documents.insert(document.id, document.clone());
        }

        tracing::debug!(document_id = %document.id, owner = %owner, "Document stored");
        Ok(document)
    }

    /// Fetch a document owned by `owner`
    ///
    /// Documents of other users read as missing.
    pub async fn get(&self, owner: &str, id: Uuid) -> Result<StoredDocument, DocumentError> {
        self.get_at(owner, id, Utc::now()).await
    }

    pub async fn get_at(
        &self,
        owner: &str,
        id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<StoredDocument, DocumentError> {
        self.documents
            .read()
            .await
            .get(&id)
            .filter(|doc| doc.owner == owner && !doc.is_expired_at(now))
            .cloned()
            .ok_or(DocumentError::NotFound(id))
    }

    /// Drop expired documents, returning how many were removed
    pub async fn cleanup_expired(&self) -> usize {
        self.cleanup_expired_at(Utc::now()).await
    }

    pub async fn cleanup_expired_at(&self, now: DateTime<Utc>) -> usize {
        let mut documents = self.documents.write().await;
        let before = documents.len();
        documents.retain(|_, doc| !doc.is_expired_at(now));
        let count = before - documents.len();

        if count > 0 {
            tracing::info!(count = count, "Cleaned up expired documents");
        }

        count
    }

    /// Start background cleanup task
    pub fn start_cleanup_task(self, every: std::time::Duration) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);

            loop {
                interval.tick().await;
                self.cleanup_expired().await;
            }
        })
    }

    pub async fn len(&self) -> usize {
        self.documents.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl Default for DocumentRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_documents_are_scoped_by_id() {
        let registry = DocumentRegistry::new();
        let first = registry.insert("u1", None, "first".to_string()).await.unwrap();
        let second = registry.insert("u1", None, "second".to_string()).await.unwrap();

        assert_ne!(first.id, second.id);
        assert_eq!(registry.get("u1", first.id).await.unwrap().text, "first");
        assert_eq!(registry.get("u1", second.id).await.unwrap().text, "second");
    }

    #[tokio::test]
    async fn test_only_owner_reads() {
        let registry = DocumentRegistry::new();
        let doc = registry
            .insert("u1", Some(" Notes ".to_string()), "text".to_string())
            .await
            .unwrap();
        assert_eq!(doc.title.as_deref(), Some("Notes"));

        assert_eq!(
            registry.get("u2", doc.id).await.unwrap_err(),
            DocumentError::NotFound(doc.id)
        );
    }

    #[tokio::test]
    async fn test_empty_text_rejected() {
        let registry = DocumentRegistry::new();
        assert_eq!(
            registry.insert("u1", None, "   ".to_string()).await.unwrap_err(),
            DocumentError::EmptyText
        );
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_expired_documents_read_as_missing() {
        let registry = DocumentRegistry::with_ttl(ChronoDuration::hours(1));
        let start = Utc::now();
        let doc = registry
            .insert_at("u1", None, "text".to_string(), start)
            .await
            .unwrap();
        assert_eq!(doc.expires_at, start + ChronoDuration::hours(1));

        let later = start + ChronoDuration::minutes(59);
        assert!(registry.get_at("u1", doc.id, later).await.is_ok());

        let expired = start + ChronoDuration::hours(1);
        assert_eq!(
            registry.get_at("u1", doc.id, expired).await.unwrap_err(),
            DocumentError::NotFound(doc.id)
        );
    }

    #[tokio::test]
    async fn test_cleanup_evicts_expired_documents() {
        let registry = DocumentRegistry::with_ttl(ChronoDuration::hours(1));
        let start = Utc::now();
        for i in 0..10 {
            registry
                .insert_at("u1", None, format!("doc {}", i), start)
                .await
                .unwrap();
        }
        let fresh = registry
            .insert_at("u1", None, "fresh".to_string(), start + ChronoDuration::minutes(30))
            .await
            .unwrap();

        let removed = registry
            .cleanup_expired_at(start + ChronoDuration::minutes(61))
            .await;
        assert_eq!(removed, 10);
        assert_eq!(registry.len().await, 1);
        assert!(registry
            .get_at("u1", fresh.id, start + ChronoDuration::minutes(61))
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_insert_sweeps_expired_documents() {
        let registry = DocumentRegistry::with_ttl(ChronoDuration::hours(1));
        let start = Utc::now();
        for _ in 0..5 {
            registry
                .insert_at("u1", None, "old".to_string(), start)
                .await
                .unwrap();
        }

        registry
            .insert_at("u2", None, "new".to_string(), start + ChronoDuration::hours(2))
            .await
            .unwrap();
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn test_cleanup_task_runs() {
        let registry = DocumentRegistry::with_ttl(ChronoDuration::zero());
        registry.insert("u1", None, "gone".to_string()).await.unwrap();

        let handle = registry
            .clone()
            .start_cleanup_task(std::time::Duration::from_secs(60));
        // The first tick fires immediately
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        assert!(registry.is_empty().await);
        handle.abort();
    }
}
