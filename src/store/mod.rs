//! Entitlement store
//!
//! The single source of truth for per-user entitlement records. The
//! `EntitlementStore` trait is the contract the engines depend on; SQLite
//! backs production and an in-memory map backs tests and local runs.

mod memory;
mod schema;
mod sqlite;

pub use memory::InMemoryEntitlementStore;
pub use schema::initialize_schema;
pub use sqlite::SqliteEntitlementStore;

use std::future::Future;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use thiserror::Error;

use crate::entitlement::{EntitlementRecord, SubscriptionPlan, UserEntitlement};

/// Store errors
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Store call timed out after {0} ms")]
    Timeout(u64),

    #[error("Email {email} matches {count} users")]
    AmbiguousEmail { email: String, count: usize },

    #[error("Corrupt record for {user_id}: {reason}")]
    Corrupt { user_id: String, reason: String },
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        StoreError::Unavailable(err.to_string())
    }
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// How `set` combines a patch with an existing record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// Fields missing from the patch take their blank defaults
    Replace,
    /// Fields missing from the patch keep their stored values
    Merge,
}

/// Partial update of an entitlement record
///
/// `valid_until` and `email` are doubly optional so a patch can clear them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordPatch {
    pub credits: Option<u32>,
    pub last_reset_date: Option<NaiveDate>,
    pub unlimited: Option<bool>,
    pub subscription_plan: Option<SubscriptionPlan>,
    pub valid_until: Option<Option<DateTime<Utc>>>,
    pub email: Option<Option<String>>,
}

impl RecordPatch {
    /// Apply the patch on top of `base`
    pub fn apply(&self, base: EntitlementRecord) -> EntitlementRecord {
        EntitlementRecord {
            credits: self.credits.unwrap_or(base.credits),
            last_reset_date: self.last_reset_date.unwrap_or(base.last_reset_date),
            unlimited: self.unlimited.unwrap_or(base.unlimited),
            subscription_plan: self.subscription_plan.unwrap_or(base.subscription_plan),
            valid_until: self.valid_until.unwrap_or(base.valid_until),
            email: self.email.clone().unwrap_or(base.email).map(|e| normalize_email(&e)),
        }
    }

    /// Combine with whatever is stored according to `mode`
    pub fn resolve(&self, existing: Option<EntitlementRecord>, mode: WriteMode) -> EntitlementRecord {
        let base = match mode {
            WriteMode::Replace => EntitlementRecord::default(),
            WriteMode::Merge => existing.unwrap_or_default(),
        };
        self.apply(base)
    }
}

impl From<&EntitlementRecord> for RecordPatch {
    fn from(record: &EntitlementRecord) -> Self {
        Self {
            credits: Some(record.credits),
            last_reset_date: Some(record.last_reset_date),
            unlimited: Some(record.unlimited),
            subscription_plan: Some(record.subscription_plan),
            valid_until: Some(record.valid_until),
            email: Some(record.email.clone()),
        }
    }
}

/// Contract for entitlement persistence
#[async_trait::async_trait]
pub trait EntitlementStore: Send + Sync {
    /// Load the record for a user
    async fn get(&self, user_id: &str) -> StoreResult<Option<EntitlementRecord>>;

    /// Write a patch for a user, creating the record if needed
    async fn set(&self, user_id: &str, patch: &RecordPatch, mode: WriteMode) -> StoreResult<()>;

    /// Find the unique user holding `email`
    ///
    /// Returns `AmbiguousEmail` when more than one record matches.
    async fn find_by_email(&self, email: &str) -> StoreResult<Option<UserEntitlement>>;

    /// Whether a provider event has already been applied
    async fn is_event_processed(&self, event_id: &str) -> StoreResult<bool>;

    /// Remember that a provider event has been applied
    async fn mark_event_processed(&self, event_id: &str, event_type: &str) -> StoreResult<()>;
}

/// Emails are compared case-insensitively
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Run a store call under a deadline
///
/// An elapsed deadline surfaces as `StoreError::Timeout` so callers fail closed.
pub async fn bounded<T, F>(limit: Duration, call: F) -> StoreResult<T>
where
    F: Future<Output = StoreResult<T>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(StoreError::Timeout(limit.as_millis() as u64)),
    }
}

/// Create a new database connection pool
pub async fn create_pool(database_url: &str) -> StoreResult<SqlitePool> {
    let options = SqliteConnectOptions::from_str(database_url)?
        .create_if_missing(true)
        .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
        .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
        // Writers queue on the database lock instead of failing with SQLITE_BUSY
        .busy_timeout(Duration::from_secs(5));

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;

    initialize_schema(&pool).await?;

    Ok(pool)
}
