//! SQLite storage for entitlement records

use chrono::{DateTime, NaiveDate, Utc};
use sqlx::SqlitePool;

use super::{normalize_email, EntitlementStore, RecordPatch, StoreError, StoreResult, WriteMode};
use crate::entitlement::{EntitlementRecord, SubscriptionPlan, UserEntitlement};

const DATE_FORMAT: &str = "%Y-%m-%d";

/// SQLite-backed entitlement store
#[derive(Clone)]
pub struct SqliteEntitlementStore {
    pool: SqlitePool,
}

impl SqliteEntitlementStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl EntitlementStore for SqliteEntitlementStore {
    async fn get(&self, user_id: &str) -> StoreResult<Option<EntitlementRecord>> {
        let row = sqlx::query_as::<_, EntitlementRow>(
            r#"
            SELECT user_id, credits, last_reset_date, unlimited,
                   subscription_plan, valid_until_ms, email
            FROM entitlements
            WHERE user_id = ?
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| r.into_entitlement().map(|e| e.record)).transpose()
    }

    async fn set(&self, user_id: &str, patch: &RecordPatch, mode: WriteMode) -> StoreResult<()> {
        // Row used when nothing is stored yet
        let fresh = patch.resolve(None, mode);
        let replace = mode == WriteMode::Replace;

        // One statement, so the write lock is taken up front. On conflict a
        // column keeps its stored value unless the patch sets it or the
        // write replaces the whole record.
        sqlx::query(
            r#"
            INSERT INTO entitlements (
                user_id, credits, last_reset_date, unlimited,
                subscription_plan, valid_until_ms, email, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            ON CONFLICT(user_id) DO UPDATE SET
                credits = CASE WHEN ?9 THEN excluded.credits ELSE credits END,
                last_reset_date = CASE WHEN ?10 THEN excluded.last_reset_date ELSE last_reset_date END,
                unlimited = CASE WHEN ?11 THEN excluded.unlimited ELSE unlimited END,
                subscription_plan = CASE WHEN ?12 THEN excluded.subscription_plan ELSE subscription_plan END,
                valid_until_ms = CASE WHEN ?13 THEN excluded.valid_until_ms ELSE valid_until_ms END,
                email = CASE WHEN ?14 THEN excluded.email ELSE email END,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(user_id)
        .bind(fresh.credits as i64)
        .bind(fresh.last_reset_date.format(DATE_FORMAT).to_string())
        .bind(fresh.unlimited)
        .bind(fresh.subscription_plan.as_str())
        .bind(fresh.valid_until.map(|t| t.timestamp_millis()))
        .bind(&fresh.email)
        .bind(Utc::now().to_rfc3339())
        .bind(replace || patch.credits.is_some())
        .bind(replace || patch.last_reset_date.is_some())
        .bind(replace || patch.unlimited.is_some())
        .bind(replace || patch.subscription_plan.is_some())
        .bind(replace || patch.valid_until.is_some())
        .bind(replace || patch.email.is_some())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find_by_email(&self, email: &str) -> StoreResult<Option<UserEntitlement>> {
        let email = normalize_email(email);

        let mut rows = sqlx::query_as::<_, EntitlementRow>(
            r#"
            SELECT user_id, credits, last_reset_date, unlimited,
                   subscription_plan, valid_until_ms, email
            FROM entitlements
            WHERE email = ?
            LIMIT 2
            "#,
        )
        .bind(&email)
        .fetch_all(&self.pool)
        .await?;

        match rows.len() {
            0 => Ok(None),
            1 => rows.pop().map(EntitlementRow::into_entitlement).transpose(),
            count => Err(StoreError::AmbiguousEmail { email, count }),
        }
    }

    async fn is_event_processed(&self, event_id: &str) -> StoreResult<bool> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT event_id FROM processed_events WHERE event_id = ?")
                .bind(event_id)
                .fetch_optional(&self.pool)
                .await?;

        Ok(row.is_some())
    }

    async fn mark_event_processed(&self, event_id: &str, event_type: &str) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO processed_events (event_id, event_type, processed_at)
            VALUES (?, ?, ?)
            ON CONFLICT(event_id) DO NOTHING
            "#,
        )
        .bind(event_id)
        .bind(event_type)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[derive(sqlx::FromRow)]
struct EntitlementRow {
    user_id: String,
    credits: i64,
    last_reset_date: String,
    unlimited: bool,
    subscription_plan: String,
    valid_until_ms: Option<i64>,
    email: Option<String>,
}

impl EntitlementRow {
    fn into_entitlement(self) -> StoreResult<UserEntitlement> {
        let corrupt = |reason: String| StoreError::Corrupt {
            user_id: self.user_id.clone(),
            reason,
        };

        let credits = u32::try_from(self.credits)
            .map_err(|_| corrupt(format!("credits out of range: {}", self.credits)))?;

        let last_reset_date = NaiveDate::parse_from_str(&self.last_reset_date, DATE_FORMAT)
            .map_err(|e| corrupt(format!("bad last_reset_date: {}", e)))?;

        let valid_until = match self.valid_until_ms {
            Some(ms) => Some(
                DateTime::<Utc>::from_timestamp_millis(ms)
                    .ok_or_else(|| corrupt(format!("valid_until out of range: {}", ms)))?,
            ),
            None => None,
        };

        let record = EntitlementRecord {
            credits,
            last_reset_date,
            unlimited: self.unlimited,
            subscription_plan: SubscriptionPlan::parse(Some(&self.subscription_plan)),
            valid_until,
            email: self.email,
        };

        Ok(UserEntitlement {
            user_id: self.user_id,
            record,
        })
    }
}
