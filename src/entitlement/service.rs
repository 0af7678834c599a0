//! Entitlement service
//!
//! Wraps the pure engine with store access. Each operation holds the
//! per-user lock across its read-modify-write and bounds every store call
//! with the configured timeout; any store failure fails closed.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};
use thiserror::Error;

use super::engine::EntitlementEngine;
use super::locks::UserLocks;
use super::types::{Decision, EntitlementStatus, SubscriptionPlan};
use crate::config::EntitlementConfig;
use crate::store::{bounded, EntitlementStore, RecordPatch, StoreError, WriteMode};

/// Entitlement errors
#[derive(Debug, Error)]
pub enum EntitlementError {
    #[error("Daily credits exhausted; resets on {resets_on}")]
    QuotaExhausted { resets_on: NaiveDate },

    #[error("Entitlement store unavailable: {0}")]
    StoreUnavailable(#[from] StoreError),

    #[error("Plan cannot be granted: {}", .0.as_str())]
    InvalidPlan(SubscriptionPlan),
}

/// Entitlement checks backed by a store
#[derive(Clone)]
pub struct EntitlementService {
    store: Arc<dyn EntitlementStore>,
    engine: EntitlementEngine,
    locks: UserLocks,
    timeout: Duration,
}

impl EntitlementService {
    pub fn new(store: Arc<dyn EntitlementStore>, config: &EntitlementConfig) -> Self {
        Self {
            store,
            engine: EntitlementEngine::new(config.daily_allowance),
            locks: UserLocks::new(),
            timeout: config.store_timeout(),
        }
    }

    pub fn store(&self) -> &Arc<dyn EntitlementStore> {
        &self.store
    }

    /// Lock table shared with reconciliation
    pub fn locks(&self) -> &UserLocks {
        &self.locks
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn daily_allowance(&self) -> u32 {
        self.engine.daily_allowance()
    }

    /// Decide a metered action for `user_id`, consuming a credit if allowed
    pub async fn evaluate(&self, user_id: &str) -> Result<Decision, EntitlementError> {
        self.evaluate_at(user_id, Utc::now()).await
    }

    pub async fn evaluate_at(
        &self,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Decision, EntitlementError> {
        let _guard = self.locks.acquire_within(user_id, self.timeout).await?;

        let snapshot = bounded(self.timeout, self.store.get(user_id)).await?;
        let eval = self.engine.evaluate(snapshot.as_ref(), now);

        if let Some(record) = &eval.write {
            bounded(
                self.timeout,
                self.store.set(user_id, &RecordPatch::from(record), WriteMode::Replace),
            )
            .await?;
        }

        tracing::debug!(
            user_id = %user_id,
            allowed = eval.outcome.allowed,
            unlimited = eval.outcome.unlimited,
            "Entitlement evaluated"
        );

        Ok(eval.outcome)
    }

    /// Like `evaluate`, but a denial becomes `QuotaExhausted`
    pub async fn authorize(&self, user_id: &str) -> Result<Decision, EntitlementError> {
        self.authorize_at(user_id, Utc::now()).await
    }

    pub async fn authorize_at(
        &self,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Decision, EntitlementError> {
        let decision = self.evaluate_at(user_id, now).await?;
        if decision.allowed {
            Ok(decision)
        } else {
            Err(EntitlementError::QuotaExhausted {
                resets_on: next_reset(now),
            })
        }
    }

    /// Current entitlement without consuming a credit
    pub async fn query_status(&self, user_id: &str) -> Result<EntitlementStatus, EntitlementError> {
        self.query_status_at(user_id, Utc::now()).await
    }

    pub async fn query_status_at(
        &self,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> Result<EntitlementStatus, EntitlementError> {
        let _guard = self.locks.acquire_within(user_id, self.timeout).await?;

        let snapshot = bounded(self.timeout, self.store.get(user_id)).await?;
        let eval = self.engine.status(snapshot.as_ref(), now);

        if let Some(record) = &eval.write {
            bounded(
                self.timeout,
                self.store.set(user_id, &RecordPatch::from(record), WriteMode::Replace),
            )
            .await?;
        }

        Ok(eval.outcome)
    }

    /// Manually grant unlimited access for one billing period of `plan`
    ///
    /// An existing grant that already runs longer is kept.
    pub async fn grant_unlimited(
        &self,
        user_id: &str,
        plan: SubscriptionPlan,
    ) -> Result<EntitlementStatus, EntitlementError> {
        self.grant_unlimited_at(user_id, plan, Utc::now()).await
    }

    pub async fn grant_unlimited_at(
        &self,
        user_id: &str,
        plan: SubscriptionPlan,
        now: DateTime<Utc>,
    ) -> Result<EntitlementStatus, EntitlementError> {
        let period_end = plan
            .period_end(now)
            .ok_or(EntitlementError::InvalidPlan(plan))?;

        {
            let _guard = self.locks.acquire_within(user_id, self.timeout).await?;

            let existing = bounded(self.timeout, self.store.get(user_id)).await?;
            let valid_until = existing
                .and_then(|r| r.valid_until)
                .map_or(period_end, |current| current.max(period_end));

            let patch = RecordPatch {
                unlimited: Some(true),
                subscription_plan: Some(plan),
                valid_until: Some(Some(valid_until)),
                ..Default::default()
            };
            bounded(self.timeout, self.store.set(user_id, &patch, WriteMode::Merge)).await?;

            tracing::info!(
                user_id = %user_id,
                plan = plan.as_str(),
                valid_until = %valid_until,
                "Unlimited access granted manually"
            );
        }

        self.query_status_at(user_id, now).await
    }
}

/// First day on which exhausted credits are available again
pub fn next_reset(now: DateTime<Utc>) -> NaiveDate {
    now.date_naive().succ_opt().unwrap_or(NaiveDate::MAX)
}
