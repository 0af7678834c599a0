//! Subscription reconciliation
//!
//! Applies verified provider events to the entitlement store. Every grant
//! is a keep-max merge of `valid_until`, so replays and out-of-order
//! deliveries converge on the latest period end. Events carrying an id are
//! remembered once applied and skipped afterwards.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use thiserror::Error;

use super::client::{ProviderError, SubscriptionSource};
use super::events::{CheckoutSession, Invoice, ProviderEvent, WebhookEvent};
use super::signature::{SignatureError, WebhookVerifier};
use crate::entitlement::{EntitlementService, SubscriptionPlan, UserLocks};
use crate::store::{bounded, EntitlementStore, RecordPatch, StoreError, WriteMode};

/// Reconciliation errors
///
/// None of these leave a partial mutation behind; the provider's retry is
/// the recovery path.
#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("Event failed verification: {0}")]
    Unverified(#[from] SignatureError),

    #[error("Malformed event: {0}")]
    Malformed(String),

    #[error("Checkout session carries no user reference")]
    MissingUserReference,

    #[error("Invoice references no subscription")]
    MissingSubscription,

    #[error("No user matches {}", .email.as_deref().unwrap_or("an absent email"))]
    IdentityMissing { email: Option<String> },

    #[error("Email {email} matches {count} users")]
    IdentityAmbiguous { email: String, count: usize },

    #[error("Grant expiry is out of range")]
    ExpiryOutOfRange,

    #[error("Subscription {subscription_id} has no period end")]
    MissingPeriodEnd { subscription_id: String },

    #[error("Provider lookup failed: {0}")]
    Provider(#[from] ProviderError),

    #[error("Store failure: {0}")]
    Store(StoreError),
}

impl From<StoreError> for ReconcileError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::AmbiguousEmail { email, count } => {
                ReconcileError::IdentityAmbiguous { email, count }
            }
            other => ReconcileError::Store(other),
        }
    }
}

impl ReconcileError {
    /// Failures that need a human to resolve the identity
    pub fn is_identity_failure(&self) -> bool {
        matches!(
            self,
            ReconcileError::MissingUserReference
                | ReconcileError::IdentityMissing { .. }
                | ReconcileError::IdentityAmbiguous { .. }
        )
    }
}

/// Result of handling one event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    Applied {
        user_id: String,
        valid_until: DateTime<Utc>,
    },
    /// Event id was applied before
    Duplicate,
    /// Kind not meaningful to entitlements
    Ignored(String),
}

/// Unlimited grant derived from an event
#[derive(Debug)]
struct Grant {
    user_id: String,
    valid_until: DateTime<Utc>,
    plan: Option<SubscriptionPlan>,
    email: Option<String>,
}

/// Applies provider events to entitlement records
#[derive(Clone)]
pub struct Reconciler {
    store: Arc<dyn EntitlementStore>,
    subscriptions: Arc<dyn SubscriptionSource>,
    locks: UserLocks,
    timeout: Duration,
    checkout_grant: ChronoDuration,
    verifier: WebhookVerifier,
}

impl Reconciler {
    /// Share store, locks and timeout with `entitlements`
    pub fn new(
        entitlements: &EntitlementService,
        subscriptions: Arc<dyn SubscriptionSource>,
        verifier: WebhookVerifier,
        checkout_grant: ChronoDuration,
    ) -> Self {
        Self {
            store: entitlements.store().clone(),
            subscriptions,
            locks: entitlements.locks().clone(),
            timeout: entitlements.timeout(),
            checkout_grant,
            verifier,
        }
    }

    /// Verify, decode and apply a raw webhook delivery
    pub async fn handle_webhook(
        &self,
        payload: &[u8],
        signature: Option<&str>,
    ) -> Result<ReconcileOutcome, ReconcileError> {
        if let Err(e) = self.verifier.verify(payload, signature) {
            tracing::warn!(error = %e, "Rejected unverified webhook");
            return Err(e.into());
        }

        let event = WebhookEvent::parse(payload)?;
        self.handle(event).await
    }

    pub async fn handle(&self, event: WebhookEvent) -> Result<ReconcileOutcome, ReconcileError> {
        self.handle_at(event, Utc::now()).await
    }

    pub async fn handle_at(
        &self,
        event: WebhookEvent,
        now: DateTime<Utc>,
    ) -> Result<ReconcileOutcome, ReconcileError> {
        let event_id = event.id.clone();
        let event_type = event.kind.event_type().to_string();

        let result = self.reconcile(event, now).await;

        match &result {
            Ok(ReconcileOutcome::Applied { user_id, valid_until }) => tracing::info!(
                event_id = event_id.as_deref().unwrap_or("-"),
                event_type = %event_type,
                user_id = %user_id,
                valid_until = %valid_until,
                "Unlimited access reconciled"
            ),
            Ok(ReconcileOutcome::Duplicate) => tracing::info!(
                event_id = event_id.as_deref().unwrap_or("-"),
                "Skipping already processed event"
            ),
            Ok(ReconcileOutcome::Ignored(_)) => tracing::debug!(
                event_type = %event_type,
                "Ignoring event"
            ),
            Err(e) => tracing::error!(
                event_id = event_id.as_deref().unwrap_or("-"),
                event_type = %event_type,
                manual_followup = e.is_identity_failure(),
                error = %e,
                "Reconciliation failed"
            ),
        }

        result
    }

    async fn reconcile(
        &self,
        event: WebhookEvent,
        now: DateTime<Utc>,
    ) -> Result<ReconcileOutcome, ReconcileError> {
        if let ProviderEvent::Other(kind) = &event.kind {
            return Ok(ReconcileOutcome::Ignored(kind.clone()));
        }

        if let Some(id) = &event.id {
            if bounded(self.timeout, self.store.is_event_processed(id)).await? {
                return Ok(ReconcileOutcome::Duplicate);
            }
        }

        let grant = match &event.kind {
            ProviderEvent::CheckoutSessionCompleted(session) => self.grant_from_checkout(session, now)?,
            ProviderEvent::InvoicePaymentSucceeded(invoice) => self.grant_from_invoice(invoice).await?,
            ProviderEvent::Other(kind) => return Ok(ReconcileOutcome::Ignored(kind.clone())),
        };

        let valid_until = self.apply_grant(&grant).await?;

        if let Some(id) = &event.id {
            bounded(
                self.timeout,
                self.store.mark_event_processed(id, event.kind.event_type()),
            )
            .await?;
        }

        Ok(ReconcileOutcome::Applied {
            user_id: grant.user_id,
            valid_until,
        })
    }

    fn grant_from_checkout(
        &self,
        session: &CheckoutSession,
        now: DateTime<Utc>,
    ) -> Result<Grant, ReconcileError> {
        let user_id = session
            .user_id()
            .ok_or(ReconcileError::MissingUserReference)?;

        Ok(Grant {
            user_id: user_id.to_string(),
            valid_until: now
                .checked_add_signed(self.checkout_grant)
                .ok_or(ReconcileError::ExpiryOutOfRange)?,
            plan: session
                .metadata
                .get("plan")
                .map(|plan| SubscriptionPlan::parse(Some(plan))),
            email: session.email().map(str::to_string),
        })
    }

    async fn grant_from_invoice(&self, invoice: &Invoice) -> Result<Grant, ReconcileError> {
        let subscription_id = invoice
            .subscription_id()
            .ok_or(ReconcileError::MissingSubscription)?;

        let subscription = self
            .subscriptions
            .fetch_subscription(subscription_id)
            .await?;

        // Provider periods are whole seconds
        let valid_until = subscription
            .period_end_secs()
            .and_then(|secs| DateTime::from_timestamp(secs, 0))
            .ok_or_else(|| ReconcileError::MissingPeriodEnd {
                subscription_id: subscription.id.clone(),
            })?;

        let user_id = match subscription.user_id() {
            Some(user_id) => user_id.to_string(),
            None => self.resolve_by_email(invoice.email()).await?,
        };

        let plan = match SubscriptionPlan::parse(subscription.plan()) {
            SubscriptionPlan::None => SubscriptionPlan::Unknown,
            plan => plan,
        };

        Ok(Grant {
            user_id,
            valid_until,
            plan: Some(plan),
            email: invoice.email().map(str::to_string),
        })
    }

    async fn resolve_by_email(&self, email: Option<&str>) -> Result<String, ReconcileError> {
        let email = email.ok_or(ReconcileError::IdentityMissing { email: None })?;

        match bounded(self.timeout, self.store.find_by_email(email)).await? {
            Some(found) => {
                tracing::info!(user_id = %found.user_id, "Resolved subscriber by email fallback");
                Ok(found.user_id)
            }
            None => Err(ReconcileError::IdentityMissing {
                email: Some(email.to_string()),
            }),
        }
    }

    /// Merge the grant under the user's lock, keeping the later expiry
    ///
    /// The event's email only fills a record that has none. A billing email
    /// never replaces the one already on file.
    async fn apply_grant(&self, grant: &Grant) -> Result<DateTime<Utc>, ReconcileError> {
        let _guard = self.locks.acquire_within(&grant.user_id, self.timeout).await?;

        let existing = bounded(self.timeout, self.store.get(&grant.user_id)).await?;
        let (current_until, has_email) = existing
            .map_or((None, false), |r| (r.valid_until, r.email.is_some()));
        let valid_until =
            current_until.map_or(grant.valid_until, |current| current.max(grant.valid_until));

        let email = match (&grant.email, has_email) {
            (Some(email), false) => Some(Some(email.clone())),
            (Some(email), true) => {
                tracing::debug!(user_id = %grant.user_id, event_email = %email, "Keeping stored email");
                None
            }
            (None, _) => None,
        };

        let patch = RecordPatch {
            unlimited: Some(true),
            subscription_plan: grant.plan,
            valid_until: Some(Some(valid_until)),
            email,
            ..Default::default()
        };
        bounded(
            self.timeout,
            self.store.set(&grant.user_id, &patch, WriteMode::Merge),
        )
        .await?;

        Ok(valid_until)
    }
}
