//! Billing
//!
//! Payment-provider integration:
//! - Webhook signature verification
//! - Event decoding into a closed set of kinds
//! - Reconciliation of events into entitlement grants
//! - REST client for subscriptions, checkout and the billing portal

mod client;
mod events;
mod reconcile;
mod signature;

pub use client::{HostedSession, ProviderError, StripeClient, SubscriptionSource};
pub use events::{
    CheckoutSession, Invoice, Metadata, ProviderEvent, Subscription, WebhookEvent,
    CHECKOUT_SESSION_COMPLETED, INVOICE_PAYMENT_SUCCEEDED,
};
pub use reconcile::{ReconcileError, ReconcileOutcome, Reconciler};
pub use signature::{SignatureError, WebhookVerifier, SIGNATURE_HEADER};
