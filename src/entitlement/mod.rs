//! Entitlement module
//!
//! Decides whether a user may perform a metered action right now.
//!
//! # Modes
//!
//! - Daily credits: a fixed allowance, reset lazily on the first access of
//!   each calendar day (UTC) and decremented per allowed action
//! - Unlimited: a subscription-backed bypass, valid until its expiry; a
//!   lapsed grant is corrected to credit mode on next use
//!
//! The engine is pure; the service adds per-user locking, store timeouts
//! and persistence.

mod engine;
mod locks;
mod service;
mod types;

pub use engine::{EntitlementEngine, Evaluation};
pub use locks::UserLocks;
pub use service::{next_reset, EntitlementError, EntitlementService};
pub use types::{
    CreditsRemaining, Decision, DenyReason, EntitlementRecord, EntitlementStatus,
    SubscriptionPlan, UserEntitlement,
};
