//! QuizCast Server
//!
//! Metered document service. Users get a small daily allowance of free
//! credits; an active subscription bypasses the meter until it expires.
//! Subscription state is kept in step with payment-provider webhooks.

pub mod auth;
pub mod billing;
pub mod config;
pub mod documents;
pub mod entitlement;
pub mod error;
pub mod routes;
pub mod state;
pub mod store;
