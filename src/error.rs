//! Error types for the Quizcast server

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::NaiveDate;
use serde::Serialize;
use thiserror::Error;

use crate::auth::AuthError;
use crate::billing::{ProviderError, ReconcileError};
use crate::documents::DocumentError;
use crate::entitlement::EntitlementError;
use crate::store::StoreError;

/// Application-wide result type
pub type Result<T> = std::result::Result<T, AppError>;

/// Application error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Unauthenticated: {0}")]
    Unauthenticated(String),

    #[error("Daily credits exhausted; resets on {resets_on}")]
    QuotaExhausted { resets_on: NaiveDate },

    #[error("Entitlement store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Event rejected: {0}")]
    EventUnverified(String),

    #[error("Identity resolution failed: {0}")]
    IdentityResolution(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Upstream error: {0}")]
    Upstream(String),
}

impl From<EntitlementError> for AppError {
    fn from(err: EntitlementError) -> Self {
        match err {
            EntitlementError::QuotaExhausted { resets_on } => AppError::QuotaExhausted { resets_on },
            EntitlementError::StoreUnavailable(e) => e.into(),
            EntitlementError::InvalidPlan(plan) => {
                AppError::BadRequest(format!("plan '{}' cannot be granted", plan.as_str()))
            }
        }
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::AmbiguousEmail { .. } => AppError::IdentityResolution(err.to_string()),
            other => AppError::StoreUnavailable(other.to_string()),
        }
    }
}

impl From<ReconcileError> for AppError {
    fn from(err: ReconcileError) -> Self {
        match err {
            ReconcileError::Unverified(e) => AppError::EventUnverified(e.to_string()),
            ReconcileError::Malformed(msg) => AppError::BadRequest(msg),
            ReconcileError::Provider(e) => e.into(),
            ReconcileError::Store(e) => e.into(),
            e if e.is_identity_failure() => AppError::IdentityResolution(e.to_string()),
            e => AppError::BadRequest(e.to_string()),
        }
    }
}

impl From<AuthError> for AppError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::MissingToken | AuthError::InvalidToken(_) => {
                AppError::Unauthenticated(err.to_string())
            }
            AuthError::Provider(msg) => AppError::Upstream(msg),
        }
    }
}

impl From<ProviderError> for AppError {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::NotFound(what) => AppError::NotFound(what),
            ProviderError::UnsupportedPlan(_) => AppError::BadRequest(err.to_string()),
            other => AppError::Upstream(other.to_string()),
        }
    }
}

impl From<DocumentError> for AppError {
    fn from(err: DocumentError) -> Self {
        match err {
            DocumentError::EmptyText => AppError::BadRequest(err.to_string()),
            DocumentError::NotFound(id) => AppError::NotFound(format!("document {}", id)),
        }
    }
}

/// Error response body
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<serde_json::Value>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_type, message) = match &self {
            AppError::Unauthenticated(_) => (
                StatusCode::UNAUTHORIZED,
                "unauthenticated",
                "A valid bearer token is required".to_string(),
            ),
            AppError::QuotaExhausted { .. } => (
                StatusCode::PAYMENT_REQUIRED,
                "quota_exhausted",
                "Daily free credits are used up".to_string(),
            ),
            AppError::StoreUnavailable(msg) => {
                tracing::error!("Entitlement store unavailable: {}", msg);
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "store_unavailable",
                    "Entitlements could not be checked; try again shortly".to_string(),
                )
            }
            AppError::EventUnverified(msg) => {
                (StatusCode::BAD_REQUEST, "event_unverified", msg.clone())
            }
            AppError::IdentityResolution(msg) => {
                (StatusCode::BAD_REQUEST, "identity_resolution", msg.clone())
            }
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg.clone()),
            AppError::Forbidden(msg) => (StatusCode::FORBIDDEN, "forbidden", msg.clone()),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg.clone()),
            AppError::Upstream(msg) => {
                tracing::error!("Upstream error: {}", msg);
                (
                    StatusCode::BAD_GATEWAY,
                    "upstream_error",
                    "An upstream service failed".to_string(),
                )
            }
        };

        let details = match &self {
            AppError::QuotaExhausted { resets_on } => {
                Some(serde_json::json!({ "resetsOn": resets_on }))
            }
            _ if cfg!(debug_assertions) => Some(serde_json::Value::String(self.to_string())),
            _ => None,
        };

        let body = Json(ErrorResponse {
            error: error_type.to_string(),
            message,
            details,
        });

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::billing::SignatureError;

    #[test]
    fn test_status_mapping() {
        let cases = [
            (AppError::Unauthenticated("x".into()), StatusCode::UNAUTHORIZED),
            (
                AppError::QuotaExhausted {
                    resets_on: NaiveDate::from_ymd_opt(2024, 6, 2).unwrap(),
                },
                StatusCode::PAYMENT_REQUIRED,
            ),
            (AppError::StoreUnavailable("x".into()), StatusCode::SERVICE_UNAVAILABLE),
            (AppError::EventUnverified("x".into()), StatusCode::BAD_REQUEST),
            (AppError::Forbidden("x".into()), StatusCode::FORBIDDEN),
            (AppError::Upstream("x".into()), StatusCode::BAD_GATEWAY),
        ];

        for (error, status) in cases {
            assert_eq!(error.into_response().status(), status);
        }
    }

    #[test]
    fn test_store_failures_are_not_policy_denials() {
        let err: AppError = EntitlementError::StoreUnavailable(StoreError::Timeout(2000)).into();
        assert!(matches!(err, AppError::StoreUnavailable(_)));
    }

    #[test]
    fn test_reconcile_mapping() {
        let unverified: AppError = ReconcileError::Unverified(SignatureError::Mismatch).into();
        assert!(matches!(unverified, AppError::EventUnverified(_)));

        let ambiguous: AppError = ReconcileError::IdentityAmbiguous {
            email: "a@example.com".into(),
            count: 2,
        }
        .into();
        assert!(matches!(ambiguous, AppError::IdentityResolution(_)));

        let stalled: AppError = ReconcileError::Store(StoreError::Timeout(10)).into();
        assert!(matches!(stalled, AppError::StoreUnavailable(_)));
    }
}
