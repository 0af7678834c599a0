//! Administrative entitlement routes

use axum::{
    extract::State,
    http::HeaderMap,
    routing::post,
    Json, Router,
};
use serde::Deserialize;

use crate::entitlement::{EntitlementStatus, SubscriptionPlan};
use crate::error::{AppError, Result};
use crate::state::AppState;

pub const ADMIN_TOKEN_HEADER: &str = "x-admin-token";

/// Create the admin router
pub fn router() -> Router<AppState> {
    Router::new().route("/upgrade", post(upgrade_user))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpgradeRequest {
    pub user_id: String,
    pub plan: String,
}

fn check_admin_token(state: &AppState, headers: &HeaderMap) -> Result<()> {
    let expected = state
        .config()
        .server
        .admin_token
        .as_deref()
        .ok_or_else(|| AppError::Forbidden("manual grants are disabled".to_string()))?;

    let presented = headers
        .get(ADMIN_TOKEN_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();

    if presented.is_empty() || presented != expected {
        return Err(AppError::Forbidden("invalid admin token".to_string()));
    }

    Ok(())
}

/// Grant unlimited access for one billing period
async fn upgrade_user(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<UpgradeRequest>,
) -> Result<Json<EntitlementStatus>> {
    check_admin_token(&state, &headers)?;

    let user_id = request.user_id.trim();
    if user_id.is_empty() {
        return Err(AppError::BadRequest("userId is required".to_string()));
    }

    let plan = SubscriptionPlan::parse(Some(&request.plan));
    let status = state.entitlements().grant_unlimited(user_id, plan).await?;

    tracing::info!(user_id = %user_id, plan = plan.as_str(), "Manual upgrade applied");
    Ok(Json(status))
}
