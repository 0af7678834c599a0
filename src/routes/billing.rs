//! Checkout and billing-portal routes

use axum::{
    extract::State,
    routing::post,
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::auth::AuthenticatedUser;
use crate::billing::HostedSession;
use crate::entitlement::SubscriptionPlan;
use crate::error::{AppError, Result};
use crate::state::AppState;

/// Create the billing router
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/checkout", post(create_checkout))
        .route("/portal", post(create_portal))
}

#[derive(Debug, Deserialize)]
pub struct CheckoutRequest {
    pub plan: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionResponse {
    pub session_id: String,
    pub url: String,
}

impl TryFrom<HostedSession> for SessionResponse {
    type Error = AppError;

    fn try_from(session: HostedSession) -> Result<Self> {
        let url = session
            .url
            .ok_or_else(|| AppError::Upstream(format!("session {} has no url", session.id)))?;
        Ok(Self {
            session_id: session.id,
            url,
        })
    }
}

/// Start a subscription checkout for the caller
async fn create_checkout(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(request): Json<CheckoutRequest>,
) -> Result<Json<SessionResponse>> {
    let plan = SubscriptionPlan::parse(Some(&request.plan));
    if !plan.is_purchasable() {
        return Err(AppError::BadRequest(format!("unknown plan '{}'", request.plan)));
    }

    let session = state
        .billing()
        .create_checkout_session(user.user_id(), user.email(), plan)
        .await?;

    Ok(Json(session.try_into()?))
}

/// Open the billing portal for the caller's customer record
async fn create_portal(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> Result<Json<SessionResponse>> {
    let email = user
        .email()
        .ok_or_else(|| AppError::BadRequest("account has no email".to_string()))?;

    let session = state.billing().create_portal_session(email).await?;
    Ok(Json(session.try_into()?))
}
