//! Credit status and consumption

use axum::{
    extract::State,
    routing::{get, post},
    Json, Router,
};

use crate::auth::AuthenticatedUser;
use crate::entitlement::{Decision, EntitlementStatus};
use crate::error::Result;
use crate::state::AppState;

/// Create the credits router
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(get_status))
        .route("/consume", post(consume_credit))
}

/// Current entitlement without consuming a credit
async fn get_status(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> Result<Json<EntitlementStatus>> {
    let status = state.entitlements().query_status(user.user_id()).await?;
    Ok(Json(status))
}

/// Consume one credit for a metered action
async fn consume_credit(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> Result<Json<Decision>> {
    let decision = state.entitlements().authorize(user.user_id()).await?;
    Ok(Json(decision))
}
