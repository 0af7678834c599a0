//! Payment-provider webhook

use axum::{
    body::Bytes,
    extract::State,
    http::HeaderMap,
    routing::post,
    Json, Router,
};
use serde::Serialize;

use crate::billing::{ReconcileOutcome, SIGNATURE_HEADER};
use crate::error::Result;
use crate::state::AppState;

/// Create the webhook router
pub fn router() -> Router<AppState> {
    Router::new().route("/", post(receive_event))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookResponse {
    pub received: bool,
    pub outcome: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
}

impl From<ReconcileOutcome> for WebhookResponse {
    fn from(outcome: ReconcileOutcome) -> Self {
        let (outcome, user_id) = match outcome {
            ReconcileOutcome::Applied { user_id, .. } => ("applied", Some(user_id)),
            ReconcileOutcome::Duplicate => ("duplicate", None),
            ReconcileOutcome::Ignored(_) => ("ignored", None),
        };
        Self {
            received: true,
            outcome,
            user_id,
        }
    }
}

/// Verify and reconcile one signed delivery
///
/// The raw body is kept as bytes; the signature covers it verbatim.
async fn receive_event(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookResponse>> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok());

    let outcome = state.reconciler().handle_webhook(&body, signature).await?;
    Ok(Json(outcome.into()))
}
