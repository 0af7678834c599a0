//! Document routes
//!
//! Uploading a document is the metered action: one credit per upload
//! unless the user holds an active subscription.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::auth::AuthenticatedUser;
use crate::documents::{DocumentRegistry, StoredDocument};
use crate::entitlement::CreditsRemaining;
use crate::error::Result;
use crate::state::AppState;

/// Create the documents router
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", post(create_document))
        .route("/:id", get(get_document))
}

#[derive(Debug, Deserialize)]
pub struct CreateDocumentRequest {
    pub text: String,
    pub title: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateDocumentResponse {
    pub document_id: Uuid,
    pub credits_remaining: CreditsRemaining,
}

/// Store a document, consuming a credit
async fn create_document(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(request): Json<CreateDocumentRequest>,
) -> Result<(StatusCode, Json<CreateDocumentResponse>)> {
    // Reject before metering so a bad upload costs nothing
    DocumentRegistry::validate(&request.text)?;

    let decision = state.entitlements().authorize(user.user_id()).await?;
    let document = state
        .documents()
        .insert(user.user_id(), request.title, request.text)
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(CreateDocumentResponse {
            document_id: document.id,
            credits_remaining: decision.credits_remaining,
        }),
    ))
}

/// Fetch one of the caller's documents
async fn get_document(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> Result<Json<StoredDocument>> {
    let document = state.documents().get(user.user_id(), id).await?;
    Ok(Json(document))
}
