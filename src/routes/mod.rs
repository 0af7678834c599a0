//! Route modules for the Quizcast server

pub mod admin;
pub mod billing;
pub mod credits;
pub mod documents;
pub mod health;
pub mod webhook;

use axum::Router;

use crate::state::AppState;

/// Build the full application router
pub fn router(state: AppState) -> Router {
    Router::new()
        .nest("/health", health::router())
        .nest("/api/v1/credits", credits::router())
        .nest("/api/v1/admin", admin::router())
        .nest("/api/v1/documents", documents::router())
        .nest("/api/v1/billing", billing::router())
        .nest("/webhook", webhook::router())
        .with_state(state)
}
