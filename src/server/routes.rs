//! Route definitions

use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};

use super::handlers::{
    chat, cleanup, download_model, get_parameters, health, list_models, load_model, purge_logs,
    reset_parameters, system_status, unload_model, update_parameters, AppState,
};

/// Create the API router
///
/// Access levels are enforced per handler: `/health` is open, chat and reads
/// take the standard key, everything else the admin token.
pub fn api_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/health", get(health))
        .route("/api/v1/chat", post(chat))
        .route("/api/v1/models", get(list_models))
        .route("/api/v1/models/download", post(download_model))
        .route("/api/v1/models/:id/load", post(load_model))
        .route("/api/v1/models/:id/unload", post(unload_model))
        .route(
            "/api/v1/models/:id/parameters",
            get(get_parameters).patch(update_parameters),
        )
        .route("/api/v1/models/:id/parameters/reset", post(reset_parameters))
        .route("/api/v1/system/cleanup", post(cleanup))
        .route("/api/v1/system/status", get(system_status))
        .route("/api/v1/logs/purge", post(purge_logs))
}

