//! HTTP server
//!
//! Thin axum layer over the [`RequestGateway`](crate::gateway::RequestGateway):
//! bearer authentication, request ids, CORS and request tracing.

mod auth;
mod error;
mod handlers;
mod routes;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use axum::extract::{DefaultBodyLimit, Request};
use axum::http::{HeaderName, HeaderValue};
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::Router;
use tokio::net::TcpListener;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::app::Services;
use crate::config::ServerConfig;

pub use auth::{authorize, bearer, Access};
pub use error::{status_for, ApiError, ErrorDetail, ErrorResponse};
pub use handlers::{AppState, RequestId};
pub use routes::api_routes;

const REQUEST_ID: HeaderName = HeaderName::from_static("x-request-id");

/// Reuse the caller's `X-Request-ID` or mint one, and echo it on the response
async fn assign_request_id(mut request: Request, next: Next) -> Response {
    let id = request
        .headers()
        .get(&REQUEST_ID)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty() && v.len() <= 128)
        .map(str::to_string)
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    request.extensions_mut().insert(RequestId(id.clone()));

    let mut response = next.run(request).await;
    if let Ok(value) = HeaderValue::from_str(&id) {
        response.headers_mut().insert(REQUEST_ID, value);
    }
    response
}

fn cors_layer(config: &ServerConfig) -> CorsLayer {
    let origins: Vec<HeaderValue> = config
        .cors_origins
        .iter()
        .filter_map(|o| HeaderValue::from_str(o).ok())
        .collect();
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if origins.is_empty() {
        layer.allow_origin(Any)
    } else {
        layer.allow_origin(AllowOrigin::list(origins))
    }
}

/// Build the application router
pub fn router(state: Arc<AppState>, config: &ServerConfig) -> Router {
    let mut app = Router::new()
        .merge(api_routes())
        .layer(DefaultBodyLimit::max(config.max_body_size));
    if config.cors_enabled {
        app = app.layer(cors_layer(config));
    }
    if config.request_logging {
        app = app.layer(TraceLayer::new_for_http());
    }
    app.layer(middleware::from_fn(assign_request_id))
        .with_state(state)
}

/// Serve until ctrl-c, then shut the services down
pub async fn start(services: Services) -> Result<()> {
    let config = services.config.server.clone();
    let state = Arc::new(AppState::new(
        Arc::clone(&services.gateway),
        Arc::clone(&services.janitor),
        services.config.auth.clone(),
        services.config.rate_limit.client_key,
    ));
    let app = router(state, &config);

    let addr = config.addr();
    let listener = TcpListener::bind(&addr).await?;

    tracing::info!("Server listening on http://{}", addr);
    tracing::info!("API endpoints:");
    tracing::info!("  GET   /health - Health check");
    tracing::info!("  POST  /api/v1/chat - Chat with the loaded model");
    tracing::info!("  GET   /api/v1/models - List models");
    tracing::info!("  POST  /api/v1/models/download - Download a model (admin)");
    tracing::info!("  POST  /api/v1/models/:id/load|unload - Model lifecycle (admin)");
    tracing::info!("  GET   /api/v1/models/:id/parameters - Read parameters");
    tracing::info!("  PATCH /api/v1/models/:id/parameters - Update parameters (admin)");
    tracing::info!("  GET   /api/v1/system/status - Detailed status (admin)");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("failed to listen for shutdown signal: {}", e);
        }
        tracing::info!("shutdown signal received");
    })
    .await?;

    services.shutdown().await?;
    Ok(())
}
