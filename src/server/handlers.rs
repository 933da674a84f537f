//! HTTP request handlers
//!
//! Handlers authenticate, build a [`RequestContext`] and hand the work to the
//! gateway; they never touch component state directly.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, ConnectInfo, Extension, Json, Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::auth::{authorize, bearer, Access};
use super::error::{quota_headers, ApiError};
use crate::admission::{client_key, RequestContext};
use crate::config::{AuthConfig, ClientKeyPolicy};
use crate::engine::{DownloadOutcome, ModelDescriptor, ModelState, ModelStatus};
use crate::error::Error;
use crate::gateway::{Admitted, Budget, ChatRequest, RequestGateway};
use crate::loader::{FetchRequest, ModelFormat};
use crate::maintenance::{CleanupTarget, Janitor};
use crate::params::ParameterSet;
use crate::telemetry::HealthSnapshot;

/// Request id assigned by the request-id middleware
#[derive(Debug, Clone)]
pub struct RequestId(pub String);

/// Shared application state
pub struct AppState {
    pub gateway: Arc<RequestGateway>,
    pub janitor: Arc<Janitor>,
    pub auth: AuthConfig,
    pub key_policy: ClientKeyPolicy,
}

impl AppState {
    pub fn new(
        gateway: Arc<RequestGateway>,
        janitor: Arc<Janitor>,
        auth: AuthConfig,
        key_policy: ClientKeyPolicy,
    ) -> Self {
        Self {
            gateway,
            janitor,
            auth,
            key_policy,
        }
    }

    /// Authenticate the caller and build its request context
    ///
    /// Rejected callers are still counted in telemetry and the audit log.
    fn caller(
        &self,
        headers: &HeaderMap,
        addr: Option<ConnectInfo<SocketAddr>>,
        request_id: &RequestId,
        access: Access,
        operation: &str,
    ) -> Result<RequestContext, ApiError> {
        let credential = bearer(headers);
        let key = client_key(self.key_policy, credential, addr.map(|ConnectInfo(a)| a.ip()));
        let ctx = RequestContext::new(key, self.gateway.guard(Budget::Request))
            .with_request_id(request_id.0.clone());

        if let Err(e) = authorize(&self.auth, credential, access) {
            self.gateway.record_rejection(&ctx, operation, e.category());
            return Err(ApiError::new(e, &request_id.0));
        }
        Ok(ctx)
    }

    /// Fail an authenticated call before it reaches the gateway, still
    /// counting it in telemetry and the audit log
    fn reject(&self, ctx: &RequestContext, operation: &str, error: Error) -> ApiError {
        self.gateway.record_rejection(ctx, operation, error.category());
        ApiError::new(error, &ctx.request_id)
    }
}

fn respond<T: Serialize>(status: StatusCode, admitted: Admitted<T>) -> Response {
    (status, quota_headers(&admitted.quota), Json(admitted.value)).into_response()
}

fn body_error(rejection: JsonRejection) -> Error {
    Error::validation("body", rejection.body_text())
}

/// Body that may be omitted entirely; a body that is sent must parse
fn optional_body<T: Default>(body: Result<Json<T>, JsonRejection>) -> Result<T, Error> {
    match body {
        Ok(Json(value)) => Ok(value),
        Err(JsonRejection::MissingJsonContentType(_)) => Ok(T::default()),
        Err(rejection) => Err(body_error(rejection)),
    }
}

/// Health check endpoint
pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthSnapshot> {
    let gateway = &state.gateway;
    Json(gateway.telemetry().snapshot(gateway.models().model_health()))
}

/// Chat endpoint
pub async fn chat(
    State(state): State<Arc<AppState>>,
    Extension(request_id): Extension<RequestId>,
    addr: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    body: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let ctx = state.caller(&headers, addr, &request_id, Access::Standard, "chat")?;
    let Json(request) = body.map_err(|r| state.reject(&ctx, "chat", body_error(r)))?;
    let ctx = ctx.with_channel(request.channel.clone());
    if let Some(user) = &request.user_id {
        tracing::debug!(request_id = %ctx.request_id, user = %user, "chat request");
    }

    let reply = state
        .gateway
        .chat(&ctx, request)
        .await
        .map_err(|e| ApiError::new(e, &request_id.0))?;
    Ok(respond(StatusCode::OK, reply))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelsResponse {
    pub models: Vec<ModelDescriptor>,
    pub state: ModelState,
}

/// List known models and the resident model's state
pub async fn list_models(
    State(state): State<Arc<AppState>>,
    Extension(request_id): Extension<RequestId>,
    addr: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let ctx = state.caller(&headers, addr, &request_id, Access::Standard, "list_models")?;
    let models = Arc::clone(state.gateway.models());
    let listed = state
        .gateway
        .execute(&ctx, "list_models", None, Budget::Request, move |_| async move {
            Ok(ModelsResponse {
                models: models.list(),
                state: models.state(),
            })
        })
        .await
        .map_err(|e| ApiError::new(e, &request_id.0))?;
    Ok(respond(StatusCode::OK, listed))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadRequest {
    /// Repository name, e.g. `org/model`
    #[serde(alias = "model_name", alias = "modelName")]
    pub name: String,
    #[serde(default)]
    pub format: Option<String>,
    /// Access token for gated repositories
    #[serde(default)]
    pub token: Option<String>,
}

/// Outcome of a lifecycle call
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelActionResponse {
    pub model_id: String,
    pub action: &'static str,
    pub status: ModelStatus,
    pub progress: u8,
    pub timestamp: DateTime<Utc>,
    pub model: ModelDescriptor,
}

impl ModelActionResponse {
    fn new(action: &'static str, model: ModelDescriptor) -> Self {
        Self {
            model_id: model.id.clone(),
            action,
            status: model.status,
            progress: model.progress,
            timestamp: Utc::now(),
            model,
        }
    }
}

/// Start or join a model download
pub async fn download_model(
    State(state): State<Arc<AppState>>,
    Extension(request_id): Extension<RequestId>,
    addr: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    body: Result<Json<DownloadRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let ctx = state.caller(&headers, addr, &request_id, Access::Elevated, "download")?;
    let Json(body) = body.map_err(|r| state.reject(&ctx, "download", body_error(r)))?;

    let format = match body.format.as_deref() {
        None => None,
        Some(tag) => Some(ModelFormat::from_tag(tag).ok_or_else(|| {
            let error = Error::validation("format", format!("unknown format `{tag}`"));
            state.reject(&ctx, "download", error)
        })?),
    };
    let request = FetchRequest {
        name: body.name,
        format,
        credential: body.token,
    };
    let model_id = request.model_id();

    let models = Arc::clone(state.gateway.models());
    let outcome = state
        .gateway
        .execute(&ctx, "download", Some(&model_id), Budget::Transition, move |_| async move {
            models.download(request).await
        })
        .await
        .map_err(|e| ApiError::new(e, &request_id.0))?;

    let status = match outcome.value {
        DownloadOutcome::InProgress(_) => StatusCode::ACCEPTED,
        _ => StatusCode::OK,
    };
    let descriptor = outcome.value.descriptor().clone();
    Ok(respond(
        status,
        Admitted {
            value: ModelActionResponse::new("download", descriptor),
            quota: outcome.quota,
        },
    ))
}

/// Make a model resident
pub async fn load_model(
    State(state): State<Arc<AppState>>,
    Extension(request_id): Extension<RequestId>,
    Path(id): Path<String>,
    addr: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let ctx = state.caller(&headers, addr, &request_id, Access::Elevated, "load")?;
    let models = Arc::clone(state.gateway.models());
    let target = id.clone();
    let loaded = state
        .gateway
        .execute(&ctx, "load", Some(&id), Budget::Transition, move |_| async move {
            models.load(&target).await
        })
        .await
        .map_err(|e| ApiError::new(e, &request_id.0))?;
    Ok(respond(
        StatusCode::OK,
        Admitted {
            value: ModelActionResponse::new("load", loaded.value),
            quota: loaded.quota,
        },
    ))
}

/// Release the resident model
pub async fn unload_model(
    State(state): State<Arc<AppState>>,
    Extension(request_id): Extension<RequestId>,
    Path(id): Path<String>,
    addr: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let ctx = state.caller(&headers, addr, &request_id, Access::Elevated, "unload")?;
    let models = Arc::clone(state.gateway.models());
    let target = id.clone();
    let unloaded = state
        .gateway
        .execute(&ctx, "unload", Some(&id), Budget::Transition, move |_| async move {
            models.unload(&target).await
        })
        .await
        .map_err(|e| ApiError::new(e, &request_id.0))?;
    Ok(respond(
        StatusCode::OK,
        Admitted {
            value: ModelActionResponse::new("unload", unloaded.value),
            quota: unloaded.quota,
        },
    ))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ParametersResponse {
    #[serde(flatten)]
    pub set: ParameterSet,
    pub timestamp: DateTime<Utc>,
}

impl From<ParameterSet> for ParametersResponse {
    fn from(set: ParameterSet) -> Self {
        Self {
            set,
            timestamp: Utc::now(),
        }
    }
}

/// Current parameters for a model
pub async fn get_parameters(
    State(state): State<Arc<AppState>>,
    Extension(request_id): Extension<RequestId>,
    Path(id): Path<String>,
    addr: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let ctx = state.caller(&headers, addr, &request_id, Access::Standard, "get_parameters")?;
    let params = Arc::clone(state.gateway.params());
    let target = id.clone();
    let set = state
        .gateway
        .execute(&ctx, "get_parameters", Some(&id), Budget::Request, move |_| async move {
            params.get(&target).map(ParametersResponse::from)
        })
        .await
        .map_err(|e| ApiError::new(e, &request_id.0))?;
    Ok(respond(StatusCode::OK, set))
}

/// Validated partial update of a model's parameters
pub async fn update_parameters(
    State(state): State<Arc<AppState>>,
    Extension(request_id): Extension<RequestId>,
    Path(id): Path<String>,
    addr: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    body: Result<Json<Map<String, Value>>, JsonRejection>,
) -> Result<Response, ApiError> {
    let ctx = state.caller(&headers, addr, &request_id, Access::Elevated, "update_parameters")?;
    let Json(patch) = body.map_err(|r| state.reject(&ctx, "update_parameters", body_error(r)))?;
    // Accept both a bare patch and `{"parameters": {...}}`
    let patch = match patch.get("parameters") {
        Some(Value::Object(inner)) if patch.len() == 1 => inner.clone(),
        _ => patch,
    };

    let params = Arc::clone(state.gateway.params());
    let target = id.clone();
    let set = state
        .gateway
        .execute(&ctx, "update_parameters", Some(&id), Budget::Request, move |_| async move {
            params.update(&target, &patch).map(ParametersResponse::from)
        })
        .await
        .map_err(|e| ApiError::new(e, &request_id.0))?;
    Ok(respond(StatusCode::OK, set))
}

/// Restore a model's parameters to the defaults
pub async fn reset_parameters(
    State(state): State<Arc<AppState>>,
    Extension(request_id): Extension<RequestId>,
    Path(id): Path<String>,
    addr: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let ctx = state.caller(&headers, addr, &request_id, Access::Elevated, "reset_parameters")?;
    let params = Arc::clone(state.gateway.params());
    let target = id.clone();
    let set = state
        .gateway
        .execute(&ctx, "reset_parameters", Some(&id), Budget::Request, move |_| async move {
            params.reset(&target).map(ParametersResponse::from)
        })
        .await
        .map_err(|e| ApiError::new(e, &request_id.0))?;
    Ok(respond(StatusCode::OK, set))
}

#[derive(Debug, Default, Deserialize)]
pub struct CleanupRequest {
    #[serde(default)]
    pub target: CleanupTarget,
}

/// Reclaim disk space
pub async fn cleanup(
    State(state): State<Arc<AppState>>,
    Extension(request_id): Extension<RequestId>,
    addr: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    body: Result<Json<CleanupRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let ctx = state.caller(&headers, addr, &request_id, Access::Elevated, "cleanup")?;
    let target = optional_body(body)
        .map_err(|e| state.reject(&ctx, "cleanup", e))?
        .target;
    let janitor = Arc::clone(&state.janitor);
    let report = state
        .gateway
        .execute(&ctx, "cleanup", None, Budget::Transition, move |_| async move {
            tokio::task::spawn_blocking(move || janitor.run(target))
                .await
                .map_err(|e| Error::engine(format!("cleanup task failed: {e}")))?
        })
        .await
        .map_err(|e| ApiError::new(e, &request_id.0))?;
    Ok(respond(StatusCode::OK, report))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PurgeRequest {
    #[serde(default = "default_older_than_days", alias = "older_than_days")]
    pub older_than_days: u64,
    #[serde(default = "default_keep_latest", alias = "keep_latest_files")]
    pub keep_latest: usize,
}

fn default_older_than_days() -> u64 {
    30
}

fn default_keep_latest() -> usize {
    100
}

impl Default for PurgeRequest {
    fn default() -> Self {
        Self {
            older_than_days: default_older_than_days(),
            keep_latest: default_keep_latest(),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PurgeResponse {
    pub files_removed: u64,
    pub space_freed: u64,
    pub timestamp: DateTime<Utc>,
}

/// Delete old request logs
pub async fn purge_logs(
    State(state): State<Arc<AppState>>,
    Extension(request_id): Extension<RequestId>,
    addr: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    body: Result<Json<PurgeRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let ctx = state.caller(&headers, addr, &request_id, Access::Elevated, "purge_logs")?;
    let request = optional_body(body).map_err(|e| state.reject(&ctx, "purge_logs", e))?;
    let log_dir = state.janitor.log_dir().to_path_buf();
    let purged = state
        .gateway
        .execute(&ctx, "purge_logs", None, Budget::Request, move |_| async move {
            let removal = tokio::task::spawn_blocking(move || {
                crate::logs::purge_logs(&log_dir, request.older_than_days, request.keep_latest)
            })
            .await
            .map_err(|e| Error::engine(format!("purge task failed: {e}")))??;
            Ok(PurgeResponse {
                files_removed: removal.files_removed,
                space_freed: removal.space_freed,
                timestamp: Utc::now(),
            })
        })
        .await
        .map_err(|e| ApiError::new(e, &request_id.0))?;
    Ok(respond(StatusCode::OK, purged))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitStatus {
    pub tracked_clients: usize,
    pub short_cap: u32,
    pub short_window_secs: u64,
    pub long_cap: u32,
    pub long_window_secs: u64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemStatus {
    #[serde(flatten)]
    pub health: HealthSnapshot,
    pub model_state: ModelState,
    pub rate_limit: RateLimitStatus,
}

/// Detailed status for operators
pub async fn system_status(
    State(state): State<Arc<AppState>>,
    Extension(request_id): Extension<RequestId>,
    addr: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let ctx = state.caller(&headers, addr, &request_id, Access::Elevated, "system_status")?;
    let gateway = Arc::clone(&state.gateway);
    let status = state
        .gateway
        .execute(&ctx, "system_status", None, Budget::Request, move |_| async move {
            let models = gateway.models();
            let limits = gateway.limiter().config();
            Ok(SystemStatus {
                health: gateway.telemetry().snapshot(models.model_health()),
                model_state: models.state(),
                rate_limit: RateLimitStatus {
                    tracked_clients: gateway.limiter().tracked_clients(),
                    short_cap: limits.short_cap,
                    short_window_secs: limits.short_window_secs,
                    long_cap: limits.long_cap,
                    long_window_secs: limits.long_window_secs,
                },
            })
        })
        .await
        .map_err(|e| ApiError::new(e, &request_id.0))?;
    Ok(respond(StatusCode::OK, status))
}
