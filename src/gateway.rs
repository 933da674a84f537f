//! Request pipeline
//!
//! Every inbound call runs the same stages: admit the client, resolve what
//! the call needs, run it under a deadline, then record the outcome in
//! telemetry and the audit log. The first failing stage ends the call and
//! its error category is what gets recorded.

use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;

use crate::admission::{DeadlineGuard, Quota, RateLimiter, RequestContext};
use crate::engine::ModelManager;
use crate::error::{Error, ErrorCategory, Result};
use crate::logs::{LogEntry, LogSink};
use crate::params::{GenerationParams, ParameterStore};
use crate::telemetry::TelemetryHub;

/// Chat request body
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    pub message: String,
    #[serde(default)]
    pub channel: Option<String>,
    #[serde(default, alias = "user_id")]
    pub user_id: Option<String>,
    /// Per-call parameter overrides; never stored
    #[serde(default)]
    pub parameters: Option<Map<String, Value>>,
}

/// Chat response body
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatReply {
    pub response: String,
    pub model: String,
    pub timestamp: DateTime<Utc>,
    pub parameters_used: GenerationParams,
    pub request_id: String,
}

/// A successful result and the caller's remaining rate budget
#[derive(Debug, Clone)]
pub struct Admitted<T> {
    pub value: T,
    pub quota: Quota,
}

/// Which deadline an operation runs under
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Budget {
    /// Inference and quick admin calls
    Request,
    /// Downloads and load/unload transitions
    Transition,
}

/// Orchestrates admission, guarded execution and accounting
pub struct RequestGateway {
    limiter: Arc<RateLimiter>,
    params: Arc<ParameterStore>,
    models: Arc<ModelManager>,
    request_guard: DeadlineGuard,
    transition_guard: DeadlineGuard,
    telemetry: Arc<TelemetryHub>,
    sink: Arc<dyn LogSink>,
}

impl RequestGateway {
    pub fn new(
        limiter: Arc<RateLimiter>,
        models: Arc<ModelManager>,
        request_guard: DeadlineGuard,
        transition_guard: DeadlineGuard,
        telemetry: Arc<TelemetryHub>,
        sink: Arc<dyn LogSink>,
    ) -> Self {
        Self {
            limiter,
            params: Arc::clone(models.params()),
            models,
            request_guard,
            transition_guard,
            telemetry,
            sink,
        }
    }

    pub fn models(&self) -> &Arc<ModelManager> {
        &self.models
    }

    pub fn params(&self) -> &Arc<ParameterStore> {
        &self.params
    }

    pub fn telemetry(&self) -> &Arc<TelemetryHub> {
        &self.telemetry
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    pub fn guard(&self, budget: Budget) -> &DeadlineGuard {
        match budget {
            Budget::Request => &self.request_guard,
            Budget::Transition => &self.transition_guard,
        }
    }

    /// Run one chat turn against the resident model
    ///
    /// The request's channel tags the audit entry unless the context already
    /// carries one.
    pub async fn chat(&self, ctx: &RequestContext, request: ChatRequest) -> Result<Admitted<ChatReply>> {
        let ctx = match (&ctx.channel, &request.channel) {
            (None, Some(channel)) => ctx.clone().with_channel(Some(channel.clone())),
            _ => ctx.clone(),
        };
        let mut model_id = None;
        let result = self.chat_stages(&ctx, request, &mut model_id).await;
        self.finish(&ctx, "chat", model_id, result.as_ref().map(|_| ()));
        result
    }

    async fn chat_stages(
        &self,
        ctx: &RequestContext,
        request: ChatRequest,
        model_id: &mut Option<String>,
    ) -> Result<Admitted<ChatReply>> {
        let quota = self.limiter.admit(&ctx.client_key)?;

        if request.message.trim().is_empty() {
            return Err(Error::validation("message", "must not be empty"));
        }
        let executor = self.models.active_executor()?;
        let model = executor.model_id().to_string();
        *model_id = Some(model.clone());

        let params = self.params.effective(&model, request.parameters.as_ref())?;
        let used = params.clone();
        let prompt = request.message;
        let response = self
            .request_guard
            .run_until(ctx.deadline, move |cancel| async move {
                executor.generate_text(&prompt, &params, &cancel).await
            })
            .await?;

        Ok(Admitted {
            value: ChatReply {
                response,
                model,
                timestamp: Utc::now(),
                parameters_used: used,
                request_id: ctx.request_id.clone(),
            },
            quota,
        })
    }

    /// Run an arbitrary operation through the same pipeline as chat
    ///
    /// The deadline counts from the request's arrival using the guard for
    /// `budget`.
    pub async fn execute<T, F, Fut>(
        &self,
        ctx: &RequestContext,
        operation: &str,
        model_id: Option<&str>,
        budget: Budget,
        op: F,
    ) -> Result<Admitted<T>>
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        let result = async {
            let quota = self.limiter.admit(&ctx.client_key)?;
            let guard = self.guard(budget);
            let value = guard
                .run_until(guard.deadline_from(ctx.arrived_at), op)
                .await?;
            Ok(Admitted { value, quota })
        }
        .await;
        self.finish(
            ctx,
            operation,
            model_id.map(str::to_string),
            result.as_ref().map(|_| ()),
        );
        result
    }

    fn finish(
        &self,
        ctx: &RequestContext,
        operation: &str,
        model_id: Option<String>,
        outcome: std::result::Result<(), &Error>,
    ) {
        let latency = ctx.arrived_at.elapsed();
        let outcome = outcome.map_err(Error::category);
        self.telemetry.record(outcome, latency);

        let entry = LogEntry {
            timestamp: Utc::now(),
            request_id: ctx.request_id.clone(),
            client_key: ctx.client_key.clone(),
            operation: operation.to_string(),
            channel: ctx.channel.clone(),
            model_id,
            error: outcome.err(),
            latency_ms: u64::try_from(latency.as_millis()).unwrap_or(u64::MAX),
        };
        if let Err(e) = self.sink.append(&entry) {
            tracing::warn!("audit log append failed: {}", e);
        }
    }

    /// Count a call rejected before it reached the pipeline (e.g. bad credentials)
    pub fn record_rejection(&self, ctx: &RequestContext, operation: &str, category: ErrorCategory) {
        self.telemetry.record(Err(category), ctx.arrived_at.elapsed());
        let entry = LogEntry {
            timestamp: Utc::now(),
            request_id: ctx.request_id.clone(),
            client_key: ctx.client_key.clone(),
            operation: operation.to_string(),
            channel: ctx.channel.clone(),
            model_id: None,
            error: Some(category),
            latency_ms: 0,
        };
        if let Err(e) = self.sink.append(&entry) {
            tracing::warn!("audit log append failed: {}", e);
        }
    }
}
