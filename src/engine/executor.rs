//! Inference executor
//!
//! Wraps the resident engine and serializes calls against it.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use super::ModelDescriptor;
use crate::error::{Error, Result};
use crate::params::GenerationParams;

/// A loaded generation backend
#[async_trait]
pub trait InferenceEngine: Send + Sync {
    /// Produce text for `prompt`
    ///
    /// Implementations check `cancel` between steps and return
    /// [`Error::Timeout`] or an engine error once it fires.
    async fn generate(
        &self,
        prompt: &str,
        params: &GenerationParams,
        cancel: &CancellationToken,
    ) -> Result<String>;

    /// Free the resources held by this engine
    async fn release(&self) -> Result<()>;
}

/// Turns an artifact on disk into a running engine
#[async_trait]
pub trait ModelLoader: Send + Sync {
    async fn load(&self, descriptor: &ModelDescriptor) -> Result<Arc<dyn InferenceEngine>>;
}

/// Inference executor
///
/// Owns the engine for the resident model. Generation and release both take
/// the execution lock, so release waits for in-flight work to drain.
pub struct Executor {
    model_id: String,
    engine: Arc<dyn InferenceEngine>,
    exec_lock: Mutex<()>,
}

impl Executor {
    pub fn new(model_id: impl Into<String>, engine: Arc<dyn InferenceEngine>) -> Self {
        Self {
            model_id: model_id.into(),
            engine,
            exec_lock: Mutex::new(()),
        }
    }

    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    /// Generate text, waiting for earlier calls to finish first
    ///
    /// A caller still queued when `cancel` fires leaves without running.
    pub async fn generate_text(
        &self,
        prompt: &str,
        params: &GenerationParams,
        cancel: &CancellationToken,
    ) -> Result<String> {
        let _guard = tokio::select! {
            guard = self.exec_lock.lock() => guard,
            _ = cancel.cancelled() => {
                return Err(Error::engine("cancelled while waiting for the model"));
            }
        };
        tracing::debug!(model = %self.model_id, "generation started");
        self.engine.generate(prompt, params, cancel).await
    }

    /// Release the engine once no generation is running
    pub async fn release(&self) -> Result<()> {
        let _guard = self.exec_lock.lock().await;
        self.engine.release().await
    }
}
