//! Built-in development engine
//!
//! Echoes the prompt back one word per step, honoring `maxLength` and the
//! cancellation token. Lets the server run end to end without a generation
//! backend.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::{InferenceEngine, ModelDescriptor, ModelLoader};
use crate::error::{Error, Result};
use crate::params::GenerationParams;

/// Loads [`EchoEngine`]s for any artifact that exists on disk
#[derive(Debug, Clone, Default)]
pub struct EchoLoader {
    step_delay: Duration,
}

impl EchoLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pause between generated words; simulates a slow backend
    pub fn with_step_delay(mut self, delay: Duration) -> Self {
        self.step_delay = delay;
        self
    }
}

#[async_trait]
impl ModelLoader for EchoLoader {
    async fn load(&self, descriptor: &ModelDescriptor) -> Result<Arc<dyn InferenceEngine>> {
        let path = descriptor
            .path
            .as_ref()
            .ok_or_else(|| Error::engine(format!("{} has no local artifact", descriptor.id)))?;
        if !tokio::fs::try_exists(path).await? {
            return Err(Error::engine(format!(
                "artifact for {} missing at {}",
                descriptor.id,
                path.display()
            )));
        }
        tracing::debug!("echo engine ready for {}", descriptor.id);
        Ok(Arc::new(EchoEngine {
            model_id: descriptor.id.clone(),
            step_delay: self.step_delay,
            released: AtomicBool::new(false),
        }))
    }
}

pub struct EchoEngine {
    model_id: String,
    step_delay: Duration,
    released: AtomicBool,
}

#[async_trait]
impl InferenceEngine for EchoEngine {
    async fn generate(
        &self,
        prompt: &str,
        params: &GenerationParams,
        cancel: &CancellationToken,
    ) -> Result<String> {
        if self.released.load(Ordering::Acquire) {
            return Err(Error::engine(format!("{} was released", self.model_id)));
        }

        let mut words = Vec::new();
        for word in prompt.split_whitespace().take(params.max_length as usize) {
            if cancel.is_cancelled() {
                return Err(Error::engine("generation cancelled"));
            }
            words.push(word);
            if self.step_delay.is_zero() {
                tokio::task::yield_now().await;
            } else {
                tokio::time::sleep(self.step_delay).await;
            }
        }
        Ok(words.join(" "))
    }

    async fn release(&self) -> Result<()> {
        self.released.store(true, Ordering::Release);
        Ok(())
    }
}
