//! Service wiring
//!
//! Builds every component from a [`VigilConfig`] in dependency order and owns
//! the background tasks, so startup and teardown are explicit calls rather
//! than side effects of first use.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::admission::{DeadlineGuard, RateLimiter};
use crate::config::{EngineBackend, VigilConfig};
use crate::engine::{EchoLoader, ModelLoader, ModelManager};
use crate::error::Result;
use crate::gateway::RequestGateway;
use crate::loader::{HubRepository, MirrorRepository, Repository};
use crate::logs::{JsonLinesSink, LogSink, MultiSink, TracingSink};
use crate::maintenance::Janitor;
use crate::params::ParameterStore;
use crate::telemetry::{ResourceProbe, SysinfoProbe, TelemetryHub};

/// Everything the HTTP layer needs, built once at startup
pub struct Services {
    pub config: VigilConfig,
    pub gateway: Arc<RequestGateway>,
    pub janitor: Arc<Janitor>,
    shutdown: CancellationToken,
    sweeper: Option<JoinHandle<()>>,
}

impl Services {
    /// Build services that read real host gauges
    pub async fn start(config: VigilConfig) -> Result<Self> {
        Self::start_with_probe(config, Box::new(SysinfoProbe::new())).await
    }

    /// Build services with a custom host probe
    pub async fn start_with_probe(config: VigilConfig, probe: Box<dyn ResourceProbe>) -> Result<Self> {
        config.storage.ensure_dirs()?;
        if config.auth.uses_placeholder_secrets() {
            tracing::warn!("using placeholder credentials; set VIGIL_API_KEY and VIGIL_ADMIN_TOKEN");
        }

        let params = Arc::new(ParameterStore::open(config.storage.params_dir.as_deref())?);
        let repository: Arc<dyn Repository> = match &config.storage.mirror_dir {
            Some(mirror) => {
                tracing::info!("serving downloads from mirror {}", mirror.display());
                Arc::new(MirrorRepository::new(mirror, &config.storage.model_dir))
            }
            None => Arc::new(HubRepository::new(
                &config.storage.model_dir,
                config.auth.hf_token.clone(),
            )),
        };
        let loader: Arc<dyn ModelLoader> = match config.engine.backend {
            EngineBackend::Echo => Arc::new(EchoLoader::new()),
        };
        let models = Arc::new(ModelManager::open(
            &config.storage.model_dir,
            repository,
            loader,
            params,
        )?);

        let limiter = Arc::new(RateLimiter::new(config.rate_limit.clone()));
        let shutdown = CancellationToken::new();
        let sweeper = limiter.spawn_sweeper(shutdown.child_token());

        let sink: Arc<dyn LogSink> = Arc::new(MultiSink(vec![
            Box::new(JsonLinesSink::new(&config.storage.log_dir)?),
            Box::new(TracingSink),
        ]));
        let telemetry = Arc::new(TelemetryHub::new(probe, config.health.clone()));

        let gateway = Arc::new(RequestGateway::new(
            limiter,
            Arc::clone(&models),
            DeadlineGuard::new(config.deadline.request_timeout()),
            DeadlineGuard::new(config.deadline.load_timeout()),
            telemetry,
            sink,
        ));
        let janitor = Arc::new(Janitor::new(config.storage.clone(), Arc::clone(&models)));

        if let Some(id) = &config.engine.preload {
            tracing::info!("pre-loading model {}", id);
            if let Err(e) = models.load(id).await {
                shutdown.cancel();
                if let Err(join) = sweeper.await {
                    tracing::warn!("rate-limit sweeper ended abnormally: {}", join);
                }
                return Err(e);
            }
        }

        Ok(Self {
            config,
            gateway,
            janitor,
            shutdown,
            sweeper: Some(sweeper),
        })
    }

    /// Stop background tasks and unload the resident model
    pub async fn shutdown(mut self) -> Result<()> {
        self.shutdown.cancel();
        if let Some(sweeper) = self.sweeper.take() {
            if let Err(e) = sweeper.await {
                tracing::warn!("rate-limit sweeper ended abnormally: {}", e);
            }
        }
        self.gateway.models().shutdown().await?;
        tracing::info!("services stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StorageConfig;
    use crate::telemetry::StaticProbe;

    #[tokio::test]
    async fn test_start_preloads_and_shuts_down() {
        let root = tempfile::tempdir().unwrap();
        let mut config = VigilConfig {
            storage: StorageConfig::rooted_at(root.path()),
            ..VigilConfig::default()
        };
        config.storage.ensure_dirs().unwrap();
        std::fs::write(config.storage.model_dir.join("tiny.gguf"), b"GGUF").unwrap();
        config.engine.preload = Some("tiny".to_string());

        let services = Services::start_with_probe(config, Box::new(StaticProbe::with_usage(5.0, 5.0)))
            .await
            .unwrap();
        let models = Arc::clone(services.gateway.models());
        assert_eq!(models.state().loaded_id.as_deref(), Some("tiny"));
        assert!(services.gateway.params().contains("tiny"));

        services.shutdown().await.unwrap();
        assert_eq!(models.state().loaded_id, None);
    }

    #[tokio::test]
    async fn test_preload_of_unknown_model_fails() {
        let root = tempfile::tempdir().unwrap();
        let mut config = VigilConfig {
            storage: StorageConfig::rooted_at(root.path()),
            ..VigilConfig::default()
        };
        config.engine.preload = Some("ghost".to_string());
        // Returning at all means the sweeper was stopped and joined.
        let started = tokio::time::timeout(
            std::time::Duration::from_secs(5),
            Services::start_with_probe(config, Box::new(StaticProbe(None))),
        )
        .await
        .expect("start did not return after a failed preload");
        let err = started.err().unwrap();
        assert!(matches!(err, crate::Error::NotFound(_)));
    }
}
