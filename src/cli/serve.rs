//! HTTP server command

use std::path::PathBuf;

use anyhow::Result;

use crate::app::Services;
use crate::config::VigilConfig;
use crate::server;

/// Start the service
pub async fn serve(
    config_path: Option<PathBuf>,
    model: Option<String>,
    port: Option<u16>,
    host: Option<String>,
) -> Result<()> {
    let mut config = match config_path {
        Some(path) => {
            tracing::info!("Loading configuration from {}", path.display());
            VigilConfig::from_path(&path)?
        }
        None => VigilConfig::default(),
    }
    .with_env_overrides();

    if let Some(port) = port {
        config.server.port = port;
    }
    if let Some(host) = host {
        config.server.host = host;
    }
    if model.is_some() {
        config.engine.preload = model;
    }
    config.validate()?;

    tracing::info!("Starting server at http://{}", config.server.addr());
    let services = Services::start(config).await?;
    server::start(services).await?;

    Ok(())
}
