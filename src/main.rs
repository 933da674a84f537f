use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use vigil::cli::{Cli, Commands};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "vigil=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve {
            config,
            model,
            port,
            host,
        } => {
            vigil::cli::serve(config, model, port, host).await?;
        }
        Commands::Pull {
            repo,
            format,
            output,
        } => {
            vigil::cli::pull(repo, format, output).await?;
        }
        Commands::List { verbose, dir } => {
            vigil::cli::list(verbose, dir).await?;
        }
    }

    Ok(())
}
