//! CLI commands
//!
//! `serve` runs the admission-controlled HTTP service; `pull` and `list`
//! manage the model directory without starting it.

mod list;
mod pull;
mod serve;

pub use list::list;
pub use pull::pull;
pub use serve::serve;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Vigil - model lifecycle and request admission for inference services
#[derive(Parser)]
#[command(name = "vigil")]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the HTTP service
    Serve {
        /// Configuration file (YAML or JSON)
        #[arg(long, short)]
        config: Option<PathBuf>,

        /// Model id to load at startup
        #[arg(long, short)]
        model: Option<String>,

        /// Port to listen on (overrides the config file)
        #[arg(long)]
        port: Option<u16>,

        /// Host to bind to (overrides the config file)
        #[arg(long)]
        host: Option<String>,
    },

    /// Download a model from the HuggingFace Hub
    Pull {
        /// Repository ID (e.g., "TheBloke/Mistral-7B-v0.1-GGUF")
        repo: String,

        /// Preferred weights format (gguf, safetensors, pytorch, onnx)
        #[arg(long)]
        format: Option<String>,

        /// Model directory to download into
        #[arg(long, short)]
        output: Option<PathBuf>,
    },

    /// List models in the model directory
    List {
        /// Show path and size
        #[arg(long, short)]
        verbose: bool,

        /// Model directory to scan
        #[arg(long)]
        dir: Option<PathBuf>,
    },
}

/// Model directory from `VIGIL_MODEL_DIR`, falling back to `./models`
pub(crate) fn default_model_dir() -> PathBuf {
    std::env::var("VIGIL_MODEL_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("./models"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_serve_overrides() {
        let cli = Cli::parse_from(["vigil", "serve", "--port", "9000", "-m", "tiny"]);
        match cli.command {
            Commands::Serve {
                port, model, host, ..
            } => {
                assert_eq!(port, Some(9000));
                assert_eq!(model.as_deref(), Some("tiny"));
                assert_eq!(host, None);
            }
            _ => panic!("expected serve"),
        }
    }

    #[test]
    fn test_parse_pull_with_format() {
        let cli = Cli::parse_from(["vigil", "pull", "org/model", "--format", "gguf"]);
        assert!(matches!(
            cli.command,
            Commands::Pull { ref repo, format: Some(ref f), .. } if repo == "org/model" && f == "gguf"
        ));
    }
}
