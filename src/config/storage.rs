//! On-disk locations

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Directories used for artifacts, parameter sets, logs and scratch files
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Downloaded artifacts and the `models.json` catalog
    #[serde(default = "default_model_dir")]
    pub model_dir: PathBuf,

    /// Persisted parameter sets (`<model-id>.json`); `None` keeps them in memory
    #[serde(default = "default_params_dir")]
    pub params_dir: Option<PathBuf>,

    /// Request log files
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,

    /// Scratch space emptied by cleanup
    #[serde(default = "default_temp_dir")]
    pub temp_dir: PathBuf,

    /// Serve downloads from this local mirror instead of the HuggingFace Hub
    #[serde(default)]
    pub mirror_dir: Option<PathBuf>,
}

fn default_model_dir() -> PathBuf {
    PathBuf::from("./models")
}

fn default_params_dir() -> Option<PathBuf> {
    Some(PathBuf::from("./params"))
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("./logs")
}

fn default_temp_dir() -> PathBuf {
    std::env::temp_dir().join("vigil")
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            model_dir: default_model_dir(),
            params_dir: default_params_dir(),
            log_dir: default_log_dir(),
            temp_dir: default_temp_dir(),
            mirror_dir: None,
        }
    }
}

impl StorageConfig {
    /// All paths rooted under `root`; handy for tests and sandboxes
    pub fn rooted_at(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            model_dir: root.join("models"),
            params_dir: Some(root.join("params")),
            log_dir: root.join("logs"),
            temp_dir: root.join("tmp"),
            mirror_dir: None,
        }
    }

    /// Create every configured directory
    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.model_dir)?;
        if let Some(dir) = &self.params_dir {
            std::fs::create_dir_all(dir)?;
        }
        std::fs::create_dir_all(&self.log_dir)?;
        std::fs::create_dir_all(&self.temp_dir)?;
        Ok(())
    }
}
