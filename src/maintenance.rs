//! Disk cleanup
//!
//! Reclaims space from old logs, the hub download cache, idle model
//! artifacts and the scratch directory. The resident model's artifact is
//! never touched.

use std::path::Path;
use std::sync::Arc;

use serde::Serialize;
use walkdir::WalkDir;

use crate::config::StorageConfig;
use crate::engine::ModelManager;
use crate::error::Result;
use crate::logs::{log_files_newest_first, Removal};
use crate::loader::size_on_disk;

/// Outcome of one cleanup operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanupReport {
    pub operation: String,
    pub files_removed: u64,
    pub space_freed: u64,
    /// Per-step reports for `full_cleanup`
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub results: Vec<CleanupReport>,
}

impl CleanupReport {
    fn new(operation: &str, removal: Removal) -> Self {
        Self {
            operation: operation.to_string(),
            files_removed: removal.files_removed,
            space_freed: removal.space_freed,
            results: Vec::new(),
        }
    }
}

/// Cleanup targets accepted by the API
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, serde::Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CleanupTarget {
    Logs,
    Cache,
    Models,
    Temp,
    #[default]
    Full,
}

pub struct Janitor {
    storage: StorageConfig,
    models: Arc<ModelManager>,
}

impl Janitor {
    pub fn new(storage: StorageConfig, models: Arc<ModelManager>) -> Self {
        Self { storage, models }
    }

    pub fn log_dir(&self) -> &Path {
        &self.storage.log_dir
    }

    pub fn run(&self, target: CleanupTarget) -> Result<CleanupReport> {
        match target {
            CleanupTarget::Logs => self.clean_logs(),
            CleanupTarget::Cache => self.clean_cache(),
            CleanupTarget::Models => self.clean_models(),
            CleanupTarget::Temp => self.clean_temp(),
            CleanupTarget::Full => self.full_cleanup(),
        }
    }

    /// Delete every log file except the newest
    pub fn clean_logs(&self) -> Result<CleanupReport> {
        let mut removal = Removal::default();
        for (path, _, size) in log_files_newest_first(&self.storage.log_dir)?
            .into_iter()
            .skip(1)
        {
            std::fs::remove_file(&path)?;
            removal.add(size);
        }
        Ok(CleanupReport::new("clean_logs", removal))
    }

    /// Empty the hub download cache
    pub fn clean_cache(&self) -> Result<CleanupReport> {
        let cache = self.storage.model_dir.join(".hf-cache");
        Ok(CleanupReport::new("clean_cache", remove_files_under(&cache)))
    }

    /// Delete artifacts of idle models
    ///
    /// Anything resident, loading, unloading or downloading is kept. Fails
    /// with `Conflict` while a transition or download is running.
    pub fn clean_models(&self) -> Result<CleanupReport> {
        let model_dir = &self.storage.model_dir;
        let (removal, pruned) = self.models.with_idle_models(|in_use| {
            let mut removal = Removal::default();
            if model_dir.exists() {
                for entry in std::fs::read_dir(model_dir)? {
                    let path = entry?.path();
                    let hidden = path
                        .file_name()
                        .and_then(|n| n.to_str())
                        .map_or(true, |n| n.starts_with('.') || n == "models.json");
                    if hidden || in_use.iter().any(|b| b.starts_with(&path) || path.starts_with(b)) {
                        continue;
                    }
                    let size = size_on_disk(&path);
                    if path.is_dir() {
                        std::fs::remove_dir_all(&path)?;
                    } else {
                        std::fs::remove_file(&path)?;
                    }
                    removal.add(size);
                }
            }
            Ok((removal, self.models.prune_missing()))
        })?;
        tracing::info!("removed {} model artifacts, forgot {:?}", removal.files_removed, pruned);
        Ok(CleanupReport::new("clean_models", removal))
    }

    /// Empty the scratch directory
    pub fn clean_temp(&self) -> Result<CleanupReport> {
        Ok(CleanupReport::new(
            "clean_temp",
            remove_files_under(&self.storage.temp_dir),
        ))
    }

    /// Run every cleanup step
    pub fn full_cleanup(&self) -> Result<CleanupReport> {
        let results = vec![
            self.clean_logs()?,
            self.clean_cache()?,
            self.clean_models()?,
            self.clean_temp()?,
        ];
        let mut report = CleanupReport::new("full_cleanup", Removal::default());
        for step in &results {
            report.files_removed += step.files_removed;
            report.space_freed += step.space_freed;
        }
        report.results = results;
        tracing::info!("full cleanup freed {} bytes", report.space_freed);
        Ok(report)
    }
}

/// Best-effort removal of every file below `root`
fn remove_files_under(root: &Path) -> Removal {
    let mut removal = Removal::default();
    for entry in WalkDir::new(root).into_iter().filter_map(|e| e.ok()) {
        if !entry.file_type().is_file() {
            continue;
        }
        let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
        match std::fs::remove_file(entry.path()) {
            Ok(()) => removal.add(size),
            Err(e) => tracing::debug!("skipping {}: {}", entry.path().display(), e),
        }
    }
    removal
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{EchoLoader, ModelLoader};
    use crate::loader::{FetchRequest, MirrorRepository, Repository};
    use crate::params::ParameterStore;

    async fn setup() -> (tempfile::TempDir, Janitor, Arc<ModelManager>) {
        let root = tempfile::tempdir().unwrap();
        let storage = StorageConfig::rooted_at(root.path());
        storage.ensure_dirs().unwrap();

        let mirror = root.path().join("mirror");
        for id in ["a", "b"] {
            std::fs::create_dir_all(mirror.join(id)).unwrap();
            std::fs::write(mirror.join(id).join("model.gguf"), vec![0u8; 100]).unwrap();
        }
        let models = Arc::new(
            ModelManager::open(
                &storage.model_dir,
                Arc::new(MirrorRepository::new(&mirror, &storage.model_dir)) as Arc<dyn Repository>,
                Arc::new(EchoLoader::new()) as Arc<dyn ModelLoader>,
                Arc::new(ParameterStore::in_memory()),
            )
            .unwrap(),
        );
        models.download(FetchRequest::new("a")).await.unwrap();
        models.download(FetchRequest::new("b")).await.unwrap();
        models.load("a").await.unwrap();

        let janitor = Janitor::new(storage, Arc::clone(&models));
        (root, janitor, models)
    }

    #[tokio::test]
    async fn test_clean_models_spares_resident() {
        let (_root, janitor, models) = setup().await;
        let report = janitor.clean_models().unwrap();
        assert_eq!(report.files_removed, 1);
        assert_eq!(report.space_freed, 100);
        assert!(models.contains("a"));
        assert!(!models.contains("b"));
        assert!(models.active_executor().is_ok());
    }

    #[tokio::test]
    async fn test_clean_logs_keeps_newest() {
        let (_root, janitor, _) = setup().await;
        let log_dir = janitor.storage.log_dir.clone();
        for name in ["old.log", "older.log"] {
            std::fs::write(log_dir.join(name), b"12345").unwrap();
        }
        std::thread::sleep(std::time::Duration::from_millis(20));
        std::fs::write(log_dir.join("new.log"), b"12345").unwrap();

        let report = janitor.clean_logs().unwrap();
        assert_eq!(report.files_removed, 2);
        assert!(log_dir.join("new.log").exists());
    }

    #[tokio::test]
    async fn test_full_cleanup_aggregates_steps() {
        let (_root, janitor, _) = setup().await;
        std::fs::write(janitor.storage.temp_dir.join("scratch.bin"), vec![0u8; 7]).unwrap();
        let cache = janitor.storage.model_dir.join(".hf-cache");
        std::fs::create_dir_all(&cache).unwrap();
        std::fs::write(cache.join("blob"), vec![0u8; 3]).unwrap();

        let report = janitor.run(CleanupTarget::Full).unwrap();
        assert_eq!(report.operation, "full_cleanup");
        let ops: Vec<_> = report.results.iter().map(|r| r.operation.as_str()).collect();
        assert_eq!(ops, vec!["clean_logs", "clean_cache", "clean_models", "clean_temp"]);
        assert_eq!(report.space_freed, 3 + 100 + 7);
        assert_eq!(
            report.files_removed,
            report.results.iter().map(|r| r.files_removed).sum::<u64>()
        );
    }
}
