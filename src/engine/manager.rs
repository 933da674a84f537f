//! Model lifecycle management
//!
//! The manager owns the one resident model. Lifecycle:
//!
//! ```text
//! Available -> Downloading -> Available | Error
//! Available -> Loading     -> Loaded    | Error
//! Loaded    -> Unloading   -> Available | Error
//! ```
//!
//! Load and unload hold the transition lock for their whole duration; a
//! second transition is refused with [`Error::Conflict`] instead of queueing.
//! Descriptor state sits behind a separate registry lock that is held only
//! while a field is written, so listing never waits on a transition.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};

use super::{Executor, ModelLoader};
use crate::error::{Error, Result};
use crate::loader::{discover_artifacts, FetchRequest, ModelFormat, ProgressFn, Repository};
use crate::params::ParameterStore;
use crate::telemetry::ModelHealth;

const CATALOG_FILE: &str = "models.json";

/// Lifecycle status of one model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelStatus {
    Available,
    Downloading,
    Loading,
    Loaded,
    Unloading,
    Error,
}

impl std::fmt::Display for ModelStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ModelStatus::Available => "available",
            ModelStatus::Downloading => "downloading",
            ModelStatus::Loading => "loading",
            ModelStatus::Loaded => "loaded",
            ModelStatus::Unloading => "unloading",
            ModelStatus::Error => "error",
        };
        f.write_str(s)
    }
}

/// Everything known about one model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelDescriptor {
    pub id: String,
    /// Repository name the model was fetched from
    pub name: String,
    #[serde(default)]
    pub format: ModelFormat,
    /// Where the artifact came from (`hub`, `mirror`, `local`)
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub path: Option<PathBuf>,
    #[serde(default)]
    pub size_bytes: u64,
    pub status: ModelStatus,
    /// Download progress in percent
    #[serde(default)]
    pub progress: u8,
    #[serde(default)]
    pub last_error: Option<String>,
}

impl ModelDescriptor {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            format: ModelFormat::Unknown,
            source: None,
            path: None,
            size_bytes: 0,
            status: ModelStatus::Available,
            progress: 0,
            last_error: None,
        }
    }
}

/// Manager-wide view of the resident model
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelState {
    pub loaded_id: Option<String>,
    pub status: ModelStatus,
    pub loaded_at: Option<DateTime<Utc>>,
    /// Progress of the download in flight, if any
    pub download_progress: Option<u8>,
}

/// Result of a download call
#[derive(Debug, Clone, PartialEq)]
pub enum DownloadOutcome {
    /// The artifact was already local; nothing was fetched
    AlreadyPresent(ModelDescriptor),
    /// Another call is fetching this model; carries its current progress
    InProgress(ModelDescriptor),
    /// This call fetched the artifact
    Fetched(ModelDescriptor),
}

impl DownloadOutcome {
    pub fn descriptor(&self) -> &ModelDescriptor {
        match self {
            DownloadOutcome::AlreadyPresent(d)
            | DownloadOutcome::InProgress(d)
            | DownloadOutcome::Fetched(d) => d,
        }
    }
}

struct Resident {
    id: String,
    executor: Arc<Executor>,
    loaded_at: DateTime<Utc>,
}

#[derive(Default)]
struct Registry {
    models: BTreeMap<String, ModelDescriptor>,
    /// Engine in memory; its descriptor is `Loaded`, `Unloading`, or `Error`
    /// after a failed release
    resident: Option<Resident>,
}

impl Registry {
    fn model_mut(&mut self, id: &str) -> Result<&mut ModelDescriptor> {
        self.models
            .get_mut(id)
            .ok_or_else(|| Error::NotFound(id.to_string()))
    }

    fn set_status(&mut self, id: &str, status: ModelStatus, error: Option<String>) {
        if let Some(d) = self.models.get_mut(id) {
            d.status = status;
            d.last_error = error;
        }
    }

    fn resident_id(&self) -> Option<&str> {
        self.resident.as_ref().map(|r| r.id.as_str())
    }
}

/// State reachable from spawned download tasks
struct Shared {
    registry: RwLock<Registry>,
    catalog_path: PathBuf,
    catalog_lock: Mutex<()>,
}

impl Shared {
    /// Write the catalog; failures are logged, never surfaced
    fn persist(&self) {
        let _serialized = self.catalog_lock.lock();
        let snapshot: Vec<ModelDescriptor> =
            self.registry.read().models.values().cloned().collect();

        let write = || -> Result<()> {
            let json = serde_json::to_vec_pretty(&snapshot)?;
            let tmp = self.catalog_path.with_extension("json.tmp");
            std::fs::write(&tmp, json)?;
            std::fs::rename(&tmp, &self.catalog_path)?;
            Ok(())
        };
        if let Err(e) = write() {
            tracing::warn!("failed to write {}: {}", self.catalog_path.display(), e);
        }
    }
}

/// Exclusive-resource state machine for model artifacts
pub struct ModelManager {
    shared: Arc<Shared>,
    transition: tokio::sync::Mutex<()>,
    /// Read-held by each running download, write-held by model cleanup
    artifacts: Arc<tokio::sync::RwLock<()>>,
    repository: Arc<dyn Repository>,
    loader: Arc<dyn ModelLoader>,
    params: Arc<ParameterStore>,
    model_dir: PathBuf,
}

impl ModelManager {
    /// Restore the catalog and pick up artifacts already in `model_dir`
    ///
    /// Nothing is resident after a restart, so models recorded as loaded come
    /// back as `Available` and interrupted downloads come back as `Error`.
    pub fn open(
        model_dir: impl Into<PathBuf>,
        repository: Arc<dyn Repository>,
        loader: Arc<dyn ModelLoader>,
        params: Arc<ParameterStore>,
    ) -> Result<Self> {
        let model_dir = model_dir.into();
        std::fs::create_dir_all(&model_dir)?;
        let catalog_path = model_dir.join(CATALOG_FILE);

        let mut models = BTreeMap::new();
        for mut descriptor in read_catalog(&catalog_path)? {
            match descriptor.status {
                ModelStatus::Loaded | ModelStatus::Loading | ModelStatus::Unloading => {
                    descriptor.status = ModelStatus::Available;
                }
                ModelStatus::Downloading => {
                    descriptor.status = ModelStatus::Error;
                    descriptor.last_error = Some("download interrupted".to_string());
                }
                ModelStatus::Available | ModelStatus::Error => {}
            }
            models.insert(descriptor.id.clone(), descriptor);
        }

        for artifact in discover_artifacts(&model_dir)? {
            models.entry(artifact.id.clone()).or_insert_with(|| {
                let mut d = ModelDescriptor::new(artifact.id.clone(), artifact.id.clone());
                d.format = artifact.format;
                d.source = Some("local".to_string());
                d.path = Some(artifact.path);
                d.size_bytes = artifact.size_bytes;
                d.progress = 100;
                d
            });
        }

        for id in models.keys() {
            params.register(id)?;
        }
        tracing::info!("model catalog ready: {} known models", models.len());

        let manager = Self {
            shared: Arc::new(Shared {
                registry: RwLock::new(Registry {
                    models,
                    resident: None,
                }),
                catalog_path,
                catalog_lock: Mutex::new(()),
            }),
            transition: tokio::sync::Mutex::new(()),
            artifacts: Arc::new(tokio::sync::RwLock::new(())),
            repository,
            loader,
            params,
            model_dir,
        };
        manager.shared.persist();
        Ok(manager)
    }

    pub fn model_dir(&self) -> &Path {
        &self.model_dir
    }

    pub fn params(&self) -> &Arc<ParameterStore> {
        &self.params
    }

    /// Fetch a model's artifact unless it is already local or in flight
    ///
    /// The fetch runs as its own task, so a caller that stops waiting does
    /// not strand the descriptor in `Downloading`.
    pub async fn download(&self, request: FetchRequest) -> Result<DownloadOutcome> {
        let id = request.model_id();
        if id.is_empty() || id == "." || id == ".." {
            return Err(Error::validation("name", "model name is empty"));
        }

        let permit = {
            let mut registry = self.shared.registry.write();
            if let Some(existing) = registry.models.get(&id) {
                match existing.status {
                    ModelStatus::Downloading => {
                        return Ok(DownloadOutcome::InProgress(existing.clone()));
                    }
                    ModelStatus::Error if registry.resident_id() == Some(id.as_str()) => {
                        return Err(Error::conflict(format!(
                            "{id} is still resident after a failed unload; unload it first"
                        )));
                    }
                    ModelStatus::Error => {}
                    _ => return Ok(DownloadOutcome::AlreadyPresent(existing.clone())),
                }
            }
            let permit = Arc::clone(&self.artifacts)
                .try_read_owned()
                .map_err(|_| Error::conflict("model cleanup is in progress"))?;
            let mut descriptor = ModelDescriptor::new(id.clone(), request.name.clone());
            descriptor.status = ModelStatus::Downloading;
            descriptor.source = Some(request.name.clone());
            registry.models.insert(id.clone(), descriptor);
            permit
        };
        self.shared.persist();
        tracing::info!("downloading {} as {}", request.name, id);

        let shared = Arc::clone(&self.shared);
        let progress: ProgressFn = {
            let shared = Arc::clone(&self.shared);
            let id = id.clone();
            Arc::new(move |pct| {
                if let Some(d) = shared.registry.write().models.get_mut(&id) {
                    if d.status == ModelStatus::Downloading {
                        d.progress = pct.min(100);
                    }
                }
            })
        };
        let repository = Arc::clone(&self.repository);
        let params = Arc::clone(&self.params);

        let task = tokio::spawn(async move {
            let _permit = permit;
            let fetched = repository.fetch(&request, progress).await;
            let outcome = {
                let mut registry = shared.registry.write();
                let descriptor = registry.model_mut(&id)?;
                match fetched {
                    Ok(artifact) => {
                        descriptor.status = ModelStatus::Available;
                        descriptor.path = Some(artifact.path);
                        descriptor.format = artifact.format;
                        descriptor.size_bytes = artifact.size_bytes;
                        descriptor.progress = 100;
                        descriptor.last_error = None;
                        Ok(descriptor.clone())
                    }
                    Err(e) => {
                        descriptor.status = ModelStatus::Error;
                        descriptor.last_error = Some(e.to_string());
                        Err(e)
                    }
                }
            };
            shared.persist();

            match outcome {
                Ok(descriptor) => {
                    tracing::info!(
                        "downloaded {} ({} bytes, {})",
                        descriptor.id,
                        descriptor.size_bytes,
                        descriptor.format
                    );
                    if let Err(e) = params.register(&descriptor.id) {
                        tracing::warn!("parameter set for {}: {}", descriptor.id, e);
                    }
                    Ok(DownloadOutcome::Fetched(descriptor))
                }
                Err(e) => {
                    tracing::error!("download of {} failed: {}", id, e);
                    Err(e)
                }
            }
        });

        task.await
            .map_err(|e| Error::repository(format!("download task failed: {e}")))?
    }

    /// Make `id` the resident model
    ///
    /// A different resident model is swapped out only after the new one has
    /// loaded. If the new load fails the old model stays resident. Loading the
    /// model that is already loaded is a no-op.
    pub async fn load(&self, id: &str) -> Result<ModelDescriptor> {
        let _transition = self
            .transition
            .try_lock()
            .map_err(|_| Error::conflict("another load or unload is in progress"))?;

        let descriptor = {
            let mut registry = self.shared.registry.write();
            let engine_resident = registry.resident_id() == Some(id);
            let descriptor = registry.model_mut(id)?;
            match descriptor.status {
                ModelStatus::Loaded => return Ok(descriptor.clone()),
                ModelStatus::Available | ModelStatus::Error if !engine_resident => {}
                ModelStatus::Error => {
                    return Err(Error::conflict(format!(
                        "{id} is still resident after a failed unload; unload it first"
                    )));
                }
                status => {
                    return Err(Error::conflict(format!("{id} is {status}, cannot load")));
                }
            }
            descriptor.status = ModelStatus::Loading;
            descriptor.last_error = None;
            descriptor.clone()
        };
        self.shared.persist();
        tracing::info!("loading model {}", id);

        let engine = match self.loader.load(&descriptor).await {
            Ok(engine) => engine,
            Err(e) => {
                self.shared
                    .registry
                    .write()
                    .set_status(id, ModelStatus::Error, Some(e.to_string()));
                self.shared.persist();
                tracing::error!("failed to load {}: {}", id, e);
                return Err(e);
            }
        };
        let executor = Arc::new(Executor::new(id, engine));

        let previous = {
            let mut registry = self.shared.registry.write();
            let previous = registry
                .resident
                .as_ref()
                .map(|r| (r.id.clone(), Arc::clone(&r.executor)));
            if let Some((old_id, _)) = &previous {
                registry.set_status(old_id, ModelStatus::Unloading, None);
            }
            previous
        };

        if let Some((old_id, old_executor)) = previous {
            tracing::info!("swapping out {} for {}", old_id, id);
            if let Err(e) = old_executor.release().await {
                {
                    let mut registry = self.shared.registry.write();
                    registry.set_status(&old_id, ModelStatus::Error, Some(e.to_string()));
                    registry.set_status(
                        id,
                        ModelStatus::Error,
                        Some(format!("swap aborted: releasing {old_id} failed")),
                    );
                }
                self.shared.persist();
                if let Err(release_err) = executor.release().await {
                    tracing::warn!("releasing new engine for {}: {}", id, release_err);
                }
                tracing::error!("failed to release {} during swap: {}", old_id, e);
                return Err(e);
            }
        }

        let loaded = {
            let mut registry = self.shared.registry.write();
            if let Some(old) = registry.resident.take() {
                registry.set_status(&old.id, ModelStatus::Available, None);
            }
            registry.resident = Some(Resident {
                id: id.to_string(),
                executor,
                loaded_at: Utc::now(),
            });
            let descriptor = registry.model_mut(id)?;
            descriptor.status = ModelStatus::Loaded;
            descriptor.clone()
        };
        self.shared.persist();
        tracing::info!("model {} loaded", id);
        Ok(loaded)
    }

    /// Release the resident model
    ///
    /// Valid from `Loaded`, or from `Error` when a previous release failed and
    /// the engine is still in memory. A failed release leaves the model in
    /// `Error` until an operator retries.
    pub async fn unload(&self, id: &str) -> Result<ModelDescriptor> {
        let _transition = self
            .transition
            .try_lock()
            .map_err(|_| Error::conflict("another load or unload is in progress"))?;
        self.unload_locked(id).await
    }

    async fn unload_locked(&self, id: &str) -> Result<ModelDescriptor> {
        let executor = {
            let mut registry = self.shared.registry.write();
            let executor = registry
                .resident
                .as_ref()
                .filter(|r| r.id == id)
                .map(|r| Arc::clone(&r.executor));
            let descriptor = registry.model_mut(id)?;
            let executor = match (descriptor.status, executor) {
                (ModelStatus::Loaded | ModelStatus::Error, Some(executor)) => executor,
                (status, _) => {
                    return Err(Error::conflict(format!("{id} is {status}, not loaded")));
                }
            };
            descriptor.status = ModelStatus::Unloading;
            executor
        };
        self.shared.persist();
        tracing::info!("unloading model {}", id);

        let result = executor.release().await;
        let descriptor = {
            let mut registry = self.shared.registry.write();
            match &result {
                Ok(()) => {
                    registry.resident = None;
                    registry.set_status(id, ModelStatus::Available, None);
                }
                Err(e) => registry.set_status(id, ModelStatus::Error, Some(e.to_string())),
            }
            registry.model_mut(id)?.clone()
        };
        self.shared.persist();

        match result {
            Ok(()) => {
                tracing::info!("model {} unloaded", id);
                Ok(descriptor)
            }
            Err(e) => {
                tracing::error!("failed to unload {}: {}", id, e);
                Err(e)
            }
        }
    }

    /// All known models
    pub fn list(&self) -> Vec<ModelDescriptor> {
        self.shared.registry.read().models.values().cloned().collect()
    }

    pub fn get(&self, id: &str) -> Result<ModelDescriptor> {
        self.shared
            .registry
            .read()
            .models
            .get(id)
            .cloned()
            .ok_or_else(|| Error::NotFound(id.to_string()))
    }

    pub fn contains(&self, id: &str) -> bool {
        self.shared.registry.read().models.contains_key(id)
    }

    pub fn state(&self) -> ModelState {
        let registry = self.shared.registry.read();
        let transitioning = registry
            .models
            .values()
            .find(|d| matches!(d.status, ModelStatus::Loading | ModelStatus::Unloading))
            .map(|d| d.status);
        let resident = registry
            .resident
            .as_ref()
            .and_then(|r| registry.models.get(&r.id).map(|d| (r, d.status)));

        let status = transitioning
            .or(resident.map(|(_, status)| status))
            .unwrap_or(ModelStatus::Available);
        ModelState {
            loaded_id: resident
                .filter(|(_, s)| *s == ModelStatus::Loaded)
                .map(|(r, _)| r.id.clone()),
            status,
            loaded_at: resident.map(|(r, _)| r.loaded_at),
            download_progress: registry
                .models
                .values()
                .find(|d| d.status == ModelStatus::Downloading)
                .map(|d| d.progress),
        }
    }

    /// Executor for the resident model, if it is serving
    pub fn active_executor(&self) -> Result<Arc<Executor>> {
        let registry = self.shared.registry.read();
        let resident = registry.resident.as_ref().ok_or(Error::NotLoaded)?;
        match registry.models.get(&resident.id).map(|d| d.status) {
            Some(ModelStatus::Loaded) => Ok(Arc::clone(&resident.executor)),
            _ => Err(Error::NotLoaded),
        }
    }

    pub fn model_health(&self) -> ModelHealth {
        let state = self.state();
        ModelHealth {
            loaded: state.loaded_id.is_some(),
            name: state.loaded_id,
        }
    }

    /// Run `f` while no transition or download can start
    ///
    /// `f` receives the artifact paths that must be kept: the resident
    /// engine's and those of models mid-transition. Fails with `Conflict`
    /// instead of waiting when a load, unload or download is running.
    pub fn with_idle_models<T>(&self, f: impl FnOnce(&[PathBuf]) -> Result<T>) -> Result<T> {
        let _transition = self
            .transition
            .try_lock()
            .map_err(|_| Error::conflict("a load or unload is in progress"))?;
        let _artifacts = self
            .artifacts
            .try_write()
            .map_err(|_| Error::conflict("a download is in progress"))?;

        let in_use: Vec<PathBuf> = {
            let registry = self.shared.registry.read();
            let resident = registry
                .resident_id()
                .and_then(|id| registry.models.get(id))
                .and_then(|d| d.path.clone());
            registry
                .models
                .values()
                .filter(|d| {
                    matches!(
                        d.status,
                        ModelStatus::Downloading | ModelStatus::Loading | ModelStatus::Unloading
                    )
                })
                .filter_map(|d| d.path.clone())
                .chain(resident)
                .collect()
        };
        f(&in_use)
    }

    /// Forget idle models whose artifact is gone from disk
    pub fn prune_missing(&self) -> Vec<String> {
        let removed: Vec<String> = {
            let mut registry = self.shared.registry.write();
            let resident = registry.resident_id().map(str::to_string);
            let gone: Vec<String> = registry
                .models
                .values()
                .filter(|d| matches!(d.status, ModelStatus::Available | ModelStatus::Error))
                .filter(|d| Some(&d.id) != resident.as_ref())
                .filter(|d| d.path.as_ref().is_some_and(|p| !p.exists()))
                .map(|d| d.id.clone())
                .collect();
            for id in &gone {
                registry.models.remove(id);
            }
            gone
        };
        if !removed.is_empty() {
            tracing::info!("pruned {} models with missing artifacts", removed.len());
            self.shared.persist();
        }
        removed
    }

    /// Unload the resident model and flush the catalog
    ///
    /// Waits for any transition in flight instead of refusing.
    pub async fn shutdown(&self) -> Result<()> {
        let _transition = self.transition.lock().await;
        let resident = self.shared.registry.read().resident_id().map(str::to_string);
        if let Some(id) = resident {
            self.unload_locked(&id).await?;
        }
        self.shared.persist();
        Ok(())
    }
}

fn read_catalog(path: &Path) -> Result<Vec<ModelDescriptor>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let content = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&content)?)
}
