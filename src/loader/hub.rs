//! HuggingFace Hub repository

use std::path::PathBuf;

use async_trait::async_trait;
use hf_hub::api::sync::ApiBuilder;
use hf_hub::api::Progress;

use super::{FetchRequest, FetchedArtifact, ModelFormat, ProgressFn, Repository};
use crate::error::{Error, Result};

/// Downloads weights from the HuggingFace Hub into the model directory
///
/// Files land in `<model_dir>/<model-id>/<file>`; the hub's own cache lives
/// under `<model_dir>/.hf-cache`.
pub struct HubRepository {
    model_dir: PathBuf,
    default_token: Option<String>,
}

impl HubRepository {
    pub fn new(model_dir: impl Into<PathBuf>, default_token: Option<String>) -> Self {
        Self {
            model_dir: model_dir.into(),
            default_token,
        }
    }

    fn fetch_blocking(
        model_dir: PathBuf,
        request: FetchRequest,
        token: Option<String>,
        progress: ProgressFn,
    ) -> Result<FetchedArtifact> {
        let api = ApiBuilder::new()
            .with_progress(false)
            .with_cache_dir(model_dir.join(".hf-cache"))
            .with_token(token)
            .build()
            .map_err(|e| Error::repository(format!("hub client: {e}")))?;
        let repo_api = api.model(request.name.clone());

        let info = repo_api
            .info()
            .map_err(|e| Error::repository(format!("listing {}: {e}", request.name)))?;
        let files: Vec<String> = info.siblings.into_iter().map(|s| s.rfilename).collect();
        let filename = pick_weights_file(&files, request.format).ok_or_else(|| {
            Error::repository(format!("no suitable model file found for {}", request.name))
        })?;

        tracing::info!("downloading {} from {}", filename, request.name);
        let cached = repo_api
            .download_with_progress(&filename, PercentProgress::new(progress.clone()))
            .map_err(|e| Error::repository(format!("downloading {filename}: {e}")))?;

        let dest_dir = model_dir.join(request.model_id());
        std::fs::create_dir_all(&dest_dir)?;
        let file_name = std::path::Path::new(&filename)
            .file_name()
            .map(|n| n.to_os_string())
            .ok_or_else(|| Error::repository(format!("bad file name {filename}")))?;
        let dest = dest_dir.join(file_name);
        let size_bytes = std::fs::copy(&cached, &dest)?;
        progress(100);

        Ok(FetchedArtifact {
            format: ModelFormat::from_path(&dest),
            path: dest,
            size_bytes,
        })
    }
}

#[async_trait]
impl Repository for HubRepository {
    async fn fetch(&self, request: &FetchRequest, progress: ProgressFn) -> Result<FetchedArtifact> {
        let model_dir = self.model_dir.clone();
        let request = request.clone();
        let token = request
            .credential
            .clone()
            .or_else(|| self.default_token.clone());

        // hf-hub's sync client blocks on network I/O
        tokio::task::spawn_blocking(move || Self::fetch_blocking(model_dir, request, token, progress))
            .await
            .map_err(|e| Error::repository(format!("download task failed: {e}")))?
    }
}

/// Choose the file to download from a repository listing
///
/// With a preferred format the first file of that type wins; otherwise the
/// first file with any known weights extension.
fn pick_weights_file(files: &[String], format: Option<ModelFormat>) -> Option<String> {
    let matches = |f: &&String| {
        let found = ModelFormat::from_path(std::path::Path::new(f.as_str()));
        match format {
            Some(wanted) => found == wanted,
            None => found.is_weights(),
        }
    };
    files.iter().find(matches).cloned()
}

/// Adapts hf-hub's byte counter to a percentage callback
struct PercentProgress {
    callback: ProgressFn,
    total: usize,
    done: usize,
    last: u8,
}

impl PercentProgress {
    fn new(callback: ProgressFn) -> Self {
        Self {
            callback,
            total: 0,
            done: 0,
            last: 0,
        }
    }
}

impl Progress for PercentProgress {
    fn init(&mut self, size: usize, _filename: &str) {
        self.total = size;
        self.done = 0;
        (self.callback)(0);
    }

    fn update(&mut self, size: usize) {
        self.done = self.done.saturating_add(size);
        if self.total == 0 {
            return;
        }
        // Hold back 100 until the copy into the model directory finishes.
        let pct = ((self.done as f64 / self.total as f64) * 100.0).min(99.0) as u8;
        if pct != self.last {
            self.last = pct;
            (self.callback)(pct);
        }
    }

    fn finish(&mut self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU8, Ordering};
    use std::sync::Arc;

    fn listing() -> Vec<String> {
        vec![
            ".gitattributes".to_string(),
            "README.md".to_string(),
            "model.Q4_K_M.gguf".to_string(),
            "model.safetensors".to_string(),
        ]
    }

    #[test]
    fn test_pick_preferred_format() {
        assert_eq!(
            pick_weights_file(&listing(), Some(ModelFormat::SafeTensors)).as_deref(),
            Some("model.safetensors")
        );
        assert_eq!(pick_weights_file(&listing(), Some(ModelFormat::Onnx)), None);
    }

    #[test]
    fn test_pick_any_weights() {
        assert_eq!(
            pick_weights_file(&listing(), None).as_deref(),
            Some("model.Q4_K_M.gguf")
        );
    }

    #[test]
    fn test_percent_progress_caps_below_done() {
        let seen = Arc::new(AtomicU8::new(0));
        let sink = Arc::clone(&seen);
        let mut progress = PercentProgress::new(Arc::new(move |p| sink.store(p, Ordering::SeqCst)));
        progress.init(200, "model.gguf");
        progress.update(100);
        assert_eq!(seen.load(Ordering::SeqCst), 50);
        progress.update(100);
        assert_eq!(seen.load(Ordering::SeqCst), 99);
    }
}
