//! Local directory mirror

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use super::{
    detect_model_source, size_on_disk, FetchRequest, FetchedArtifact, ModelFormat, ProgressFn,
    Repository,
};
use crate::error::{Error, Result};

/// Serves models from a directory laid out as `<root>/<model-id>`
///
/// Entries may be a single weights file or a directory of weights; either is
/// copied into `<model_dir>/<model-id>/`.
pub struct MirrorRepository {
    root: PathBuf,
    model_dir: PathBuf,
}

impl MirrorRepository {
    pub fn new(root: impl Into<PathBuf>, model_dir: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            model_dir: model_dir.into(),
        }
    }

    fn locate(&self, model_id: &str) -> Result<PathBuf> {
        let dir = self.root.join(model_id);
        if dir.exists() {
            return Ok(dir);
        }
        // Fall back to a bare file named after the model
        for format in [
            ModelFormat::SafeTensors,
            ModelFormat::Gguf,
            ModelFormat::PyTorch,
            ModelFormat::Onnx,
        ] {
            if let Some(ext) = format.extension() {
                let file = self.root.join(format!("{model_id}.{ext}"));
                if file.is_file() {
                    return Ok(file);
                }
            }
        }
        Err(Error::repository(format!(
            "{model_id} not present in mirror {}",
            self.root.display()
        )))
    }
}

#[async_trait]
impl Repository for MirrorRepository {
    async fn fetch(&self, request: &FetchRequest, progress: ProgressFn) -> Result<FetchedArtifact> {
        let model_id = request.model_id();
        let source = self.locate(&model_id)?;
        let detected = detect_model_source(&source)
            .map_err(|e| Error::repository(format!("mirror entry {model_id}: {e}")))?;
        if let Some(wanted) = request.format {
            if wanted != detected.format {
                return Err(Error::repository(format!(
                    "mirror has {model_id} as {}, not {wanted}",
                    detected.format
                )));
            }
        }

        let dest_dir = self.model_dir.join(&model_id);
        progress(0);
        let files = files_under(&source);
        let total = files.len().max(1);

        let copied = tokio::task::spawn_blocking({
            let source = source.clone();
            let dest_dir = dest_dir.clone();
            let progress = progress.clone();
            move || -> Result<()> {
                std::fs::create_dir_all(&dest_dir)?;
                for (i, file) in files.iter().enumerate() {
                    let relative = if source.is_file() {
                        file.file_name().map(PathBuf::from).unwrap_or_default()
                    } else {
                        file.strip_prefix(&source).map(Path::to_path_buf).unwrap_or_default()
                    };
                    let dest = dest_dir.join(relative);
                    if let Some(parent) = dest.parent() {
                        std::fs::create_dir_all(parent)?;
                    }
                    std::fs::copy(file, &dest)?;
                    progress((((i + 1) * 99) / total) as u8);
                }
                Ok(())
            }
        })
        .await
        .map_err(|e| Error::repository(format!("mirror copy task failed: {e}")))?;
        copied?;

        let weights_name = detected
            .weights_path
            .file_name()
            .map(PathBuf::from)
            .unwrap_or_default();
        let weights_relative = if source.is_file() {
            weights_name
        } else {
            detected
                .weights_path
                .strip_prefix(&source)
                .map(Path::to_path_buf)
                .unwrap_or(weights_name)
        };
        progress(100);

        Ok(FetchedArtifact {
            path: dest_dir.join(weights_relative),
            format: detected.format,
            size_bytes: size_on_disk(&dest_dir),
        })
    }
}

fn files_under(path: &Path) -> Vec<PathBuf> {
    walkdir::WalkDir::new(path)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;

    fn recorder() -> (ProgressFn, Arc<Mutex<Vec<u8>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        (Arc::new(move |p| sink.lock().push(p)), seen)
    }

    #[tokio::test]
    async fn test_fetch_directory_entry() {
        let mirror = tempfile::tempdir().unwrap();
        let models = tempfile::tempdir().unwrap();
        let entry = mirror.path().join("tiny");
        std::fs::create_dir(&entry).unwrap();
        std::fs::write(entry.join("model.safetensors"), vec![1u8; 32]).unwrap();
        std::fs::write(entry.join("config.json"), b"{}").unwrap();

        let repo = MirrorRepository::new(mirror.path(), models.path());
        let (progress, seen) = recorder();
        let fetched = repo
            .fetch(&FetchRequest::new("org/tiny"), progress)
            .await
            .unwrap();

        assert_eq!(fetched.format, ModelFormat::SafeTensors);
        assert!(fetched.path.ends_with("tiny/model.safetensors"));
        assert!(fetched.path.exists());
        assert_eq!(fetched.size_bytes, 34);
        let seen = seen.lock();
        assert_eq!(seen.first(), Some(&0));
        assert_eq!(seen.last(), Some(&100));
        assert!(seen.windows(2).all(|w| w[0] <= w[1]));
    }

    #[tokio::test]
    async fn test_fetch_bare_file_entry() {
        let mirror = tempfile::tempdir().unwrap();
        let models = tempfile::tempdir().unwrap();
        std::fs::write(mirror.path().join("small.gguf"), b"GGUF").unwrap();

        let repo = MirrorRepository::new(mirror.path(), models.path());
        let (progress, _) = recorder();
        let fetched = repo.fetch(&FetchRequest::new("small"), progress).await.unwrap();
        assert_eq!(fetched.format, ModelFormat::Gguf);
        assert_eq!(fetched.path, models.path().join("small").join("small.gguf"));
    }

    #[tokio::test]
    async fn test_missing_or_wrong_format_is_repository_error() {
        let mirror = tempfile::tempdir().unwrap();
        let models = tempfile::tempdir().unwrap();
        std::fs::write(mirror.path().join("small.gguf"), b"GGUF").unwrap();
        let repo = MirrorRepository::new(mirror.path(), models.path());

        let (progress, _) = recorder();
        let err = repo
            .fetch(&FetchRequest::new("absent"), progress.clone())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Repository(_)));

        let mut request = FetchRequest::new("small");
        request.format = Some(ModelFormat::SafeTensors);
        let err = repo.fetch(&request, progress).await.unwrap_err();
        assert!(matches!(err, Error::Repository(_)));
    }
}
