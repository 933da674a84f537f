//! Artifact repositories
//!
//! A [`Repository`] turns a model name into weights on local disk, reporting
//! download progress as it goes. Two implementations ship with vigil:
//! - [`HubRepository`]: HuggingFace Hub via `hf-hub`
//! - [`MirrorRepository`]: a local directory mirror for air-gapped hosts

mod detect;
mod hub;
mod mirror;

pub use detect::{
    detect_model_source, discover_artifacts, size_on_disk, LocalArtifact, ModelFormat, ModelSource,
};
pub use hub::HubRepository;
pub use mirror::MirrorRepository;

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Result;

/// Progress callback, invoked with a completion percentage (0..=100)
pub type ProgressFn = Arc<dyn Fn(u8) + Send + Sync>;

/// What to fetch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    /// Repository name, e.g. `mistralai/Mistral-7B-Instruct-v0.3`
    pub name: String,
    /// Preferred weights format; `None` takes the first weights file found
    pub format: Option<ModelFormat>,
    /// Access token for gated repositories
    pub credential: Option<String>,
}

impl FetchRequest {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            format: None,
            credential: None,
        }
    }

    /// Model id derived from the repository name (its last path segment)
    pub fn model_id(&self) -> String {
        model_id_for(&self.name)
    }
}

/// Weights delivered by a repository
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedArtifact {
    pub path: PathBuf,
    pub format: ModelFormat,
    pub size_bytes: u64,
}

/// Source of model artifacts
#[async_trait]
pub trait Repository: Send + Sync {
    async fn fetch(&self, request: &FetchRequest, progress: ProgressFn) -> Result<FetchedArtifact>;
}

/// Model id for a repository name
pub fn model_id_for(name: &str) -> String {
    name.trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or(name)
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_id_is_last_segment() {
        assert_eq!(model_id_for("mistralai/Mistral-7B-v0.1"), "Mistral-7B-v0.1");
        assert_eq!(model_id_for("modelA"), "modelA");
        assert_eq!(model_id_for("org/name/"), "name");
    }
}
