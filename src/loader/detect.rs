//! Artifact format detection and local discovery

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use walkdir::WalkDir;

use crate::error::{Error, Result};

/// Artifact format tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ModelFormat {
    /// SafeTensors (HuggingFace standard)
    SafeTensors,
    /// GGUF (llama.cpp, quantized models)
    Gguf,
    /// PyTorch pickle checkpoints
    PyTorch,
    Onnx,
    #[default]
    Unknown,
}

impl ModelFormat {
    /// Parse a user-supplied format name
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag.to_ascii_lowercase().as_str() {
            "safetensors" => Some(ModelFormat::SafeTensors),
            "gguf" => Some(ModelFormat::Gguf),
            "pytorch" | "bin" => Some(ModelFormat::PyTorch),
            "onnx" => Some(ModelFormat::Onnx),
            _ => None,
        }
    }

    /// File extension for weights in this format
    pub fn extension(self) -> Option<&'static str> {
        match self {
            ModelFormat::SafeTensors => Some("safetensors"),
            ModelFormat::Gguf => Some("gguf"),
            ModelFormat::PyTorch => Some("bin"),
            ModelFormat::Onnx => Some("onnx"),
            ModelFormat::Unknown => None,
        }
    }

    /// Format implied by a file name
    pub fn from_path(path: &Path) -> Self {
        path.extension()
            .and_then(|e| e.to_str())
            .and_then(Self::from_tag)
            .unwrap_or(ModelFormat::Unknown)
    }

    pub fn is_weights(self) -> bool {
        self != ModelFormat::Unknown
    }
}

impl std::fmt::Display for ModelFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ModelFormat::SafeTensors => "SafeTensors",
            ModelFormat::Gguf => "GGUF",
            ModelFormat::PyTorch => "PyTorch",
            ModelFormat::Onnx => "ONNX",
            ModelFormat::Unknown => "Unknown",
        };
        f.write_str(name)
    }
}

/// Weights located on disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSource {
    /// File holding the weights (first shard for sharded models)
    pub weights_path: PathBuf,
    pub format: ModelFormat,
}

/// Locate weights at `path`
///
/// The path can be a weights file or a directory containing one.
pub fn detect_model_source<P: AsRef<Path>>(path: P) -> Result<ModelSource> {
    let path = path.as_ref();

    if path.is_file() {
        let format = ModelFormat::from_path(path);
        if !format.is_weights() {
            return Err(Error::validation(
                "path",
                format!("unsupported model file: {}", path.display()),
            ));
        }
        Ok(ModelSource {
            weights_path: path.to_path_buf(),
            format,
        })
    } else if path.is_dir() {
        detect_model_in_directory(path)
    } else {
        Err(Error::NotFound(path.display().to_string()))
    }
}

/// Detect model files in a directory, preferring SafeTensors
fn detect_model_in_directory(dir: &Path) -> Result<ModelSource> {
    for pattern in ["model.safetensors", "pytorch_model.safetensors"] {
        let candidate = dir.join(pattern);
        if candidate.exists() {
            return Ok(ModelSource {
                weights_path: candidate,
                format: ModelFormat::SafeTensors,
            });
        }
    }

    let search = [
        ("model-00001-of-*.safetensors", ModelFormat::SafeTensors),
        ("*.safetensors", ModelFormat::SafeTensors),
        ("*.gguf", ModelFormat::Gguf),
        ("*.bin", ModelFormat::PyTorch),
        ("*.onnx", ModelFormat::Onnx),
    ];
    for (pattern, format) in search {
        if let Some(weights_path) = first_match(dir, pattern) {
            return Ok(ModelSource {
                weights_path,
                format,
            });
        }
    }

    Err(Error::NotFound(format!(
        "no supported model files in {}",
        dir.display()
    )))
}

fn first_match(dir: &Path, pattern: &str) -> Option<PathBuf> {
    let full_pattern = dir.join(pattern);
    glob::glob(full_pattern.to_str()?)
        .ok()?
        .filter_map(|r| r.ok())
        .next()
}

/// An artifact found in the model directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalArtifact {
    /// File or directory name, used as the model id
    pub id: String,
    pub path: PathBuf,
    pub format: ModelFormat,
    pub size_bytes: u64,
}

/// List top-level model files and model directories under `model_dir`
pub fn discover_artifacts(model_dir: &Path) -> Result<Vec<LocalArtifact>> {
    let mut found = Vec::new();
    if !model_dir.exists() {
        return Ok(found);
    }

    for entry in std::fs::read_dir(model_dir)? {
        let entry = entry?;
        let path = entry.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if name.starts_with('.') {
            continue;
        }

        let Ok(source) = detect_model_source(&path) else {
            continue;
        };
        let id = if path.is_file() {
            path.file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or(name)
                .to_string()
        } else {
            name.to_string()
        };
        found.push(LocalArtifact {
            id,
            size_bytes: size_on_disk(&path),
            path,
            format: source.format,
        });
    }

    found.sort_by(|a, b| a.id.cmp(&b.id));
    Ok(found)
}

/// Total size of a file or directory tree in bytes
pub fn size_on_disk(path: &Path) -> u64 {
    WalkDir::new(path)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter_map(|e| e.metadata().ok())
        .filter(|m| m.is_file())
        .map(|m| m.len())
        .sum()
}
