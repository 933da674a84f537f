//! Pull model from HuggingFace Hub

use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use anyhow::{anyhow, Result};

use super::default_model_dir;
use crate::loader::{FetchRequest, HubRepository, ModelFormat, ProgressFn, Repository};

/// Download the weights of `repo` into the model directory
pub async fn pull(repo: String, format: Option<String>, output: Option<PathBuf>) -> Result<()> {
    let model_dir = output.unwrap_or_else(default_model_dir);
    std::fs::create_dir_all(&model_dir)?;

    let format = match format {
        Some(tag) => Some(
            ModelFormat::from_tag(&tag).ok_or_else(|| anyhow!("unknown model format: {}", tag))?,
        ),
        None => None,
    };
    let token = std::env::var("HF_TOKEN").ok().filter(|t| !t.is_empty());
    let request = FetchRequest {
        name: repo.clone(),
        format,
        credential: None,
    };

    println!("Downloading from: {}", repo);

    let last = Arc::new(AtomicU8::new(0));
    let progress: ProgressFn = Arc::new(move |percent| {
        // Print each ten-percent step once.
        let step = percent / 10;
        if last.fetch_max(step, Ordering::Relaxed) < step {
            print!("\r  {:>3}%", percent);
            let _ = std::io::stdout().flush();
        }
    });

    let repository = HubRepository::new(&model_dir, token);
    let artifact = repository.fetch(&request, progress).await?;

    println!();
    println!(
        "Downloaded {} ({}, {:.2} MB) to {}",
        request.model_id(),
        artifact.format,
        artifact.size_bytes as f64 / (1024.0 * 1024.0),
        artifact.path.display()
    );
    Ok(())
}
