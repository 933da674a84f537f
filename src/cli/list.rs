//! List models command

use std::path::PathBuf;

use anyhow::Result;

use super::default_model_dir;
use crate::loader::discover_artifacts;

/// List artifacts in the model directory
pub async fn list(verbose: bool, dir: Option<PathBuf>) -> Result<()> {
    let model_dir = dir.unwrap_or_else(default_model_dir);

    if !model_dir.exists() {
        println!("No models directory found at: {}", model_dir.display());
        println!("\nSet VIGIL_MODEL_DIR or create a ./models directory.");
        return Ok(());
    }

    println!("Models in {}:\n", model_dir.display());

    let artifacts = discover_artifacts(&model_dir)?;
    if artifacts.is_empty() {
        println!("  No models found.");
        println!("\nTo add models:");
        println!("  - Place GGUF or SafeTensors files in {}", model_dir.display());
        println!("  - Use 'vigil pull <repo>' to download from HuggingFace");
        return Ok(());
    }

    for artifact in artifacts {
        if verbose {
            println!("  {}", artifact.id);
            println!("    Path: {}", artifact.path.display());
            println!("    Format: {}", artifact.format);
            println!("    Size: {}", human_size(artifact.size_bytes));
            println!();
        } else {
            println!("  {} ({})", artifact.id, artifact.format);
        }
    }

    Ok(())
}

fn human_size(bytes: u64) -> String {
    let size_mb = bytes as f64 / (1024.0 * 1024.0);
    if size_mb > 1024.0 {
        format!("{:.2} GB", size_mb / 1024.0)
    } else {
        format!("{:.2} MB", size_mb)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_human_size() {
        assert_eq!(human_size(0), "0.00 MB");
        assert_eq!(human_size(3 * 1024 * 1024), "3.00 MB");
        assert_eq!(human_size(2 * 1024 * 1024 * 1024), "2.00 GB");
    }
}
