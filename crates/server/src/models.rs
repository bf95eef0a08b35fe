//! Model catalog: filesystem scan for weight files.
//!
//! Mirrors the layout of a typical diffusion deployment: the model root
//! holds `checkpoints/`, `loras/`, and `vae/` directories. Missing
//! directories are logged and contribute nothing; a catalog scan never
//! fails the request.

use std::path::Path;

use pixelforge_proto::messages::{ModelInfo, ModelType};

/// Recognized weight-file extensions (lowercase, no dot).
const MODEL_EXTENSIONS: &[&str] = &["safetensors", "ckpt", "pt", "pth"];

/// Scan the model root for all known model kinds, sorted by name.
pub fn scan_models(root: &Path) -> Vec<ModelInfo> {
    let mut models = Vec::new();
    models.extend(scan_dir(&root.join("checkpoints"), ModelType::Checkpoint));
    models.extend(scan_dir(&root.join("loras"), ModelType::Lora));
    models.extend(scan_dir(&root.join("vae"), ModelType::Vae));
    models.sort_by(|a, b| a.name.to_lowercase().cmp(&b.name.to_lowercase()));
    models
}

fn scan_dir(dir: &Path, model_type: ModelType) -> Vec<ModelInfo> {
    let mut models = Vec::new();

    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            tracing::warn!(dir = %dir.display(), error = %e, "Model directory not readable");
            return models;
        }
    };

    for entry in entries.flatten() {
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let known_extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| MODEL_EXTENSIONS.contains(&ext.to_lowercase().as_str()));
        if !known_extension {
            continue;
        }

        let size_mb = match entry.metadata() {
            Ok(meta) => meta.len() / (1024 * 1024),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Could not stat model file");
                0
            }
        };

        let name = match path.file_name().and_then(|n| n.to_str()) {
            Some(name) => name.to_string(),
            None => continue,
        };

        models.push(ModelInfo {
            name,
            path: path.display().to_string(),
            model_type,
            size_mb,
        });
    }

    models
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::PathBuf;

    fn scratch_root() -> PathBuf {
        let root = std::env::temp_dir().join(format!("pixelforge-models-{}", uuid::Uuid::new_v4()));
        fs::create_dir_all(root.join("checkpoints")).unwrap();
        fs::create_dir_all(root.join("loras")).unwrap();
        root
    }

    #[test]
    fn scan_finds_known_extensions_and_sorts_by_name() {
        let root = scratch_root();
        fs::write(root.join("checkpoints/zeta.safetensors"), b"weights").unwrap();
        fs::write(root.join("checkpoints/alpha.ckpt"), b"weights").unwrap();
        fs::write(root.join("checkpoints/notes.txt"), b"not a model").unwrap();
        fs::write(root.join("loras/pixelart.safetensors"), b"weights").unwrap();

        let models = scan_models(&root);
        let names: Vec<&str> = models.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(
            names,
            vec!["alpha.ckpt", "pixelart.safetensors", "zeta.safetensors"]
        );
        assert_eq!(models[1].model_type, ModelType::Lora);

        fs::remove_dir_all(&root).unwrap();
    }

    #[test]
    fn missing_directories_yield_an_empty_catalog() {
        let root = std::env::temp_dir().join(format!("pixelforge-none-{}", uuid::Uuid::new_v4()));
        assert!(scan_models(&root).is_empty());
    }
}
