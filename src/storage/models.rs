//! Model registry
//!
//! The file-backed registry of locally available models: a directory of
//! GGUF files. The engine never touches this directly; the bridge lists it
//! for the UI's model picker.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::storage::StorageError;

/// One GGUF file found in the models directory
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelFile {
    /// Display name (file stem)
    pub name: String,
    /// Full path to the GGUF file
    pub path: PathBuf,
    /// File size in bytes
    pub size_bytes: u64,
}

/// List the GGUF files in `dir`, sorted by name.
///
/// A missing directory is an empty registry, not an error.
pub fn scan_models_directory(dir: &Path) -> Result<Vec<ModelFile>, StorageError> {
    if !dir.is_dir() {
        tracing::debug!(dir = %dir.display(), "models directory does not exist yet");
        return Ok(Vec::new());
    }

    let mut models = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let is_gguf = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.eq_ignore_ascii_case("gguf"))
            .unwrap_or(false);
        if !is_gguf {
            continue;
        }

        let name = path
            .file_stem()
            .and_then(|stem| stem.to_str())
            .unwrap_or("model")
            .to_string();
        let size_bytes = entry.metadata()?.len();
        models.push(ModelFile {
            name,
            path,
            size_bytes,
        });
    }

    models.sort_by(|a, b| a.name.cmp(&b.name));
    tracing::debug!(count = models.len(), dir = %dir.display(), "scanned models directory");
    Ok(models)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::io::Write;

    #[test]
    fn test_missing_directory_is_empty() {
        let models = scan_models_directory(Path::new("/nonexistent/models"))
            .expect("missing dir is not an error");
        assert!(models.is_empty());
    }

    #[test]
    fn test_lists_only_gguf_files() {
        let dir = tempfile::tempdir().expect("create temp dir");
        File::create(dir.path().join("beta.gguf"))
            .and_then(|mut f| f.write_all(b"bb"))
            .expect("write model");
        File::create(dir.path().join("alpha.GGUF"))
            .and_then(|mut f| f.write_all(b"a"))
            .expect("write model");
        File::create(dir.path().join("notes.txt")).expect("write other file");

        let models = scan_models_directory(dir.path()).expect("scan");
        assert_eq!(models.len(), 2);
        assert_eq!(models[0].name, "alpha");
        assert_eq!(models[0].size_bytes, 1);
        assert_eq!(models[1].name, "beta");
        assert_eq!(models[1].size_bytes, 2);
    }
}
