//! JsonStore: one JSON document on disk, replaced atomically.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::StoreError;

/// A JSON document at a fixed path.
#[derive(Debug, Clone)]
pub struct JsonStore {
    path: PathBuf,
}

impl JsonStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read and decode the document. `Ok(None)` when the file does not exist.
    pub fn load<T: DeserializeOwned>(&self) -> Result<Option<T>, StoreError> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(StoreError::Io {
                    path: self.path.display().to_string(),
                    source,
                });
            }
        };
        serde_json::from_str(&raw)
            .map(Some)
            .map_err(|source| StoreError::Serialization {
                path: self.path.display().to_string(),
                source,
            })
    }

    /// Encode `value` as pretty JSON and replace the document.
    pub fn save<T: Serialize>(&self, value: &T) -> Result<(), StoreError> {
        let json = serde_json::to_string_pretty(value).map_err(|source| {
            StoreError::Serialization {
                path: self.path.display().to_string(),
                source,
            }
        })?;
        write_atomic(&self.path, &json)
    }
}

/// Write `content` to a temp file beside `path`, then rename it over `path`.
pub fn write_atomic(path: &Path, content: &str) -> Result<(), StoreError> {
    let parent = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let io_err = |source: std::io::Error| StoreError::Io {
        path: path.display().to_string(),
        source,
    };

    fs::create_dir_all(parent).map_err(io_err)?;
    let mut temp_file = tempfile::NamedTempFile::new_in(parent).map_err(io_err)?;
    temp_file.write_all(content.as_bytes()).map_err(io_err)?;
    temp_file.persist(path).map_err(|e| StoreError::Persist {
        path: path.display().to_string(),
        reason: e.error.to_string(),
    })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use tempfile::TempDir;

    use super::*;

    #[test]
    fn missing_document_loads_as_none() {
        let dir = TempDir::new().unwrap();
        let store = JsonStore::new(dir.path().join("absent.json"));
        let loaded: Option<BTreeMap<String, u32>> = store.load().unwrap();
        assert!(loaded.is_none());
    }

    #[test]
    fn save_then_load() {
        let dir = TempDir::new().unwrap();
        let store = JsonStore::new(dir.path().join("nested").join("doc.json"));
        let mut doc = BTreeMap::new();
        doc.insert("total_sent".to_string(), 4u32);
        store.save(&doc).unwrap();

        let loaded: Option<BTreeMap<String, u32>> = store.load().unwrap();
        assert_eq!(loaded, Some(doc));
    }

    #[test]
    fn corrupt_document_is_serialization_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("doc.json");
        fs::write(&path, "{not json").unwrap();
        let result: Result<Option<BTreeMap<String, u32>>, _> = JsonStore::new(&path).load();
        assert!(matches!(result, Err(StoreError::Serialization { .. })));
    }

    #[test]
    fn write_atomic_replaces_and_leaves_no_temp_files() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("status.txt");
        write_atomic(&path, "1\n").unwrap();
        write_atomic(&path, "2\n").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "2\n");
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
    }
}
