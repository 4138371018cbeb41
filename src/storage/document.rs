//! Whole-document JSON persistence with per-file mutual exclusion.

use std::fs;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::warn;

use super::StorageResult;

/// A JSON document on disk, read and written as a whole.
///
/// Every read-modify-write cycle holds the store's mutex, so two concurrent
/// [`update`](Self::update) calls on the same store never interleave. A
/// missing or unparsable file loads as `T::default()`; load never fails.
/// Saves go through a sibling temp file and a rename so a crash mid-write
/// leaves the previous document intact.
pub struct DocumentStore<T> {
    path: PathBuf,
    lock: Mutex<()>,
    _doc: PhantomData<fn() -> T>,
}

impl<T> DocumentStore<T>
where
    T: Serialize + DeserializeOwned + Default,
{
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
            _doc: PhantomData,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the current document. Missing or malformed files yield the
    /// default value.
    pub async fn read(&self) -> T {
        let _guard = self.lock.lock().await;
        self.load()
    }

    /// Load, apply `f`, save, and return whatever `f` produced. The mutex is
    /// held across the whole cycle.
    pub async fn update<F, R>(&self, f: F) -> StorageResult<R>
    where
        F: FnOnce(&mut T) -> R,
    {
        let _guard = self.lock.lock().await;
        let mut doc = self.load();
        let out = f(&mut doc);
        self.save(&doc)?;
        Ok(out)
    }

    fn load(&self) -> T {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(_) => return T::default(),
        };
        match serde_json::from_str(&raw) {
            Ok(doc) => doc,
            Err(err) => {
                warn!(
                    path = %self.path.display(),
                    %err,
                    "document unparsable, starting from empty"
                );
                T::default()
            }
        }
    }

    fn save(&self, doc: &T) -> StorageResult<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let json = serde_json::to_string_pretty(doc)?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, json)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use tempfile::tempdir;

    #[derive(Debug, Default, Serialize, Deserialize, PartialEq)]
    struct Doc {
        items: Vec<String>,
    }

    #[tokio::test]
    async fn test_missing_file_loads_default() {
        let dir = tempdir().unwrap();
        let store: DocumentStore<Doc> = DocumentStore::new(dir.path().join("missing.json"));
        assert_eq!(store.read().await, Doc::default());
    }

    #[tokio::test]
    async fn test_update_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("doc.json");
        let store: DocumentStore<Doc> = DocumentStore::new(&path);

        store
            .update(|doc| doc.items.push("one".to_string()))
            .await
            .unwrap();
        store
            .update(|doc| doc.items.push("two".to_string()))
            .await
            .unwrap();

        let doc = store.read().await;
        assert_eq!(doc.items, vec!["one", "two"]);
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[tokio::test]
    async fn test_corrupt_file_loads_default() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("doc.json");
        std::fs::write(&path, "{not json").unwrap();

        let store: DocumentStore<Doc> = DocumentStore::new(&path);
        assert_eq!(store.read().await, Doc::default());
    }

    #[tokio::test]
    async fn test_save_is_two_space_indented() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("doc.json");
        let store: DocumentStore<Doc> = DocumentStore::new(&path);
        store
            .update(|doc| doc.items.push("x".to_string()))
            .await
            .unwrap();

        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(raw.contains("\n  \"items\""));
    }
}
