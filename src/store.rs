//! Key/value storage for source bytes and finished reports.
//!
//! Keys are `/`-separated relative paths (`uploads/deed.pdf`,
//! `uploads/bundle/images/0001.jpg`, `reports/{id}.json`). The filesystem
//! store maps them under a root directory and rejects anything that could
//! escape it.

use crate::error::AnalysisError;
use crate::output::DocumentAnalysisOutcome;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};
use std::sync::Mutex;
use tracing::debug;

/// Key under which the report for `analysis_id` is stored.
pub fn report_key(analysis_id: &str) -> String {
    format!("reports/{analysis_id}.json")
}

fn storage_err(key: &str, detail: impl std::fmt::Display) -> AnalysisError {
    AnalysisError::Storage {
        key: key.to_string(),
        detail: detail.to_string(),
    }
}

/// Byte storage addressed by key.
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<(), AnalysisError>;

    /// `Ok(None)` when the key does not exist.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, AnalysisError>;

    /// All keys starting with `prefix`, sorted.
    async fn list(&self, prefix: &str) -> Result<Vec<String>, AnalysisError>;

    /// Deleting a missing key is not an error.
    async fn delete(&self, key: &str) -> Result<(), AnalysisError>;
}

/// Persisted reports, keyed by analysis ID.
#[async_trait]
pub trait ReportStore: Send + Sync {
    async fn put_report(&self, analysis_id: &str, report: &DocumentAnalysisOutcome) -> Result<(), AnalysisError>;

    /// `Ok(None)` while the analysis has not completed.
    async fn get_report(&self, analysis_id: &str) -> Result<Option<DocumentAnalysisOutcome>, AnalysisError>;
}

#[async_trait]
impl<T: BlobStore + ?Sized> ReportStore for T {
    async fn put_report(&self, analysis_id: &str, report: &DocumentAnalysisOutcome) -> Result<(), AnalysisError> {
        let key = report_key(analysis_id);
        let json = serde_json::to_vec_pretty(report).map_err(|e| storage_err(&key, e))?;
        self.put(&key, json).await
    }

    async fn get_report(&self, analysis_id: &str) -> Result<Option<DocumentAnalysisOutcome>, AnalysisError> {
        let key = report_key(analysis_id);
        match self.get(&key).await? {
            Some(bytes) => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(|e| storage_err(&key, format!("corrupt report: {e}"))),
            None => Ok(None),
        }
    }
}

// ── Filesystem ───────────────────────────────────────────────────────────────

/// Stores each key as a file under `root`.
///
/// Writes go to a temporary sibling and are renamed into place, so a
/// reader never observes a half-written report.
#[derive(Debug, Clone)]
pub struct FsStore {
    root: PathBuf,
}

impl FsStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, AnalysisError> {
        let rel = Path::new(key);
        let safe = !key.is_empty()
            && rel
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !safe {
            return Err(storage_err(key, "key must be a relative path without '..'"));
        }
        Ok(self.root.join(rel))
    }
}

#[async_trait]
impl BlobStore for FsStore {
    async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<(), AnalysisError> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| storage_err(key, e))?;
        }
        let tmp = path.with_file_name(format!(
            ".{}.{}.tmp",
            path.file_name().and_then(|n| n.to_str()).unwrap_or("blob"),
            uuid::Uuid::new_v4().simple()
        ));
        tokio::fs::write(&tmp, &bytes)
            .await
            .map_err(|e| storage_err(key, e))?;
        if let Err(e) = tokio::fs::rename(&tmp, &path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(storage_err(key, e));
        }
        debug!("Stored {} bytes at {}", bytes.len(), path.display());
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, AnalysisError> {
        let path = self.path_for(key)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(storage_err(key, e)),
        }
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, AnalysisError> {
        let mut keys = Vec::new();
        let mut dirs = vec![(self.root.clone(), String::new())];

        while let Some((dir, rel)) = dirs.pop() {
            let mut entries = match tokio::fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(storage_err(prefix, e)),
            };
            while let Some(entry) = entries.next_entry().await.map_err(|e| storage_err(prefix, e))? {
                let name = entry.file_name().to_string_lossy().into_owned();
                // in-flight temp files
                if name.starts_with('.') && name.ends_with(".tmp") {
                    continue;
                }
                let key = if rel.is_empty() { name } else { format!("{rel}/{name}") };
                let file_type = entry.file_type().await.map_err(|e| storage_err(&key, e))?;
                if file_type.is_dir() {
                    dirs.push((entry.path(), key));
                } else if key.starts_with(prefix) {
                    keys.push(key);
                }
            }
        }
        keys.sort();
        Ok(keys)
    }

    async fn delete(&self, key: &str) -> Result<(), AnalysisError> {
        let path = self.path_for(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(storage_err(key, e)),
        }
    }
}

// ── In-memory ────────────────────────────────────────────────────────────────

/// Process-local store for tests and one-shot runs.
#[derive(Debug, Default)]
pub struct MemoryStore {
    blobs: Mutex<BTreeMap<String, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self, key: &str) -> Result<std::sync::MutexGuard<'_, BTreeMap<String, Vec<u8>>>, AnalysisError> {
        self.blobs.lock().map_err(|_| storage_err(key, "store lock poisoned"))
    }
}

#[async_trait]
impl BlobStore for MemoryStore {
    async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<(), AnalysisError> {
        self.lock(key)?.insert(key.to_string(), bytes);
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, AnalysisError> {
        Ok(self.lock(key)?.get(key).cloned())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, AnalysisError> {
        Ok(self
            .lock(prefix)?
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }

    async fn delete(&self, key: &str) -> Result<(), AnalysisError> {
        self.lock(key)?.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::InputFile;
    use tokio_test::block_on;

    #[test]
    fn fs_round_trip_and_list() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsStore::new(dir.path());
        block_on(async {
            store.put("uploads/b/images/0002.png", vec![2]).await.unwrap();
            store.put("uploads/b/images/0001.png", vec![1]).await.unwrap();
            store.put("uploads/a.pdf", b"%PDF".to_vec()).await.unwrap();

            assert_eq!(store.get("uploads/a.pdf").await.unwrap(), Some(b"%PDF".to_vec()));
            assert_eq!(store.get("missing").await.unwrap(), None);
            assert_eq!(
                store.list("uploads/b/images/").await.unwrap(),
                ["uploads/b/images/0001.png", "uploads/b/images/0002.png"]
            );

            store.delete("uploads/a.pdf").await.unwrap();
            store.delete("uploads/a.pdf").await.unwrap();
            assert_eq!(store.get("uploads/a.pdf").await.unwrap(), None);
        });
    }

    #[test]
    fn fs_rejects_escaping_keys() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsStore::new(dir.path());
        block_on(async {
            for key in ["../etc/passwd", "/abs", "a/../../b", ""] {
                let err = store.put(key, vec![]).await.unwrap_err();
                assert!(matches!(err, AnalysisError::Storage { .. }), "{key}");
            }
        });
    }

    #[test]
    fn list_on_missing_root_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsStore::new(dir.path().join("nope"));
        assert!(block_on(store.list("")).unwrap().is_empty());
    }

    #[test]
    fn reports_via_blob_store() {
        let store = MemoryStore::new();
        let report = DocumentAnalysisOutcome::new(vec![InputFile {
            name: "deed.pdf".into(),
            total_pages: 4,
        }]);
        block_on(async {
            assert!(store.get_report("abc").await.unwrap().is_none());
            store.put_report("abc", &report).await.unwrap();
            let back = store.get_report("abc").await.unwrap().unwrap();
            assert_eq!(back.input_files[0].name, "deed.pdf");
            assert_eq!(store.list("reports/").await.unwrap(), ["reports/abc.json"]);
        });
    }

    #[test]
    fn corrupt_report_is_an_error() {
        let store = MemoryStore::new();
        block_on(async {
            store.put(&report_key("x"), b"not json".to_vec()).await.unwrap();
            assert!(store.get_report("x").await.is_err());
        });
    }
}
