//! Append-only storage for emergency access audit rows.
//!
//! Two backends: an in-memory vector (tests, embedding) and a single
//! versioned JSON document on disk. Appends are serialized by a mutex in
//! both, so concurrent issuers never lose a row.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;

use super::models::AccessLogEntry;

/// Version tag written into every persisted access log document.
pub const ACCESS_LOG_VERSION: u32 = 1;

/// Errors from an access log backend.
#[derive(Debug, Error)]
pub enum LogStoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Unsupported access log version: {0}")]
    UnsupportedVersion(u32),

    #[error("Access log write timed out after {0:?}")]
    Timeout(Duration),

    #[error("Access log task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Append-only audit log. Implementations never edit or drop rows.
#[async_trait]
pub trait AccessLogStore: Send + Sync {
    /// Durably append one row. Returns only after the row is stored.
    async fn append(&self, entry: &AccessLogEntry) -> Result<(), LogStoreError>;

    /// All rows in insertion order.
    async fn entries(&self) -> Result<Vec<AccessLogEntry>, LogStoreError>;
}

/// Access log held in process memory. Lost on exit.
#[derive(Debug, Default)]
pub struct MemoryAccessLogStore {
    entries: Mutex<Vec<AccessLogEntry>>,
}

impl MemoryAccessLogStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AccessLogStore for MemoryAccessLogStore {
    async fn append(&self, entry: &AccessLogEntry) -> Result<(), LogStoreError> {
        self.entries.lock().await.push(entry.clone());
        Ok(())
    }

    async fn entries(&self) -> Result<Vec<AccessLogEntry>, LogStoreError> {
        Ok(self.entries.lock().await.clone())
    }
}

/// On-disk layout of the access log slot.
#[derive(Debug, Serialize, Deserialize)]
struct AccessLogDocument {
    version: u32,
    entries: Vec<AccessLogEntry>,
}

/// Only the version tag, read before the full document.
#[derive(Debug, Deserialize)]
struct VersionHeader {
    version: u32,
}

/// Access log persisted as one JSON document at a fixed path.
///
/// Each append rewrites the document through a temp file in the same
/// directory and renames it over the slot, so readers see either the old or
/// the new log, never a torn write.
///
/// The lock guard moves into the blocking task and is released only when the
/// file work finishes, even if the caller stops awaiting (e.g. on timeout).
#[derive(Debug)]
pub struct JsonFileAccessLogStore {
    path: PathBuf,
    lock: Arc<Mutex<()>>,
}

impl JsonFileAccessLogStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl AccessLogStore for JsonFileAccessLogStore {
    async fn append(&self, entry: &AccessLogEntry) -> Result<(), LogStoreError> {
        let guard = self.lock.clone().lock_owned().await;
        let path = self.path.clone();
        let entry = entry.clone();
        tokio::task::spawn_blocking(move || {
            let _guard = guard;
            let mut doc = read_document(&path)?;
            doc.entries.push(entry);
            write_document(&path, &doc)
        })
        .await?
    }

    async fn entries(&self) -> Result<Vec<AccessLogEntry>, LogStoreError> {
        let guard = self.lock.clone().lock_owned().await;
        let path = self.path.clone();
        let doc = tokio::task::spawn_blocking(move || {
            let _guard = guard;
            read_document(&path)
        })
        .await??;
        Ok(doc.entries)
    }
}

/// Read the log document. A missing file is an empty log.
fn read_document(path: &Path) -> Result<AccessLogDocument, LogStoreError> {
    let raw = match fs::read(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            return Ok(AccessLogDocument {
                version: ACCESS_LOG_VERSION,
                entries: Vec::new(),
            });
        }
        Err(e) => return Err(e.into()),
    };

    let header: VersionHeader = serde_json::from_slice(&raw)?;
    if header.version != ACCESS_LOG_VERSION {
        return Err(LogStoreError::UnsupportedVersion(header.version));
    }
    Ok(serde_json::from_slice(&raw)?)
}

fn write_document(path: &Path, doc: &AccessLogDocument) -> Result<(), LogStoreError> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir)?;

    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    serde_json::to_writer_pretty(&mut tmp, doc)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use super::*;
    use crate::emergency::models::{AccessContext, EmergencyLevel, EmergencyToken};

    fn entry(doctor: &str, patient: &str) -> AccessLogEntry {
        let token = EmergencyToken::new(
            crate::emergency::token::secure_token().unwrap(),
            doctor,
            patient.to_string(),
            Utc::now(),
            Duration::minutes(15),
            EmergencyLevel::Critical,
        )
        .unwrap();
        AccessLogEntry::record(&token, &AccessContext::new().with_location("ER"))
    }

    #[tokio::test]
    async fn memory_store_keeps_insertion_order() {
        let store = MemoryAccessLogStore::new();
        let a = entry("doc1", "PAT100");
        let b = entry("doc2", "PAT200");
        store.append(&a).await.unwrap();
        store.append(&b).await.unwrap();
        assert_eq!(store.entries().await.unwrap(), vec![a, b]);
    }

    #[tokio::test]
    async fn missing_file_is_an_empty_log() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileAccessLogStore::new(dir.path().join("log.json"));
        assert!(store.entries().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn file_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("log.json");
        let a = entry("doc1", "PAT100");
        let b = entry("doc1", "PAT300");
        {
            let store = JsonFileAccessLogStore::new(&path);
            store.append(&a).await.unwrap();
            store.append(&b).await.unwrap();
        }

        let reopened = JsonFileAccessLogStore::new(&path);
        assert_eq!(reopened.entries().await.unwrap(), vec![a, b]);
    }

    #[tokio::test]
    async fn file_store_writes_version_tag() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.json");
        let store = JsonFileAccessLogStore::new(&path);
        store.append(&entry("doc1", "PAT100")).await.unwrap();

        let doc: serde_json::Value = serde_json::from_slice(&fs::read(&path).unwrap()).unwrap();
        assert_eq!(doc["version"], ACCESS_LOG_VERSION);
        assert_eq!(doc["entries"].as_array().unwrap().len(), 1);
        assert_eq!(doc["entries"][0]["patientMaskedId"], "PAT100");
    }

    #[tokio::test]
    async fn unknown_version_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.json");
        fs::write(&path, r#"{"version": 99, "entries": []}"#).unwrap();

        let store = JsonFileAccessLogStore::new(&path);
        assert!(matches!(
            store.entries().await,
            Err(LogStoreError::UnsupportedVersion(99))
        ));
        assert!(matches!(
            store.append(&entry("doc1", "PAT100")).await,
            Err(LogStoreError::UnsupportedVersion(99))
        ));
    }

    #[tokio::test]
    async fn unversioned_document_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.json");
        fs::write(&path, "[]").unwrap();

        let store = JsonFileAccessLogStore::new(&path);
        assert!(matches!(store.entries().await, Err(LogStoreError::Json(_))));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn abandoned_append_does_not_clobber_later_appends() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileAccessLogStore::new(dir.path().join("log.json"));
        for _ in 0..200 {
            store.append(&entry("seed", "PAT100")).await.unwrap();
        }

        let mut acknowledged = Vec::new();
        for round in 0..40 {
            let abandoned = entry("abandoned", "PAT200");
            let _ = tokio::time::timeout(
                std::time::Duration::from_micros(50),
                store.append(&abandoned),
            )
            .await;
            for i in 0..3 {
                let row = entry(&format!("doc{round}-{i}"), "PAT300");
                store.append(&row).await.unwrap();
                acknowledged.push(row.id);
            }
        }

        let stored: std::collections::HashSet<_> =
            store.entries().await.unwrap().into_iter().map(|e| e.id).collect();
        let lost = acknowledged.iter().filter(|id| !stored.contains(id)).count();
        assert_eq!(lost, 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_appends_lose_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(JsonFileAccessLogStore::new(dir.path().join("log.json")));

        let handles: Vec<_> = (0..16)
            .map(|i| {
                let store = store.clone();
                tokio::spawn(async move {
                    store
                        .append(&entry(&format!("doc{i}"), "PAT100"))
                        .await
                        .unwrap();
                })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(store.entries().await.unwrap().len(), 16);
    }
}
