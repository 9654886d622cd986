// src/evidence/fs_store.rs
//
// Filesystem backends. Snapshots are plain files under a root directory;
// each log collection is a JSON Lines file appended to under a lock.

use super::record::{
    sort_newest_first, EvidenceRecord, ImageRef, PendingEvidenceRecord, StoredImage,
};
use super::store::{EvidenceStore, LogStore};
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use std::path::{Component, Path, PathBuf};
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Resolve a store-relative path, refusing anything that escapes the root
fn resolve(root: &Path, relative: &str) -> Result<PathBuf> {
    let relative = Path::new(relative);
    if relative.as_os_str().is_empty()
        || relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)))
    {
        bail!("invalid store path: {}", relative.display());
    }
    Ok(root.join(relative))
}

pub struct FsEvidenceStore {
    root: PathBuf,
}

impl FsEvidenceStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl EvidenceStore for FsEvidenceStore {
    async fn put(&self, path: &str, bytes: Vec<u8>) -> Result<StoredImage> {
        let target = resolve(&self.root, path)?;
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        fs::write(&target, &bytes)
            .await
            .with_context(|| format!("Failed to write {}", target.display()))?;
        debug!("Stored {} bytes at {}", bytes.len(), target.display());
        Ok(StoredImage {
            image_ref: ImageRef(path.to_string()),
            url: format!("file://{}", target.display()),
        })
    }
}

pub struct FsLogStore {
    root: PathBuf,
    write_lock: Mutex<()>,
}

impl FsLogStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            write_lock: Mutex::new(()),
        }
    }

    fn collection_file(&self, collection: &str) -> Result<PathBuf> {
        let mut path = resolve(&self.root, collection)?;
        path.set_extension("jsonl");
        Ok(path)
    }
}

#[async_trait]
impl LogStore for FsLogStore {
    async fn append(
        &self,
        collection: &str,
        record: PendingEvidenceRecord,
    ) -> Result<EvidenceRecord> {
        let file = self.collection_file(collection)?;
        let _guard = self.write_lock.lock().await;

        if let Some(parent) = file.parent() {
            fs::create_dir_all(parent).await?;
        }

        let stored = record.stamp(Utc::now());
        let mut line = serde_json::to_string(&stored)?;
        line.push('\n');

        let mut handle = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&file)
            .await
            .with_context(|| format!("Failed to open {}", file.display()))?;
        handle.write_all(line.as_bytes()).await?;
        handle.flush().await?;

        Ok(stored)
    }

    async fn list(&self, collection: &str) -> Result<Vec<EvidenceRecord>> {
        let file = self.collection_file(collection)?;
        let contents = match fs::read_to_string(&file).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e).with_context(|| format!("Failed to read {}", file.display())),
        };

        let mut records = Vec::new();
        for (line_no, line) in contents.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<EvidenceRecord>(line) {
                Ok(record) => records.push(record),
                Err(e) => warn!(
                    "Skipping unreadable record {}:{}: {}",
                    file.display(),
                    line_no + 1,
                    e
                ),
            }
        }
        sort_newest_first(&mut records);
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::ViolationKind;
    use uuid::Uuid;

    fn pending(id: u128) -> PendingEvidenceRecord {
        PendingEvidenceRecord {
            id: Uuid::from_u128(id),
            subject_id: "SE123456".to_string(),
            subject_name: Some("Test Candidate".to_string()),
            kind: ViolationKind::MultipleFaces,
            status: ViolationKind::MultipleFaces.label().to_string(),
            captured_at: Utc::now(),
            image_ref: ImageRef(format!("detection_logs/SE123456/{}.jpg", id)),
            image_url: String::new(),
        }
    }

    #[test]
    fn test_resolve_rejects_escapes() {
        let root = Path::new("/tmp/evidence");
        assert!(resolve(root, "../etc/passwd").is_err());
        assert!(resolve(root, "/abs/path").is_err());
        assert!(resolve(root, "").is_err());
        assert_eq!(
            resolve(root, "detection_logs/a/b.jpg").unwrap(),
            root.join("detection_logs/a/b.jpg")
        );
    }

    #[tokio::test]
    async fn test_put_writes_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsEvidenceStore::new(dir.path());
        let stored = store
            .put("detection_logs/SE123456/x.jpg", vec![0xFF, 0xD8])
            .await
            .unwrap();

        let written = std::fs::read(dir.path().join("detection_logs/SE123456/x.jpg")).unwrap();
        assert_eq!(written, vec![0xFF, 0xD8]);
        assert_eq!(stored.image_ref.as_str(), "detection_logs/SE123456/x.jpg");
        assert!(stored.url.starts_with("file://"));
        assert!(stored.url.ends_with("detection_logs/SE123456/x.jpg"));
    }

    #[tokio::test]
    async fn test_log_round_trip_and_corrupt_lines() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsLogStore::new(dir.path());
        let collection = "detection_logs/SE123456/logs";

        store.append(collection, pending(1)).await.unwrap();
        store.append(collection, pending(2)).await.unwrap();

        let file = dir.path().join("detection_logs/SE123456/logs.jsonl");
        let mut contents = std::fs::read_to_string(&file).unwrap();
        contents.push_str("{broken\n");
        std::fs::write(&file, contents).unwrap();

        let records = store.list(collection).await.unwrap();
        assert_eq!(records.len(), 2);
        assert!(records.iter().all(|r| r.uploaded_at.is_some()));
        assert!(records[0].uploaded_at >= records[1].uploaded_at);
    }

    #[tokio::test]
    async fn test_missing_collection_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsLogStore::new(dir.path());
        assert!(store.list("detection_logs/nobody/logs").await.unwrap().is_empty());
    }
}
