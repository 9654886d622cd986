// src/evidence/store.rs
//
// Storage seams for evidence: a binary store for snapshots and an
// append-only log store that assigns the record timestamp itself, so
// ordering never depends on the candidate's clock.

use super::record::{
    sort_newest_first, EvidenceRecord, ImageRef, PendingEvidenceRecord, StoredImage,
};
use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

#[async_trait]
pub trait EvidenceStore: Send + Sync {
    /// Store a snapshot; the returned URL is whatever the backend reports
    async fn put(&self, path: &str, bytes: Vec<u8>) -> Result<StoredImage>;
}

#[async_trait]
pub trait LogStore: Send + Sync {
    /// Append a record; returns it with the store-assigned timestamp
    async fn append(&self, collection: &str, record: PendingEvidenceRecord)
        -> Result<EvidenceRecord>;

    /// All records of a collection, newest first
    async fn list(&self, collection: &str) -> Result<Vec<EvidenceRecord>>;
}

/// In-memory binary store for tests and dry runs
#[derive(Default)]
pub struct MemoryEvidenceStore {
    objects: RwLock<HashMap<String, Vec<u8>>>,
    failing: AtomicBool,
}

impl MemoryEvidenceStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent `put` fail
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn get(&self, path: &str) -> Option<Vec<u8>> {
        self.objects.read().get(path).cloned()
    }

    pub fn len(&self) -> usize {
        self.objects.read().len()
    }
}

#[async_trait]
impl EvidenceStore for MemoryEvidenceStore {
    async fn put(&self, path: &str, bytes: Vec<u8>) -> Result<StoredImage> {
        if self.failing.load(Ordering::SeqCst) {
            bail!("memory store unavailable");
        }
        self.objects.write().insert(path.to_string(), bytes);
        Ok(StoredImage {
            image_ref: ImageRef(path.to_string()),
            url: format!("memory://{}", path),
        })
    }
}

/// In-memory log store for tests and dry runs
#[derive(Default)]
pub struct MemoryLogStore {
    collections: RwLock<HashMap<String, Vec<EvidenceRecord>>>,
    failing: AtomicBool,
}

impl MemoryLogStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn count(&self, collection: &str) -> usize {
        self.collections
            .read()
            .get(collection)
            .map(|c| c.len())
            .unwrap_or(0)
    }
}

#[async_trait]
impl LogStore for MemoryLogStore {
    async fn append(
        &self,
        collection: &str,
        record: PendingEvidenceRecord,
    ) -> Result<EvidenceRecord> {
        if self.failing.load(Ordering::SeqCst) {
            bail!("memory log store unavailable");
        }
        let stored = record.stamp(Utc::now());
        self.collections
            .write()
            .entry(collection.to_string())
            .or_default()
            .push(stored.clone());
        Ok(stored)
    }

    async fn list(&self, collection: &str) -> Result<Vec<EvidenceRecord>> {
        let mut records = self
            .collections
            .read()
            .get(collection)
            .cloned()
            .unwrap_or_default();
        sort_newest_first(&mut records);
        Ok(records)
    }
}
