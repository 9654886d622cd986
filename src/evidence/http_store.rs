// src/evidence/http_store.rs
//
// HTTP backend for both stores. Snapshots are sent as base64 JPEG; the
// server answers with the stored reference and a public URL. Log records
// are stamped server-side and echoed back.

use super::record::{
    sort_newest_first, EvidenceRecord, ImageRef, PendingEvidenceRecord, StoredImage,
};
use super::store::{EvidenceStore, LogStore};
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

// ============================================================================
// WIRE TYPES
// ============================================================================

#[derive(Debug, Serialize)]
struct PutObjectRequest<'a> {
    path: &'a str,
    content_type: &'a str,
    data_base64: String,
}

#[derive(Debug, Deserialize)]
struct PutObjectResponse {
    #[serde(rename = "ref")]
    reference: String,
    #[serde(default)]
    url: Option<String>,
}

// ============================================================================
// CLIENT
// ============================================================================

#[derive(Clone)]
pub struct HttpEvidenceClient {
    http_client: reqwest::Client,
    base_url: String,
}

impl HttpEvidenceClient {
    pub fn new(base_url: &str, timeout_secs: u64) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            http_client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn objects_url(&self) -> String {
        format!("{}/objects", self.base_url)
    }

    /// Prefer the URL the server handed back; older servers only send the ref
    fn stored_image(&self, response: PutObjectResponse) -> StoredImage {
        let url = match response.url {
            Some(url) if !url.is_empty() => url,
            _ => format!("{}/{}", self.objects_url(), response.reference),
        };
        StoredImage {
            image_ref: ImageRef(response.reference),
            url,
        }
    }

    fn records_url(&self, collection: &str) -> String {
        format!(
            "{}/collections/{}/records",
            self.base_url,
            collection.trim_matches('/')
        )
    }

    async fn check(response: reqwest::Response, what: &str) -> Result<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "<no body>".to_string());
        bail!("{} returned {}: {}", what, status, body)
    }
}

#[async_trait]
impl EvidenceStore for HttpEvidenceClient {
    async fn put(&self, path: &str, bytes: Vec<u8>) -> Result<StoredImage> {
        let request = PutObjectRequest {
            path,
            content_type: "image/jpeg",
            data_base64: base64::engine::general_purpose::STANDARD.encode(&bytes),
        };

        let response = self
            .http_client
            .post(self.objects_url())
            .json(&request)
            .send()
            .await
            .context("Evidence upload request failed")?;
        let stored: PutObjectResponse = Self::check(response, "Evidence store")
            .await?
            .json()
            .await
            .context("Failed to parse evidence store response")?;

        let stored = self.stored_image(stored);
        debug!("🌐 Uploaded {} -> {}", stored.image_ref.as_str(), stored.url);
        Ok(stored)
    }
}

#[async_trait]
impl LogStore for HttpEvidenceClient {
    async fn append(
        &self,
        collection: &str,
        record: PendingEvidenceRecord,
    ) -> Result<EvidenceRecord> {
        let response = self
            .http_client
            .post(self.records_url(collection))
            .json(&record)
            .send()
            .await
            .context("Log append request failed")?;

        Self::check(response, "Log store")
            .await?
            .json::<EvidenceRecord>()
            .await
            .context("Failed to parse stored log record")
    }

    async fn list(&self, collection: &str) -> Result<Vec<EvidenceRecord>> {
        let response = self
            .http_client
            .get(self.records_url(collection))
            .send()
            .await
            .context("Log list request failed")?;
        let raw: Vec<serde_json::Value> = Self::check(response, "Log store")
            .await?
            .json()
            .await
            .context("Failed to parse log listing")?;

        let mut records: Vec<EvidenceRecord> = raw
            .into_iter()
            .filter_map(|value| match serde_json::from_value(value) {
                Ok(record) => Some(record),
                Err(e) => {
                    warn!("Skipping unreadable log record: {}", e);
                    None
                }
            })
            .collect();
        sort_newest_first(&mut records);
        Ok(records)
    }
}
