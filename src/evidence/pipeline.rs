// src/evidence/pipeline.rs
//
// Fire-and-forget evidence capture. The frame is encoded before `capture`
// returns so the snapshot matches the moment the episode opened; the upload
// and the log append run on a spawned task and report back over a channel.
// Nothing here can fail the caller.

use super::record::{EvidenceRecord, PendingEvidenceRecord};
use super::snapshot::encode_jpeg;
use super::store::{EvidenceStore, LogStore};
use crate::classifier::ViolationKind;
use crate::types::{EvidenceConfig, Frame, SubjectConfig};
use anyhow::Result;
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub enum EvidenceOutcome {
    Stored(EvidenceRecord),
    Failed {
        record_id: Uuid,
        kind: ViolationKind,
        error: String,
    },
}

pub struct EvidencePipeline {
    images: Arc<dyn EvidenceStore>,
    logs: Arc<dyn LogStore>,
    subject_id: String,
    subject_name: Option<String>,
    path_prefix: String,
    jpeg_quality: u8,
    outcomes: mpsc::UnboundedSender<EvidenceOutcome>,
}

impl EvidencePipeline {
    pub fn new(
        images: Arc<dyn EvidenceStore>,
        logs: Arc<dyn LogStore>,
        subject: &SubjectConfig,
        config: &EvidenceConfig,
    ) -> (Self, mpsc::UnboundedReceiver<EvidenceOutcome>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let pipeline = Self {
            images,
            logs,
            subject_id: subject.id.clone(),
            subject_name: subject.name.clone(),
            path_prefix: config.path_prefix.trim_matches('/').to_string(),
            jpeg_quality: config.jpeg_quality,
            outcomes: tx,
        };
        (pipeline, rx)
    }

    pub fn image_path(&self, record_id: &Uuid) -> String {
        format!("{}/{}/{}.jpg", self.path_prefix, self.subject_id, record_id)
    }

    pub fn collection(&self) -> String {
        format!("{}/{}/logs", self.path_prefix, self.subject_id)
    }

    /// Snapshot `frame` for a confirmed episode of `kind`.
    ///
    /// Returns the upload task handle, or `None` when the frame could not be
    /// encoded or no runtime is available. Either way the failure is reported
    /// on the outcome channel.
    pub fn capture(&self, frame: &Frame, kind: ViolationKind) -> Option<JoinHandle<()>> {
        let record_id = Uuid::new_v4();
        let captured_at = Utc::now();

        let jpeg = match encode_jpeg(frame, self.jpeg_quality) {
            Ok(jpeg) => jpeg,
            Err(e) => {
                self.report_failure(record_id, kind, format!("snapshot failed: {:#}", e));
                return None;
            }
        };

        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(_) => {
                self.report_failure(record_id, kind, "no async runtime for upload".to_string());
                return None;
            }
        };

        let images = Arc::clone(&self.images);
        let logs = Arc::clone(&self.logs);
        let outcomes = self.outcomes.clone();
        let path = self.image_path(&record_id);
        let collection = self.collection();
        let subject_id = self.subject_id.clone();
        let subject_name = self.subject_name.clone();

        debug!(
            "📸 Captured {} byte snapshot for {} ({})",
            jpeg.len(),
            kind,
            record_id
        );

        Some(runtime.spawn(async move {
            let result: Result<EvidenceRecord> = async {
                let stored = images.put(&path, jpeg).await?;
                let pending = PendingEvidenceRecord {
                    id: record_id,
                    subject_id,
                    subject_name,
                    kind,
                    status: kind.label().to_string(),
                    captured_at,
                    image_ref: stored.image_ref,
                    image_url: stored.url,
                };
                logs.append(&collection, pending).await
            }
            .await;

            let outcome = match result {
                Ok(record) => {
                    info!("📁 Evidence {} stored for {}", record.id, kind);
                    EvidenceOutcome::Stored(record)
                }
                Err(e) => {
                    error!("Evidence upload for {} failed: {:#}", kind, e);
                    EvidenceOutcome::Failed {
                        record_id,
                        kind,
                        error: format!("{:#}", e),
                    }
                }
            };
            // The session may already be gone; the record is still stored
            let _ = outcomes.send(outcome);
        }))
    }

    fn report_failure(&self, record_id: Uuid, kind: ViolationKind, error: String) {
        error!("Evidence capture for {} failed: {}", kind, error);
        let _ = self.outcomes.send(EvidenceOutcome::Failed {
            record_id,
            kind,
            error,
        });
    }
}
