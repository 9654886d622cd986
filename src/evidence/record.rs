// src/evidence/record.rs

use crate::classifier::ViolationKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

/// Opaque handle to a stored snapshot
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ImageRef(pub String);

impl ImageRef {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Where a snapshot ended up: the store's handle plus the URL it reported
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredImage {
    pub image_ref: ImageRef,
    pub url: String,
}

/// Evidence as written by the client. The log store stamps `uploaded_at`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingEvidenceRecord {
    pub id: Uuid,
    pub subject_id: String,
    pub subject_name: Option<String>,
    pub kind: ViolationKind,
    pub status: String,
    pub captured_at: DateTime<Utc>,
    pub image_ref: ImageRef,
    pub image_url: String,
}

impl PendingEvidenceRecord {
    pub fn stamp(self, uploaded_at: DateTime<Utc>) -> EvidenceRecord {
        EvidenceRecord {
            id: self.id,
            subject_id: self.subject_id,
            subject_name: self.subject_name,
            kind: self.kind,
            status: self.status,
            captured_at: self.captured_at,
            image_ref: self.image_ref,
            image_url: self.image_url,
            uploaded_at: Some(uploaded_at),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvidenceRecord {
    pub id: Uuid,
    pub subject_id: String,
    #[serde(default)]
    pub subject_name: Option<String>,
    pub kind: ViolationKind,
    #[serde(default)]
    pub status: String,
    pub captured_at: DateTime<Utc>,
    pub image_ref: ImageRef,
    #[serde(default)]
    pub image_url: String,
    /// Store-assigned; `None` when the stored value could not be read
    #[serde(default, deserialize_with = "lenient_timestamp")]
    pub uploaded_at: Option<DateTime<Utc>>,
}

/// Newest first by store timestamp. Records without a readable timestamp
/// go last, in the order they were read.
pub fn sort_newest_first(records: &mut [EvidenceRecord]) {
    records.sort_by_key(|r| std::cmp::Reverse(r.uploaded_at));
}

fn lenient_timestamp<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(parse_store_timestamp(&value))
}

/// Accepts RFC 3339 strings, epoch milliseconds and `{seconds, nanoseconds}`
/// objects (with or without a leading underscore). Anything else is `None`.
pub fn parse_store_timestamp(value: &serde_json::Value) -> Option<DateTime<Utc>> {
    use serde_json::Value;

    match value {
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|dt| dt.with_timezone(&Utc)),
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.is_finite()).map(|f| f as i64))
            .and_then(DateTime::from_timestamp_millis),
        Value::Object(map) => {
            let seconds = map
                .get("seconds")
                .or_else(|| map.get("_seconds"))
                .and_then(Value::as_i64)?;
            let nanos = map
                .get("nanoseconds")
                .or_else(|| map.get("_nanoseconds"))
                .and_then(Value::as_u64)
                .unwrap_or(0);
            DateTime::from_timestamp(seconds, u32::try_from(nanos).ok()?)
        }
        _ => None,
    }
}
