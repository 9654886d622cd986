// src/evidence/mod.rs

pub mod fs_store;
pub mod http_store;
pub mod pipeline;
pub mod record;
pub mod snapshot;
pub mod store;

// Re-export public APIs
pub use fs_store::{FsEvidenceStore, FsLogStore};
pub use http_store::HttpEvidenceClient;
pub use pipeline::{EvidenceOutcome, EvidencePipeline};
pub use record::EvidenceRecord;
pub use store::{EvidenceStore, LogStore, MemoryEvidenceStore, MemoryLogStore};
