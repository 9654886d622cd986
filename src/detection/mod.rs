// src/detection/mod.rs

mod adapter;
mod model;
#[cfg(feature = "onnx")]
mod onnx;
mod recorded;
mod types;

// Re-export public APIs
pub use adapter::{DetectorAdapter, ProhibitedObjects};
pub use model::FaceModel;
#[cfg(feature = "onnx")]
pub use onnx::OnnxFaceModel;
pub use recorded::RecordedModel;
pub use types::*;
