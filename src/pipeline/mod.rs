// src/pipeline/mod.rs

pub mod event_bus;
pub mod metrics;
pub mod runner;
pub mod scheduler;
pub mod session;

// Re-export public APIs
pub use event_bus::ProctorEvent;
pub use runner::{run_degraded, run_monitoring, run_verification, RunReport};
pub use session::ProctoringSession;
