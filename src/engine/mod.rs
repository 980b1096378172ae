//! Rotative analysis engine and status reporting

pub mod orchestrator;
pub mod status;

pub use orchestrator::{EngineSettings, RotativeEngine};
pub use status::EngineStatus;
