//! Rotor Decision Engine Library
//!
//! Rotative market analysis with multi-strategy consensus, risk-gated
//! execution and journaled audit records.

pub mod analysis;
pub mod cli;
pub mod config;
pub mod consensus;
pub mod engine;
pub mod error;
pub mod exchange;
pub mod position;
pub mod risk;
pub mod store;

// Re-export commonly used types
pub use config::Config;
pub use error::{Error, Result};
