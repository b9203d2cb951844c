//! pw-core: shared types, errors, and configuration for pipewright.
//!
//! This crate is the foundational dependency for the engine crate,
//! providing the unified error type and application configuration.

pub mod config;
pub mod error;

// Re-export the most commonly used items at the crate root.
pub use config::{EngineConfig, ToolsConfig};
pub use error::{Error, Result};
