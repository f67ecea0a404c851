//! TriRed common library
//!
//! This crate contains configuration, errors and metrics shared by the
//! control panel.

pub mod config;
pub mod error;
pub mod metrics;

// Re-export commonly used types
pub use config::{NodeConfig, TriRedConfig};
pub use error::{Result, TriRedError};
pub use metrics::{MetricsRegistry, METRICS};
