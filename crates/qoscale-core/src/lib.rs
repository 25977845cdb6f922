//! qoscale-core — shared types and configuration for the bandwidth autoscaler.
//!
//! Raw options arrive as [`AutoscalerOptions`] (from a TOML file, the
//! command line, or both) and are validated exactly once into an immutable
//! [`AutoscalerConfig`]. Nothing downstream re-checks them.

pub mod config;
pub mod error;
pub mod types;

pub use config::{AutoscalerConfig, AutoscalerOptions, DirectionConfig};
pub use error::ConfigError;
pub use types::*;
