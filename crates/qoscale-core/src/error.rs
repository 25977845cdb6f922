//! Configuration errors.

use thiserror::Error;

/// Invalid autoscaler options.
///
/// Collects every problem found during validation so the operator sees them
/// all at once instead of fixing one flag per restart.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("{}", .0.join("\n"))]
    Invalid(Vec<String>),

    #[error("failed to read config file {path}: {reason}")]
    Read { path: String, reason: String },

    #[error("failed to parse config file {path}: {reason}")]
    Parse { path: String, reason: String },
}

impl ConfigError {
    /// The individual validation messages, if this is a validation failure.
    pub fn problems(&self) -> &[String] {
        match self {
            ConfigError::Invalid(problems) => problems,
            _ => &[],
        }
    }
}
