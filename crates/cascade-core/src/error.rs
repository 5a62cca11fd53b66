//! Error types for configuration loading and demand planning.

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for configuration loading.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Result type alias for planning operations.
pub type PlanResult<T> = Result<T, PlanError>;

/// Errors that prevent the autoscaler from starting.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("queue {queue}: missing required field `{field}`")]
    MissingField { queue: String, field: &'static str },

    #[error("invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("topology contains a cycle through queue {0}")]
    Cycle(String),
}

/// Errors raised while projecting demand through a topology.
#[derive(Debug, Error, PartialEq)]
pub enum PlanError {
    #[error("queue {0} has no consumer binding")]
    UnknownQueue(String),

    #[error("queue {queue} is consumed by {configured:?}, not {requested:?}")]
    ConsumerMismatch {
        queue: String,
        configured: String,
        requested: String,
    },

    #[error("rate propagation from queue {0} hit a cycle")]
    Cycle(String),
}
