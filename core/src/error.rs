use std::path::PathBuf;

use thiserror::Error;

/// Message carried by [`EmitterError::InvalidArgument`] when a registration
/// is attempted without a callback.
pub const MISSING_CALLBACK: &str = "Expected a function as the second argument";

/// Errors raised by [`Emitter`](crate::Emitter) operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EmitterError {
    /// A registration was attempted without a callback.
    #[error("{0}")]
    InvalidArgument(&'static str),
    /// One or more listeners panicked while an event was dispatched. Only
    /// produced under [`FailurePolicy::Isolate`](crate::FailurePolicy::Isolate),
    /// after every listener of the round has run.
    #[error("{failures} listener(s) failed while emitting `{event}`: {message}")]
    ListenerPanicked {
        event: String,
        failures: usize,
        /// Panic message of the first listener that failed.
        message: String,
    },
}

/// Errors raised while resolving an [`EmitterConfig`](crate::EmitterConfig).
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config file")]
    Parse(#[from] toml::de::Error),
    #[error("invalid value `{value}` for {key}")]
    InvalidValue { key: &'static str, value: String },
}
