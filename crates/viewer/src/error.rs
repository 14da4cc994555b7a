//! Error types for the viewer engine

use std::path::PathBuf;
use thiserror::Error;

/// Failure reported by a content or token provider
///
/// Provider failures are never propagated to the caller: the engine logs
/// them and leaves the affected subtree as it is.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProviderError {
    /// The provider tried and failed
    #[error("provider failed: {0}")]
    Failed(String),

    /// The provider cannot answer for this element
    #[error("provider unavailable")]
    Unavailable,
}

/// API misuse surfaced to the embedding UI
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ViewerError {
    /// No input has been set
    #[error("viewer has no input")]
    NoInput,

    /// The path does not address a materialized node
    #[error("path is not materialized: {0}")]
    PathNotMaterialized(String),

    /// The viewer was disposed
    #[error("viewer is disposed")]
    Disposed,
}

/// Configuration loading and validation errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the configuration file
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Failed to parse TOML
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// A value is out of range
    #[error("invalid config: {0}")]
    Invalid(String),
}
