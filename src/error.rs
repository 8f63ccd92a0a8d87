//! Top-level error types for ficbot.

use std::sync::Arc;

/// Crate-wide result type alias.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error enum wrapping domain-specific errors.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Platform(#[from] PlatformError),

    #[error(transparent)]
    Recommend(#[from] RecommendError),

    /// An ingestion feed died in streaming mode. Fatal for the scheduling loop.
    #[error("ingestion feed '{feed}' failed: {reason}")]
    StreamFault { feed: &'static str, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Configuration loading errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to load config from {path}: {source}")]
    Load {
        path: String,
        source: Arc<std::io::Error>,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error("missing required config key: {0}")]
    MissingKey(String),
}

/// Request ledger persistence errors.
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("failed to read ledger {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("failed to write ledger {path}: {source}")]
    Write {
        path: String,
        source: std::io::Error,
    },

    #[error("transaction stack is empty")]
    NoTransaction,
}

/// Platform client errors.
#[derive(Debug, thiserror::Error)]
pub enum PlatformError {
    #[error("authentication failed: {0}")]
    AuthFailed(String),

    #[error("item not found: {id}")]
    NotFound { id: String },

    #[error("platform request failed: {0}")]
    Request(String),

    #[error("unexpected platform response: {0}")]
    Decode(String),
}

/// Recommendation generator errors.
#[derive(Debug, thiserror::Error)]
pub enum RecommendError {
    #[error("recommender not configured")]
    NotConfigured,

    #[error("recommender request failed: {0}")]
    Request(String),
}
