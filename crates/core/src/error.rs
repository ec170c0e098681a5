//! Unified error types for the materialization engine.

use thiserror::Error;
use uuid::Uuid;

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Unified error type for the materialization engine.
#[derive(Debug, Error)]
pub enum Error {
    /// A round-trip to the analytical store failed.
    #[error("store error: {0}")]
    Store(String),

    /// Sink DDL or column migration failed.
    #[error("schema error: {0}")]
    Schema(String),

    #[error("config error: {0}")]
    Config(String),

    /// The liveness probe against the store failed. Fatal for the run.
    #[error("health check failed: {0}")]
    Health(String),

    /// The trigger named a campaign the operational dataset does not know.
    #[error("unknown campaign: {0}")]
    UnknownCampaign(Uuid),

    /// A value read back from the store did not parse (timestamps, counts).
    #[error("parse error: {0}")]
    Parse(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    pub fn store(msg: impl Into<String>) -> Self {
        Self::Store(msg.into())
    }

    pub fn schema(msg: impl Into<String>) -> Self {
        Self::Schema(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn health(msg: impl Into<String>) -> Self {
        Self::Health(msg.into())
    }

    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}
