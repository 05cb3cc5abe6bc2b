//! Error types for the mining engine and its ports.

use thiserror::Error;

/// Errors returned by the mining orchestrator.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MiningError {
    /// `start` was called while a session is active
    #[error("mining is already running for {0}")]
    AlreadyRunning(String),

    /// The operation needs a session that was never started
    #[error("no mining session has been started")]
    NotStarted,

    /// The UTXO cannot be turned into a challenge
    #[error("invalid challenge: {0}")]
    InvalidChallenge(String),

    /// Configuration rejected at construction
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Errors reported by a GPU compute backend.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    /// No parallel compute device is present
    #[error("compute backend unavailable: {0}")]
    Unavailable(String),

    /// The device exists but could not be set up
    #[error("compute backend failed to initialize: {0}")]
    InitFailed(String),

    /// A batch dispatch failed
    #[error("batch computation failed: {0}")]
    BatchFailed(String),

    /// The backend returned a result that cannot belong to the batch
    #[error("invalid batch result: {0}")]
    InvalidResult(String),
}

/// Errors reported by a checkpoint store.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The underlying storage cannot be reached
    #[error("checkpoint storage unavailable: {0}")]
    Unavailable(String),

    /// A record could not be encoded or decoded
    #[error("checkpoint serialization error: {0}")]
    Serialization(String),

    /// Read or write failed
    #[error("checkpoint I/O error: {0}")]
    Io(String),
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

/// Errors reported by a fee estimator.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FeeError {
    /// The fee source could not be reached
    #[error("fee estimate unavailable: {0}")]
    Unavailable(String),

    /// The fee source returned an unusable rate
    #[error("invalid fee rate: {0}")]
    InvalidRate(String),
}

/// Configuration errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A value that must be positive was zero
    #[error("{0} must be greater than zero")]
    Zero(&'static str),

    /// A value exceeds the largest one the engine can use exactly
    #[error("{0} must not exceed {1}")]
    TooLarge(&'static str, u64),

    /// The configuration document could not be parsed
    #[error("configuration parse error: {0}")]
    Parse(String),
}

impl From<serde_json::Error> for ConfigError {
    fn from(e: serde_json::Error) -> Self {
        ConfigError::Parse(e.to_string())
    }
}
