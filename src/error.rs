//! Unified error types for the signing core
//!
//! Every stage of the pipeline returns `ChainSigResult<T>`. The variants map
//! one-to-one onto the failure modes a caller has to distinguish: derivation
//! and codec failures abort, signer and deposit failures can be retried by
//! the user, a signature mismatch is fatal, and a relay rejection leaves the
//! signed transaction intact for resubmission.

use serde::{Deserialize, Serialize};

/// Main error type for all signing-core operations
#[derive(Debug, Clone, thiserror::Error)]
pub enum ChainSigError {
    #[error("Key derivation failed: {0}")]
    Derivation(String),

    #[error("Fee estimation failed: {0}")]
    FeeEstimation(String),

    #[error("Signer unavailable: {0}")]
    SignerUnavailable(String),

    #[error("Sign call rejected: {0}")]
    SignerRejected(String),

    #[error("Insufficient deposit: attached {attached} yoctoNEAR, required {required} yoctoNEAR")]
    InsufficientDeposit { required: u128, attached: u128 },

    #[error("Continuation expired: {0}")]
    ContinuationExpired(String),

    #[error("Signature does not recover to {expected}")]
    SignatureMismatch { expected: String },

    #[error("Relay rejected: {reason}")]
    RelayRejected { reason: String },

    #[error("A signature request is already in flight for {0}")]
    RequestInFlight(String),

    #[error("Encoding error: {0}")]
    Codec(String),

    #[error("RPC error: {0}")]
    Rpc(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Session storage error: {0}")]
    Storage(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl ChainSigError {
    pub fn derivation(msg: impl Into<String>) -> Self {
        Self::Derivation(msg.into())
    }

    pub fn fee_estimation(msg: impl Into<String>) -> Self {
        Self::FeeEstimation(msg.into())
    }

    pub fn signer_unavailable(msg: impl Into<String>) -> Self {
        Self::SignerUnavailable(msg.into())
    }

    pub fn signer_rejected(msg: impl Into<String>) -> Self {
        Self::SignerRejected(msg.into())
    }

    pub fn continuation_expired(msg: impl Into<String>) -> Self {
        Self::ContinuationExpired(msg.into())
    }

    pub fn relay_rejected(reason: impl Into<String>) -> Self {
        Self::RelayRejected { reason: reason.into() }
    }

    pub fn codec(msg: impl Into<String>) -> Self {
        Self::Codec(msg.into())
    }

    pub fn rpc(msg: impl Into<String>) -> Self {
        Self::Rpc(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }

    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// Stable code for display layers
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Derivation(_) => ErrorCode::DerivationError,
            Self::FeeEstimation(_) => ErrorCode::FeeEstimationError,
            Self::SignerUnavailable(_) => ErrorCode::SignerUnavailableError,
            Self::SignerRejected(_) => ErrorCode::SignerRejectedError,
            Self::InsufficientDeposit { .. } => ErrorCode::InsufficientDepositError,
            Self::ContinuationExpired(_) => ErrorCode::ContinuationExpiredError,
            Self::SignatureMismatch { .. } => ErrorCode::SignatureMismatchError,
            Self::RelayRejected { .. } => ErrorCode::RelayRejectedError,
            Self::RequestInFlight(_) => ErrorCode::RequestInFlight,
            Self::Codec(_) => ErrorCode::CodecError,
            Self::Rpc(_) => ErrorCode::RpcError,
            Self::Config(_) => ErrorCode::ConfigError,
            Self::Storage(_) => ErrorCode::StorageError,
            Self::InvalidInput(_) => ErrorCode::InvalidInput,
        }
    }

    /// Whether the same logical request may be attempted again without
    /// changing its inputs.
    ///
    /// A relay rejection is not retryable as-is: the caller resubmits the
    /// retained signed transaction or rebuilds with new fees. A sign call
    /// that executed and failed is final; only a new request can follow.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::SignerUnavailable(_)
                | Self::InsufficientDeposit { .. }
                | Self::RequestInFlight(_)
                | Self::Rpc(_)
        )
    }
}

/// Error codes for categorization
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    DerivationError,
    FeeEstimationError,
    SignerUnavailableError,
    SignerRejectedError,
    InsufficientDepositError,
    ContinuationExpiredError,
    SignatureMismatchError,
    RelayRejectedError,
    RequestInFlight,
    CodecError,
    RpcError,
    ConfigError,
    StorageError,
    InvalidInput,
}

/// Serializable error report for display layers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorReport {
    pub code: ErrorCode,
    pub message: String,
    pub retryable: bool,
}

impl From<&ChainSigError> for ErrorReport {
    fn from(e: &ChainSigError) -> Self {
        Self {
            code: e.code(),
            message: e.to_string(),
            retryable: e.is_retryable(),
        }
    }
}

/// Result type alias for signing-core operations
pub type ChainSigResult<T> = Result<T, ChainSigError>;

// Conversions from common error types

impl From<serde_json::Error> for ChainSigError {
    fn from(e: serde_json::Error) -> Self {
        ChainSigError::Codec(format!("JSON error: {}", e))
    }
}

impl From<hex::FromHexError> for ChainSigError {
    fn from(e: hex::FromHexError) -> Self {
        ChainSigError::InvalidInput(format!("Hex error: {}", e))
    }
}

impl From<std::io::Error> for ChainSigError {
    fn from(e: std::io::Error) -> Self {
        ChainSigError::Storage(e.to_string())
    }
}

impl From<toml::de::Error> for ChainSigError {
    fn from(e: toml::de::Error) -> Self {
        ChainSigError::Config(e.to_string())
    }
}

impl From<reqwest::Error> for ChainSigError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            ChainSigError::Rpc("Request timed out".to_string())
        } else if e.is_connect() {
            ChainSigError::Rpc("Connection failed".to_string())
        } else {
            ChainSigError::Rpc(e.to_string())
        }
    }
}
