//! Error types for Signet Core.
//!
//! One taxonomy for the whole pipeline. Key failures propagate to callers that
//! need a signature; advisory metadata failures are logged at the call site and
//! never reach this type.

use sgn_crypto::{IdentityError, KeyKind, SealError};
use thiserror::Error;

// ============================================================================
// Core Error Type
// ============================================================================

#[derive(Debug, Error)]
pub enum CoreError {
    /// No identity has been generated, or the stored one cannot be read.
    #[error("identity key does not exist")]
    KeyDoesNotExist,

    #[error("key generation failed: {0}")]
    KeyGenerationFailed(String),

    #[error("unsupported algorithm: {0}")]
    UnsupportedAlgorithm(KeyKind),

    /// Sealed payload failed authentication or had the wrong shape.
    #[error("decoding failed")]
    DecodingFailed,

    #[error("storage write failed: {0}")]
    StorageWriteFailed(String),

    #[error("transport send failed: {0}")]
    TransportSendFailed(String),

    /// Request attributes the policy cannot evaluate.
    #[error("policy evaluation error: {0}")]
    PolicyEvaluationError(String),

    #[error("audit write failed: {0}")]
    AuditWriteFailed(String),

    #[error("storage error: {0}")]
    Storage(String),
}

// ============================================================================
// Conversions
// ============================================================================

impl From<SealError> for CoreError {
    fn from(_: SealError) -> Self {
        CoreError::DecodingFailed
    }
}

impl From<IdentityError> for CoreError {
    fn from(e: IdentityError) -> Self {
        match e {
            IdentityError::UnsupportedAlgorithm(kind) => CoreError::UnsupportedAlgorithm(kind),
            IdentityError::KeyGeneration(msg) => CoreError::KeyGenerationFailed(msg),
            other => CoreError::KeyGenerationFailed(other.to_string()),
        }
    }
}
