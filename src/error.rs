//! Error types for PK Token operations.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Errors produced by PK Token construction and verification.
///
/// Each layer returns its most specific kind; callers add context through
/// logging rather than by reclassifying. Nothing in this crate retries.
#[derive(Debug, Error)]
pub enum Error {
    /// Base64, JSON, or JWS structural failure.
    #[error("malformed token: {0}")]
    MalformedToken(String),

    /// The `iss` claim does not match the expected issuer.
    #[error("issuer mismatch: expected {expected}, got {actual}")]
    IssuerMismatch { expected: String, actual: String },

    /// The commitment claim in the ID token does not equal the CIC hash.
    #[error("commitment claim does not match client instance claims hash")]
    CommitmentMismatch,

    /// The provider signature (RS256 or GQ256) failed to verify.
    #[error("provider signature verification failed")]
    SignatureInvalidOp,

    /// The client signature over the CIC failed to verify.
    #[error("client instance claims signature verification failed")]
    SignatureInvalidCic,

    /// The cosigner signature failed to verify, or its nonce does not
    /// commit to this PK Token.
    #[error("cosigner signature verification failed")]
    SignatureInvalidCos,

    /// No key with the requested `kid` exists in the JWKS.
    #[error("key '{0}' not found in JWKS")]
    KeyNotFound(String),

    /// The `alg` is outside the accepted set for this operation.
    #[error("unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),

    /// The configured provider lacks a capability the flow requires.
    #[error("provider does not support required capability: {0}")]
    ProviderUnsupportedCapability(&'static str),

    /// The caller cancelled the operation.
    #[error("operation cancelled")]
    Cancelled,

    /// Transport failure talking to the OP or cosigner.
    #[error("network error: {0}")]
    Network(String),

    /// Invariant violation (programmer error).
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Error::Network(err.to_string())
    }
}
