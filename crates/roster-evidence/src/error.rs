//! Error types for evidence hashing and verification

/// Errors raised while building, parsing or signing evidence
#[derive(Debug, thiserror::Error)]
pub enum EvidenceError {
    /// Signing key rejected
    #[error("invalid signing key: {0}")]
    InvalidKey(String),

    /// Invalid digest length
    #[error("invalid digest length: expected {expected}, got {actual}")]
    InvalidLength {
        /// Bytes required
        expected: usize,
        /// Bytes supplied
        actual: usize,
    },

    /// Hex encoding error
    #[error("hex decode error: {0}")]
    HexDecode(#[from] hex::FromHexError),

    /// File name cannot appear in a manifest
    #[error("invalid evidence file name: {0:?}")]
    InvalidFileName(String),

    /// Pack id missing
    #[error("evidence pack id must not be empty")]
    EmptyPackId,

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
