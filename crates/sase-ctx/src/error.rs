//! Error types for SA context and token building

use crate::algo::{CipherFamily, CipherMode};
use thiserror::Error;

/// SA builder error
///
/// Every variant is a configuration error: the caller handed in a
/// combination the engine cannot run. None of them is worth retrying.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SaError {
    /// No descriptor for the requested cipher or auth name
    #[error("unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),

    /// Cipher family and block mode combination has no table entry
    #[error("unsupported mode {mode:?} for cipher family {family:?}")]
    UnsupportedMode {
        /// Cipher family
        family: CipherFamily,
        /// Requested block mode
        mode: CipherMode,
    },

    /// Key length not accepted by the algorithm
    #[error("invalid key size for {algorithm}: {len} bytes")]
    InvalidKeySize {
        /// Algorithm name
        algorithm: &'static str,
        /// Offered key length in bytes
        len: usize,
    },

    /// HMAC inner/outer state could not be produced
    #[error("hash pad derivation failed: {0}")]
    HashPad(String),

    /// Record would not fit the fixed context capacity
    #[error("context record needs {needed} words, capacity is {capacity}")]
    ContextOverflow {
        /// Words required
        needed: usize,
        /// Words available
        capacity: usize,
    },

    /// ICV or IV size cannot be expressed in a token
    #[error("invalid token parameters: icv {icv_size} bytes, iv {iv_size} bytes")]
    InvalidTokenParams {
        /// Integrity check value length
        icv_size: usize,
        /// Initialization vector length
        iv_size: usize,
    },
}

impl SaError {
    /// Builder errors are never transient
    pub fn is_retryable(&self) -> bool {
        false
    }
}

/// Result type for the SA builder
pub type Result<T> = std::result::Result<T, SaError>;
