//! Error types for the shared-memory protocol

use crate::boot::LoadStat;
use thiserror::Error;

/// Shared-memory protocol error
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ShmError {
    /// Firmware did not reach the awaited state within the poll budget
    #[error("timed out after {waited_ms} ms waiting for {what}")]
    Timeout {
        /// What was awaited
        what: &'static str,
        /// Time spent polling
        waited_ms: u64,
    },

    /// Bridge request issued while a previous one is still owned
    #[error("debug bridge busy (owner tag {owner})")]
    Busy {
        /// Owner tag observed
        owner: u32,
    },

    /// Firmware completed a bridge request with an error status
    #[error("debug bridge fault: status {status:#x}")]
    BridgeFault {
        /// Status word reported by firmware
        status: u32,
    },

    /// Boot state moved backwards or skipped the host step
    #[error("boot protocol violation: expected {expected:?}, found {found:?}")]
    BootState {
        /// State the host expected at this point
        expected: LoadStat,
        /// State read from the region
        found: LoadStat,
    },

    /// Unknown `load_stat` value
    #[error("invalid load state word {0:#x}")]
    InvalidLoadStat(u32),

    /// Region is smaller than the compiled layout
    #[error("shared region too small: need {needed} bytes, have {actual}")]
    RegionTooSmall {
        /// Bytes required by the layout
        needed: usize,
        /// Bytes provided
        actual: usize,
    },

    /// Table index outside the fixed capacity
    #[error("{what} index {index} out of range")]
    InvalidIndex {
        /// Table name
        what: &'static str,
        /// Offending index
        index: usize,
    },

    /// Background worker could not be started
    #[error("failed to spawn worker: {0}")]
    Spawn(String),
}

impl ShmError {
    /// The protocol layer never retries on its own
    pub fn is_retryable(&self) -> bool {
        false
    }

    /// True for a handshake or boot poll that ran out of time
    pub fn is_timeout(&self) -> bool {
        matches!(self, ShmError::Timeout { .. })
    }
}

/// Result type for the shared-memory protocol
pub type Result<T> = std::result::Result<T, ShmError>;
