//! Error types for the offload control plane

use crate::image::ImageError;
use crate::{SessionId, TunnelId};
use sase_ctx::{Direction, SaError};
use sase_shm::ShmError;
use thiserror::Error;

/// Failure class
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    /// Caller handed in something the engine cannot run; nothing changed
    Configuration,
    /// No free tunnel or session slot
    ResourceExhaustion,
    /// Firmware did not acknowledge a handshake in time
    ProtocolTimeout,
    /// Firmware image unusable with this host build
    FirmwareIncompatible,
    /// Firmware never came up
    FirmwareLiveness,
}

impl std::fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            ErrorClass::Configuration => "configuration",
            ErrorClass::ResourceExhaustion => "resource exhaustion",
            ErrorClass::ProtocolTimeout => "protocol timeout",
            ErrorClass::FirmwareIncompatible => "firmware incompatible",
            ErrorClass::FirmwareLiveness => "firmware liveness",
        })
    }
}

/// Offload control plane error
#[derive(Error, Debug)]
pub enum OffloadError {
    /// SA context or token could not be built
    #[error("SA build failed: {0}")]
    Sa(#[from] SaError),

    /// Action record rejected
    #[error("malformed action: {0}")]
    MalformedAction(String),

    /// Second direction disagrees with the first on tunnel attributes
    #[error("SPI {spi:#010x}: {what} differs from the installed direction")]
    AttributeMismatch {
        /// Tunnel SPI
        spi: u32,
        /// Mismatching attribute
        what: &'static str,
    },

    /// Direction already installed for this SPI
    #[error("SPI {spi:#010x} already has an SA in direction {direction}")]
    DuplicateDirection {
        /// Tunnel SPI
        spi: u32,
        /// Direction
        direction: Direction,
    },

    /// No installed SA for this SPI and direction
    #[error("no SA for SPI {spi:#010x} in direction {direction}")]
    NoSuchSa {
        /// Tunnel SPI
        spi: u32,
        /// Direction
        direction: Direction,
    },

    /// Tunnel id out of range or not usable for the operation
    #[error("no such tunnel: {0}")]
    NoSuchTunnel(TunnelId),

    /// Session id out of range or off
    #[error("no such session {session} on tunnel {tunnel}")]
    NoSuchSession {
        /// Tunnel id
        tunnel: TunnelId,
        /// Session id
        session: SessionId,
    },

    /// Tunnel table full
    #[error("no free tunnel")]
    NoFreeTunnel,

    /// Session table of the tunnel full
    #[error("no free session on tunnel {0}")]
    NoFreeSession(TunnelId),

    /// Configuration rejected by validation
    #[error("invalid config: {0}")]
    InvalidConfig(String),

    /// Firmware image header rejected
    #[error("firmware image: {0}")]
    Image(#[from] ImageError),

    /// Boot handshake failed
    #[error("firmware boot failed: {0}")]
    Boot(ShmError),

    /// Shared-memory protocol failure after boot
    #[error("shared memory: {0}")]
    Shm(#[from] ShmError),
}

impl OffloadError {
    /// Failure class of this error
    pub fn class(&self) -> ErrorClass {
        match self {
            OffloadError::NoFreeTunnel | OffloadError::NoFreeSession(_) => ErrorClass::ResourceExhaustion,
            OffloadError::Image(_) => ErrorClass::FirmwareIncompatible,
            OffloadError::Boot(_) => ErrorClass::FirmwareLiveness,
            OffloadError::Shm(e) => match e {
                ShmError::Timeout { .. } | ShmError::Busy { .. } | ShmError::BridgeFault { .. } => {
                    ErrorClass::ProtocolTimeout
                }
                ShmError::Spawn(_) => ErrorClass::ResourceExhaustion,
                _ => ErrorClass::Configuration,
            },
            _ => ErrorClass::Configuration,
        }
    }

    /// The core never retries; retry policy belongs to the caller
    pub fn is_retryable(&self) -> bool {
        false
    }
}

/// Result type for the offload control plane
pub type Result<T> = std::result::Result<T, OffloadError>;
