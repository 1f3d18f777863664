//! OpenSASE ESP Offload - SA Context & Token Builder
//!
//! Builds the two per-direction artifacts the inline crypto engine consumes
//! for every ESP packet of a tunnel:
//!
//! ```text
//!   cipher name + key ──┐                      ┌──────────────────────────┐
//!   auth name + key ────┼──► build_context ──► │ ctrl0 │ ctrl1 │ key ...  │
//!   spi ────────────────┘         │            │ ipad state │ opad state  │
//!                                 │            │ spi │ seq │ (replay mask)│
//!                                 │            └──────────────────────────┘
//!                                 ▼
//!   icv size + iv size ─────► build_token ───► [ insn0 | insn1 | ... ]
//! ```
//!
//! Both artifacts are plain fixed-capacity word arrays. Nothing here touches
//! shared memory: publication is the job of `sase-offload`, which only
//! writes a record once both builders have succeeded.

#![warn(missing_docs)]

pub mod algo;
pub mod context;
pub mod control;
pub mod error;
pub mod hash_pad;
pub mod token;

pub use algo::{
    compute_iv_size, compute_pad_block_size, lookup_auth, lookup_cipher, AuthDescriptor,
    CipherDescriptor, CipherFamily, CipherMode, HashAlgorithm,
};
pub use context::{build_context, ContextBlob, ContextLayout, SaGeometry};
pub use control::{ContextType, ControlWord0, ControlWord1};
pub use error::{Result, SaError};
pub use hash_pad::{derive_hash_pad, HashPad, HashState};
pub use token::{build_token, Opcode, TokenInstruction, TokenSequence};

/// Context record capacity in 32-bit words
pub const CTX_WORDS: usize = 64;

/// Token (ACD) buffer capacity in 32-bit words
pub const ACD_WORDS: usize = 16;

/// Instruction count of an outbound token
pub const OUTBOUND_TOKEN_INSNS: usize = 6;

/// Instruction count of an inbound token
pub const INBOUND_TOKEN_INSNS: usize = 5;

/// ESP header length (SPI + sequence number)
pub const ESP_HEADER_LEN: usize = 8;

/// SA direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum Direction {
    /// Egress: encrypt + authenticate
    Outbound = 0,
    /// Ingress: verify + decrypt
    Inbound = 1,
}

impl Direction {
    /// Both directions, outbound first
    pub const ALL: [Direction; 2] = [Direction::Outbound, Direction::Inbound];

    /// Table index of this direction
    #[inline(always)]
    pub const fn index(self) -> usize {
        self as usize
    }

    /// The opposite direction
    pub const fn other(self) -> Self {
        match self {
            Direction::Outbound => Direction::Inbound,
            Direction::Inbound => Direction::Outbound,
        }
    }

    /// Short lowercase label used in log fields
    pub const fn as_str(self) -> &'static str {
        match self {
            Direction::Outbound => "out",
            Direction::Inbound => "in",
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
