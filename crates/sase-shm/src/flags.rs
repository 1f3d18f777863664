//! Per-Tunnel Flags
//!
//! One 16-bit word per direction, two bits per tunnel. Firmware polls the
//! words and re-reads a tunnel's tables whenever its bit-pair changes, so
//! every flag write is preceded by a full barrier: the tables it signals
//! are complete before the change can be observed.

use crate::layout::{tunnel_flags_offset, MAX_TUNNELS};
use crate::region::SharedMemory;
use crate::{Result, ShmError};
use sase_ctx::Direction;

const FLAG_BITS: u32 = 2;
const FLAG_MASK: u32 = 0b11;

/// Bit-pair value of one tunnel direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum TunnelFlag {
    /// Firmware must not touch the tunnel's tables
    Disabled = 0,
    /// Tables valid
    Enabled = 1,
    /// Tables valid and changed since the last raise
    Update = 2,
}

impl TunnelFlag {
    /// Decode a bit-pair; the unused encoding reads as disabled
    pub fn from_bits(bits: u32) -> Self {
        match bits & FLAG_MASK {
            1 => TunnelFlag::Enabled,
            2 => TunnelFlag::Update,
            _ => TunnelFlag::Disabled,
        }
    }

    /// True for `Enabled` and `Update`
    pub fn is_active(self) -> bool {
        self != TunnelFlag::Disabled
    }

    /// Value a raise moves to: each raise is a visible change
    pub fn raised(self) -> Self {
        match self {
            TunnelFlag::Enabled => TunnelFlag::Update,
            TunnelFlag::Disabled | TunnelFlag::Update => TunnelFlag::Enabled,
        }
    }
}

/// Extract one tunnel's flag from a flag word
#[inline]
pub fn flag_of(word: u32, tunnel: usize) -> TunnelFlag {
    TunnelFlag::from_bits(word >> (tunnel as u32 * FLAG_BITS))
}

/// Replace one tunnel's flag in a flag word
#[inline]
pub fn with_flag(word: u32, tunnel: usize, flag: TunnelFlag) -> u32 {
    let shift = tunnel as u32 * FLAG_BITS;
    (word & !(FLAG_MASK << shift)) | ((flag as u32) << shift)
}

pub(crate) fn check_tunnel(tunnel: usize) -> Result<()> {
    if tunnel < MAX_TUNNELS {
        Ok(())
    } else {
        Err(ShmError::InvalidIndex { what: "tunnel", index: tunnel })
    }
}

/// Host-side writer of the tunnel flag words.
///
/// The host is the only writer of these words, so a read-modify-write of
/// the own word needs no further synchronization beyond the caller's lock.
pub struct HostFlags<'a, M: SharedMemory> {
    region: &'a M,
}

impl<'a, M: SharedMemory> HostFlags<'a, M> {
    pub(crate) fn new(region: &'a M) -> Self {
        Self { region }
    }

    /// Whole flag word of a direction
    pub fn word(&self, dir: Direction) -> u32 {
        self.region.read_word(tunnel_flags_offset(dir)) & 0xFFFF
    }

    /// Current flag
    pub fn get(&self, dir: Direction, tunnel: usize) -> Result<TunnelFlag> {
        check_tunnel(tunnel)?;
        Ok(flag_of(self.word(dir), tunnel))
    }

    /// Publish a new flag after a barrier
    pub fn set(&self, dir: Direction, tunnel: usize, flag: TunnelFlag) -> Result<()> {
        check_tunnel(tunnel)?;
        let word = with_flag(self.word(dir), tunnel, flag);
        self.region.fence();
        self.region.write_word(tunnel_flags_offset(dir), word);
        tracing::debug!(tunnel, direction = %dir, flag = ?flag, "tunnel flag");
        Ok(())
    }

    /// Signal a change on an active tunnel direction; returns the new flag
    pub fn raise(&self, dir: Direction, tunnel: usize) -> Result<TunnelFlag> {
        let next = self.get(dir, tunnel)?.raised();
        self.set(dir, tunnel, next)?;
        Ok(next)
    }
}
