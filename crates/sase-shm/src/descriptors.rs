//! Engine Descriptor Rings
//!
//! Command descriptors (CDR) describe one packet submission, result
//! descriptors (RDR) report its completion. Firmware fills the CDR and the
//! token ring from the per-tunnel tables; the engine writes the RDR. The
//! host only ever reads them.
//!
//! ```text
//! CDR w0  particle_size[0..17] first[22] last[23]
//!     w1  data addr lo          w2 data addr hi
//!     w3  packet_length[0..17] tunnel[20..23] direction[24]
//!     w4  token addr            w5 context addr
//!     w6  options               w7 reserved
//!
//! RDR w0  particle_size[0..17] first[22] last[23]
//!     w1  data addr lo          w2 data addr hi
//!     w3  packet_length[0..17] error_code[17..24] tunnel[24..27]
//!     w4  result flags          w5..7 reserved
//! ```

use crate::layout::{cdr_span, rdr_span, token_ring_span, DESC_WORDS, RING_ENTRIES};
use crate::region::SharedMemory;
use crate::{Result, ShmError};
use sase_ctx::{Direction, ACD_WORDS};

const LEN_MASK: u32 = 0x1_FFFF;
const FIRST: u32 = 1 << 22;
const LAST: u32 = 1 << 23;

const CDR_TUNNEL_SHIFT: u32 = 20;
const CDR_TUNNEL_MASK: u32 = 0xF;
const CDR_DIRECTION: u32 = 1 << 24;

const RDR_ERROR_SHIFT: u32 = 17;
const RDR_ERROR_MASK: u32 = 0x7F;
const RDR_TUNNEL_SHIFT: u32 = 24;
const RDR_TUNNEL_MASK: u32 = 0x7;

#[inline(always)]
const fn bit(on: bool, mask: u32) -> u32 {
    if on {
        mask
    } else {
        0
    }
}

/// Command descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandDescriptor {
    /// Bytes in this particle
    pub particle_size: u32,
    /// First particle of the packet
    pub first: bool,
    /// Last particle of the packet
    pub last: bool,
    /// Packet data bus address
    pub data_addr: u64,
    /// Whole packet length
    pub packet_length: u32,
    /// Tunnel id
    pub tunnel: u8,
    /// SA direction
    pub direction: Direction,
    /// Token bus address
    pub token_addr: u32,
    /// Context bus address
    pub context_addr: u32,
    /// Engine options
    pub options: u32,
}

impl CommandDescriptor {
    /// Pack into ring words
    pub fn pack(&self) -> [u32; DESC_WORDS] {
        let mut w = [0u32; DESC_WORDS];
        w[0] = (self.particle_size & LEN_MASK)
            | bit(self.first, FIRST)
            | bit(self.last, LAST);
        w[1] = self.data_addr as u32;
        w[2] = (self.data_addr >> 32) as u32;
        w[3] = (self.packet_length & LEN_MASK)
            | ((self.tunnel as u32 & CDR_TUNNEL_MASK) << CDR_TUNNEL_SHIFT)
            | bit(self.direction == Direction::Inbound, CDR_DIRECTION);
        w[4] = self.token_addr;
        w[5] = self.context_addr;
        w[6] = self.options;
        w
    }

    /// Unpack ring words
    pub fn unpack(w: &[u32; DESC_WORDS]) -> Self {
        Self {
            particle_size: w[0] & LEN_MASK,
            first: w[0] & FIRST != 0,
            last: w[0] & LAST != 0,
            data_addr: w[1] as u64 | (w[2] as u64) << 32,
            packet_length: w[3] & LEN_MASK,
            tunnel: ((w[3] >> CDR_TUNNEL_SHIFT) & CDR_TUNNEL_MASK) as u8,
            direction: if w[3] & CDR_DIRECTION != 0 {
                Direction::Inbound
            } else {
                Direction::Outbound
            },
            token_addr: w[4],
            context_addr: w[5],
            options: w[6],
        }
    }
}

/// Result descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResultDescriptor {
    /// Bytes in this particle
    pub particle_size: u32,
    /// First particle of the packet
    pub first: bool,
    /// Last particle of the packet
    pub last: bool,
    /// Output data bus address
    pub data_addr: u64,
    /// Output packet length
    pub packet_length: u32,
    /// Engine error code, 0 on success
    pub error_code: u8,
    /// Tunnel id
    pub tunnel: u8,
    /// Result flags
    pub result_flags: u32,
}

impl ResultDescriptor {
    /// Pack into ring words
    pub fn pack(&self) -> [u32; DESC_WORDS] {
        let mut w = [0u32; DESC_WORDS];
        w[0] = (self.particle_size & LEN_MASK)
            | bit(self.first, FIRST)
            | bit(self.last, LAST);
        w[1] = self.data_addr as u32;
        w[2] = (self.data_addr >> 32) as u32;
        w[3] = (self.packet_length & LEN_MASK)
            | ((self.error_code as u32 & RDR_ERROR_MASK) << RDR_ERROR_SHIFT)
            | ((self.tunnel as u32 & RDR_TUNNEL_MASK) << RDR_TUNNEL_SHIFT);
        w[4] = self.result_flags;
        w
    }

    /// Unpack ring words
    pub fn unpack(w: &[u32; DESC_WORDS]) -> Self {
        Self {
            particle_size: w[0] & LEN_MASK,
            first: w[0] & FIRST != 0,
            last: w[0] & LAST != 0,
            data_addr: w[1] as u64 | (w[2] as u64) << 32,
            packet_length: w[3] & LEN_MASK,
            error_code: ((w[3] >> RDR_ERROR_SHIFT) & RDR_ERROR_MASK) as u8,
            tunnel: ((w[3] >> RDR_TUNNEL_SHIFT) & RDR_TUNNEL_MASK) as u8,
            result_flags: w[4],
        }
    }

    /// True when the engine reported no error
    pub fn is_ok(&self) -> bool {
        self.error_code == 0
    }
}

fn check_entry(index: usize) -> Result<()> {
    if index < RING_ENTRIES {
        Ok(())
    } else {
        Err(ShmError::InvalidIndex { what: "ring entry", index })
    }
}

/// Read-only view of the engine rings
pub struct RingView<'a, M: SharedMemory> {
    region: &'a M,
}

impl<'a, M: SharedMemory> RingView<'a, M> {
    pub(crate) fn new(region: &'a M) -> Self {
        Self { region }
    }

    /// Command descriptor at `index`
    pub fn command(&self, index: usize) -> Result<CommandDescriptor> {
        check_entry(index)?;
        let mut w = [0u32; DESC_WORDS];
        self.region.read_words(cdr_span(index).offset, &mut w);
        Ok(CommandDescriptor::unpack(&w))
    }

    /// Result descriptor at `index`
    pub fn result(&self, index: usize) -> Result<ResultDescriptor> {
        check_entry(index)?;
        let mut w = [0u32; DESC_WORDS];
        self.region.read_words(rdr_span(index).offset, &mut w);
        Ok(ResultDescriptor::unpack(&w))
    }

    /// Token ring entry at `index`
    pub fn token(&self, index: usize) -> Result<[u32; ACD_WORDS]> {
        check_entry(index)?;
        let mut w = [0u32; ACD_WORDS];
        self.region.read_words(token_ring_span(index).offset, &mut w);
        Ok(w)
    }
}
