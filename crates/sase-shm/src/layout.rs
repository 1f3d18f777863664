//! Shared Configuration Region Layout
//!
//! Byte offsets of every field group, fixed at compile time and shared
//! with the firmware build. Any change here must bump [`SHM_COMPAT_ID`].
//!
//! ```text
//! 0x0000 general        host -> fw
//! 0x0040 fw status      fw -> host
//! 0x0080 handshake      load_stat + bridge (owner tag)
//! 0x00C0 debug host     rd_idx / rd_cnt
//! 0x0100 debug fw       wr_idx / wr_cnt
//! 0x0140 debug slots    16 x 64 B
//! 0x0540 ipsec info     8 tunnels x 2 dirs x 8 words
//! 0x0740 context        8 x 2 x CTX_WORDS
//! 0x1740 token          8 x 2 x ACD_WORDS
//! 0x1B40 actions        8 x (2 default + 7 session) x 16 words
//! 0x2D40 session map    8 words
//! 0x2D80 cdr            32 x 8 words
//! 0x3180 rdr            32 x 8 words
//! 0x3580 token ring     32 x ACD_WORDS
//! 0x3D80 end
//! ```

use sase_ctx::{Direction, ACD_WORDS, CTX_WORDS};

/// Layout compatibility id, checked against the firmware image header
pub const SHM_COMPAT_ID: u32 = 0x0001_0003;

/// Tunnel table capacity
pub const MAX_TUNNELS: usize = 8;
/// Session slots per tunnel
pub const MAX_SESSIONS: usize = 7;
/// Directions per tunnel
pub const DIRECTIONS: usize = 2;

/// Section alignment (one cache line)
pub const SECTION_ALIGN: usize = 64;

/// Words per IPsec info record
pub const INFO_WORDS: usize = 8;
/// Words per action record
pub const ACTION_WORDS: usize = 16;
/// Debug ring slots
pub const DEBUG_SLOTS: usize = 16;
/// Bytes per debug slot
pub const DEBUG_SLOT_BYTES: usize = 64;
/// Debug slot header bytes (level, length, reserved)
pub const DEBUG_HEADER_BYTES: usize = 4;
/// Text capacity of one debug slot
pub const DEBUG_TEXT_BYTES: usize = DEBUG_SLOT_BYTES - DEBUG_HEADER_BYTES;
/// Entries per descriptor / token ring
pub const RING_ENTRIES: usize = 32;
/// Words per command / result descriptor
pub const DESC_WORDS: usize = 8;

const W: usize = 4;

const fn align_up(x: usize) -> usize {
    (x + SECTION_ALIGN - 1) & !(SECTION_ALIGN - 1)
}

// --- general (host -> fw) ---------------------------------------------
/// General section base
pub const GENERAL_BASE: usize = 0x000;
/// Global control flags
pub const GEN_FLAGS: usize = GENERAL_BASE;
/// Command ring bus address, low word
pub const GEN_CDR_BASE_LO: usize = GENERAL_BASE + 0x04;
/// Command ring bus address, high word
pub const GEN_CDR_BASE_HI: usize = GENERAL_BASE + 0x08;
/// Result ring bus address, low word
pub const GEN_RDR_BASE_LO: usize = GENERAL_BASE + 0x0C;
/// Result ring bus address, high word
pub const GEN_RDR_BASE_HI: usize = GENERAL_BASE + 0x10;
/// `cdr entries | rdr entries << 16`
pub const GEN_RING_SIZES: usize = GENERAL_BASE + 0x14;
/// Firmware debug verbosity
pub const GEN_DEBUG_LEVEL: usize = GENERAL_BASE + 0x18;
/// Outbound tunnel flag word
pub const GEN_TUNNEL_FLAGS_OUT: usize = GENERAL_BASE + 0x1C;
/// Inbound tunnel flag word
pub const GEN_TUNNEL_FLAGS_IN: usize = GENERAL_BASE + 0x20;
/// Host compat id
pub const GEN_COMPAT_ID: usize = GENERAL_BASE + 0x24;
const GENERAL_END: usize = GENERAL_BASE + 0x28;

/// Global flag: debug channel enabled
pub const GEN_FLAG_DEBUG: u32 = 1 << 0;
/// Global flag: host rings the doorbell on flag changes
pub const GEN_FLAG_DOORBELL: u32 = 1 << 1;

// --- fw status (fw -> host) -------------------------------------------
/// Firmware status section base
pub const FW_STATUS_BASE: usize = align_up(GENERAL_END);
/// `major << 8 | minor`
pub const FW_VERSION: usize = FW_STATUS_BASE;
/// Incremented by firmware on every main-loop pass
pub const FW_HEARTBEAT: usize = FW_STATUS_BASE + 0x04;
/// Compat id compiled into the firmware
pub const FW_COMPAT_ECHO: usize = FW_STATUS_BASE + 0x08;
const FW_STATUS_END: usize = FW_STATUS_BASE + 0x0C;

// --- handshake (dual) -------------------------------------------------
/// Handshake section base
pub const HANDSHAKE_BASE: usize = align_up(FW_STATUS_END);
/// Boot load state
pub const LOAD_STAT: usize = HANDSHAKE_BASE;
/// Bridge owner tag
pub const BRIDGE_OWNER: usize = HANDSHAKE_BASE + 0x04;
/// Bridge command
pub const BRIDGE_CMD: usize = HANDSHAKE_BASE + 0x08;
/// Bridge target address
pub const BRIDGE_ADDR: usize = HANDSHAKE_BASE + 0x0C;
/// Bridge write data
pub const BRIDGE_WDATA: usize = HANDSHAKE_BASE + 0x10;
/// Bridge read data (firmware-written)
pub const BRIDGE_RDATA: usize = HANDSHAKE_BASE + 0x14;
/// Bridge completion status (firmware-written)
pub const BRIDGE_STATUS: usize = HANDSHAKE_BASE + 0x18;
const HANDSHAKE_END: usize = HANDSHAKE_BASE + 0x1C;

// --- debug ring -------------------------------------------------------
/// Host read line base
pub const DEBUG_HOST_BASE: usize = align_up(HANDSHAKE_END);
/// Host read index
pub const DEBUG_RD_IDX: usize = DEBUG_HOST_BASE;
/// Host read count
pub const DEBUG_RD_CNT: usize = DEBUG_HOST_BASE + 0x04;
/// Firmware write line base
pub const DEBUG_FW_BASE: usize = align_up(DEBUG_HOST_BASE + 0x08);
/// Firmware write index
pub const DEBUG_WR_IDX: usize = DEBUG_FW_BASE;
/// Firmware write count
pub const DEBUG_WR_CNT: usize = DEBUG_FW_BASE + 0x04;
/// First debug slot
pub const DEBUG_SLOTS_BASE: usize = align_up(DEBUG_FW_BASE + 0x08);
const DEBUG_END: usize = DEBUG_SLOTS_BASE + DEBUG_SLOTS * DEBUG_SLOT_BYTES;

// --- per-tunnel tables (host -> fw) -----------------------------------
/// IPsec info table base
pub const INFO_BASE: usize = align_up(DEBUG_END);
const INFO_END: usize = INFO_BASE + MAX_TUNNELS * DIRECTIONS * INFO_WORDS * W;
/// Context table base
pub const CTX_BASE: usize = align_up(INFO_END);
const CTX_END: usize = CTX_BASE + MAX_TUNNELS * DIRECTIONS * CTX_WORDS * W;
/// Token table base
pub const TOKEN_BASE: usize = align_up(CTX_END);
const TOKEN_END: usize = TOKEN_BASE + MAX_TUNNELS * DIRECTIONS * ACD_WORDS * W;
/// Action records per tunnel: one default per direction, then sessions
pub const ACTIONS_PER_TUNNEL: usize = DIRECTIONS + MAX_SESSIONS;
/// Action table base
pub const ACTION_BASE: usize = align_up(TOKEN_END);
const ACTION_END: usize = ACTION_BASE + MAX_TUNNELS * ACTIONS_PER_TUNNEL * ACTION_WORDS * W;
/// Session-on bitmap base (one word per tunnel)
pub const SESSION_MAP_BASE: usize = align_up(ACTION_END);
const SESSION_MAP_END: usize = SESSION_MAP_BASE + MAX_TUNNELS * W;

// --- engine rings (fw <-> engine) -------------------------------------
/// Command descriptor ring base
pub const CDR_BASE: usize = align_up(SESSION_MAP_END);
const CDR_END: usize = CDR_BASE + RING_ENTRIES * DESC_WORDS * W;
/// Result descriptor ring base
pub const RDR_BASE: usize = align_up(CDR_END);
const RDR_END: usize = RDR_BASE + RING_ENTRIES * DESC_WORDS * W;
/// Token ring base
pub const TOKEN_RING_BASE: usize = align_up(RDR_END);
const TOKEN_RING_END: usize = TOKEN_RING_BASE + RING_ENTRIES * ACD_WORDS * W;

/// Total region size
pub const SHM_SIZE: usize = align_up(TOKEN_RING_END);

const _: () = {
    assert!(FW_STATUS_BASE % SECTION_ALIGN == 0);
    assert!(HANDSHAKE_BASE % SECTION_ALIGN == 0);
    assert!(DEBUG_HOST_BASE % SECTION_ALIGN == 0);
    assert!(DEBUG_FW_BASE % SECTION_ALIGN == 0);
    assert!(DEBUG_SLOTS_BASE % SECTION_ALIGN == 0);
    assert!(INFO_BASE % SECTION_ALIGN == 0);
    assert!(CTX_BASE % SECTION_ALIGN == 0);
    assert!(TOKEN_BASE % SECTION_ALIGN == 0);
    assert!(ACTION_BASE % SECTION_ALIGN == 0);
    assert!(SESSION_MAP_BASE % SECTION_ALIGN == 0);
    assert!(CDR_BASE % SECTION_ALIGN == 0);
    assert!(RDR_BASE % SECTION_ALIGN == 0);
    assert!(TOKEN_RING_BASE % SECTION_ALIGN == 0);
    // 2 bits per tunnel in a 16-bit flag word
    assert!(MAX_TUNNELS * 2 <= 16);
    // session bitmap fits the low byte of its word
    assert!(MAX_SESSIONS <= 8);
    assert!(DEBUG_SLOTS.is_power_of_two());
    assert!(DEBUG_TEXT_BYTES <= u8::MAX as usize);
};

/// Word-granular byte range of one record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    /// First byte
    pub offset: usize,
    /// Length in words
    pub words: usize,
}

impl Span {
    /// Byte range covered
    pub fn bytes(&self) -> std::ops::Range<usize> {
        self.offset..self.offset + self.words * W
    }
}

#[inline]
const fn tunnel_dir(tunnel: usize, dir: Direction) -> usize {
    tunnel * DIRECTIONS + dir.index()
}

/// Tunnel flag word for a direction
pub const fn tunnel_flags_offset(dir: Direction) -> usize {
    match dir {
        Direction::Outbound => GEN_TUNNEL_FLAGS_OUT,
        Direction::Inbound => GEN_TUNNEL_FLAGS_IN,
    }
}

/// IPsec info record of one tunnel direction
pub const fn info_span(tunnel: usize, dir: Direction) -> Span {
    Span {
        offset: INFO_BASE + tunnel_dir(tunnel, dir) * INFO_WORDS * W,
        words: INFO_WORDS,
    }
}

/// Context record of one tunnel direction
pub const fn ctx_span(tunnel: usize, dir: Direction) -> Span {
    Span {
        offset: CTX_BASE + tunnel_dir(tunnel, dir) * CTX_WORDS * W,
        words: CTX_WORDS,
    }
}

/// Token buffer of one tunnel direction
pub const fn token_span(tunnel: usize, dir: Direction) -> Span {
    Span {
        offset: TOKEN_BASE + tunnel_dir(tunnel, dir) * ACD_WORDS * W,
        words: ACD_WORDS,
    }
}

/// Default action record of one tunnel direction
pub const fn default_action_span(tunnel: usize, dir: Direction) -> Span {
    Span {
        offset: ACTION_BASE + (tunnel * ACTIONS_PER_TUNNEL + dir.index()) * ACTION_WORDS * W,
        words: ACTION_WORDS,
    }
}

/// Session action record
pub const fn session_action_span(tunnel: usize, session: usize) -> Span {
    Span {
        offset: ACTION_BASE
            + (tunnel * ACTIONS_PER_TUNNEL + DIRECTIONS + session) * ACTION_WORDS * W,
        words: ACTION_WORDS,
    }
}

/// Session bitmap word of a tunnel
pub const fn session_map_offset(tunnel: usize) -> usize {
    SESSION_MAP_BASE + tunnel * W
}

/// Debug slot
pub const fn debug_slot_offset(slot: usize) -> usize {
    DEBUG_SLOTS_BASE + (slot % DEBUG_SLOTS) * DEBUG_SLOT_BYTES
}

/// Command descriptor
pub const fn cdr_span(index: usize) -> Span {
    Span {
        offset: CDR_BASE + (index % RING_ENTRIES) * DESC_WORDS * W,
        words: DESC_WORDS,
    }
}

/// Result descriptor
pub const fn rdr_span(index: usize) -> Span {
    Span {
        offset: RDR_BASE + (index % RING_ENTRIES) * DESC_WORDS * W,
        words: DESC_WORDS,
    }
}

/// Token ring entry
pub const fn token_ring_span(index: usize) -> Span {
    Span {
        offset: TOKEN_RING_BASE + (index % RING_ENTRIES) * ACD_WORDS * W,
        words: ACD_WORDS,
    }
}
