//! Tunnel & Session Records
//!
//! Host-side bookkeeping mirrored into the shared region. A tunnel id is
//! the index of its slot in the shared tables, a session id the index in
//! the tunnel's session table.

use crate::arena::SlotArena;
use crate::{SessionId, TunnelId};
use sase_ctx::{Direction, SaGeometry};
use sase_shm::layout::ACTION_WORDS;
use sase_shm::tables::{INFO_FLAG_IPV6, INFO_FLAG_TUNNEL_MODE};
use sase_shm::{InfoRecord, MAX_SESSIONS};
use serde::{Deserialize, Serialize};

/// ESP encapsulation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum EncapMode {
    /// Original IP header kept
    Transport = 0,
    /// New outer IP header
    Tunnel = 1,
}

/// Outer IP version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum AddressFamily {
    /// IPv4
    Ipv4 = 4,
    /// IPv6
    Ipv6 = 6,
}

/// Parameters of one SA direction
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaParams {
    /// Cipher name, e.g. `cbc(aes)`
    pub cipher: String,
    /// Cipher key (plus RFC 3686 nonce for `rfc3686(ctr(aes))`)
    pub cipher_key: Vec<u8>,
    /// Authentication name, e.g. `hmac(sha256)`
    pub auth: String,
    /// Authentication key
    pub auth_key: Vec<u8>,
    /// Encapsulation mode
    pub mode: EncapMode,
    /// Outer address family
    pub family: AddressFamily,
    /// Egress interface index
    pub egress_ifindex: u32,
}

impl std::fmt::Debug for SaParams {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SaParams")
            .field("cipher", &self.cipher)
            .field("cipher_key_len", &self.cipher_key.len())
            .field("auth", &self.auth)
            .field("auth_key_len", &self.auth_key.len())
            .field("mode", &self.mode)
            .field("family", &self.family)
            .field("egress_ifindex", &self.egress_ifindex)
            .finish()
    }
}

/// Life cycle of one tunnel direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum DirectionState {
    /// No SA
    #[default]
    Absent,
    /// Context and token being published
    Creating,
    /// Firmware may use the SA
    Active,
    /// Disabled, waiting for firmware to let go before clearing
    Deleting,
}

impl DirectionState {
    /// True unless `Absent`
    pub fn is_present(self) -> bool {
        self != DirectionState::Absent
    }
}

/// One installed direction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct DirectionSlot {
    pub state: DirectionState,
    pub geometry: Option<SaGeometry>,
    pub info: InfoRecord,
}

impl Default for DirectionSlot {
    fn default() -> Self {
        Self {
            state: DirectionState::Absent,
            geometry: None,
            info: InfoRecord::default(),
        }
    }
}

/// Host view of one tunnel slot
#[derive(Debug, Clone, Default)]
pub(crate) struct TunnelRecord {
    pub spi: u32,
    pub mode: Option<EncapMode>,
    pub family: Option<AddressFamily>,
    pub ingress_ifindex: u32,
    pub egress_ifindex: u32,
    pub dirs: [DirectionSlot; 2],
    pub sessions: SlotArena<MAX_SESSIONS>,
    // packed action of each "on" session, for dedup
    pub session_actions: [Option<[u32; ACTION_WORDS]>; MAX_SESSIONS],
}

impl TunnelRecord {
    pub fn dir(&self, dir: Direction) -> &DirectionSlot {
        &self.dirs[dir.index()]
    }

    pub fn dir_mut(&mut self, dir: Direction) -> &mut DirectionSlot {
        &mut self.dirs[dir.index()]
    }

    /// Free iff neither direction is present
    pub fn is_free(&self) -> bool {
        self.dirs.iter().all(|d| !d.state.is_present())
    }

    pub fn is_active(&self, dir: Direction) -> bool {
        self.dir(dir).state == DirectionState::Active
    }

    pub fn build_info(&self, spi: u32, geometry: SaGeometry, ctx_words: usize, token_words: usize, pad_insn: u8) -> InfoRecord {
        let mut flags = 0;
        if self.mode == Some(EncapMode::Tunnel) {
            flags |= INFO_FLAG_TUNNEL_MODE;
        }
        if self.family == Some(AddressFamily::Ipv6) {
            flags |= INFO_FLAG_IPV6;
        }
        InfoRecord {
            spi,
            mode: self.mode.map_or(0, |m| m as u8),
            family: self.family.map_or(0, |f| f as u8),
            iv_size: geometry.iv_size as u8,
            icv_size: geometry.icv_size as u8,
            pad_block: geometry.pad_block as u8,
            ctx_words: ctx_words as u8,
            token_words: token_words as u8,
            flags,
            ingress_ifindex: self.ingress_ifindex,
            egress_ifindex: self.egress_ifindex,
            payload_insn: sase_ctx::token::PAYLOAD_INSN as u8,
            pad_insn,
        }
    }

    pub fn snapshot(&self, id: TunnelId) -> TunnelSnapshot {
        TunnelSnapshot {
            id,
            spi: self.spi,
            mode: self.mode,
            family: self.family,
            iv_size: self
                .dirs
                .iter()
                .find_map(|d| d.geometry)
                .map_or(0, |g| g.iv_size),
            outbound: self.dir(Direction::Outbound).state,
            inbound: self.dir(Direction::Inbound).state,
            ingress_ifindex: self.ingress_ifindex,
            egress_ifindex: self.egress_ifindex,
            sessions: self.sessions.iter().collect(),
        }
    }
}

/// Point-in-time copy of a tunnel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TunnelSnapshot {
    /// Tunnel id
    pub id: TunnelId,
    /// SPI
    pub spi: u32,
    /// Encapsulation mode
    pub mode: Option<EncapMode>,
    /// Outer address family
    pub family: Option<AddressFamily>,
    /// IV bytes of the installed directions
    pub iv_size: usize,
    /// Outbound direction state
    pub outbound: DirectionState,
    /// Inbound direction state
    pub inbound: DirectionState,
    /// Ingress interface index
    pub ingress_ifindex: u32,
    /// Egress interface index
    pub egress_ifindex: u32,
    /// Sessions currently on
    pub sessions: Vec<SessionId>,
}

/// Outcome of a session delete
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionDelete {
    /// Session switched off
    Deleted,
    /// Session was already off; nothing changed
    AlreadyOff,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_free_tracks_directions() {
        let mut t = TunnelRecord::default();
        assert!(t.is_free());
        t.dir_mut(Direction::Inbound).state = DirectionState::Deleting;
        assert!(!t.is_free());
        assert!(!t.is_active(Direction::Inbound));
        t.dir_mut(Direction::Inbound).state = DirectionState::Absent;
        assert!(t.is_free());
    }

    #[test]
    fn test_info_flags() {
        let t = TunnelRecord {
            mode: Some(EncapMode::Tunnel),
            family: Some(AddressFamily::Ipv6),
            egress_ifindex: 9,
            ..Default::default()
        };
        let g = SaGeometry {
            iv_size: 16,
            icv_size: 16,
            pad_block: 16,
        };
        let info = t.build_info(0x42, g, 26, 6, 2);
        assert_eq!(info.flags, INFO_FLAG_TUNNEL_MODE | INFO_FLAG_IPV6);
        assert_eq!(info.mode, 1);
        assert_eq!(info.family, 6);
        assert_eq!(info.egress_ifindex, 9);
        assert_eq!(info.pad_insn, 2);
    }

    #[test]
    fn test_params_debug_hides_keys() {
        let p = SaParams {
            cipher: "cbc(aes)".into(),
            cipher_key: vec![0xAB; 16],
            auth: "hmac(sha1)".into(),
            auth_key: vec![0xCD; 20],
            mode: EncapMode::Tunnel,
            family: AddressFamily::Ipv4,
            egress_ifindex: 1,
        };
        let s = format!("{p:?}");
        assert!(s.contains("cipher_key_len: 16"));
        assert!(!s.contains("171"));
        assert!(!s.contains("ab"));
    }
}
