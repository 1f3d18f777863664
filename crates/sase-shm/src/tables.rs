//! Per-Tunnel Tables
//!
//! Host-written, firmware-read records: IPsec info, context, token, action
//! templates and the session bitmap. Writers here never fence; the flag
//! write that follows them does (see [`crate::flags`]).

use crate::flags::check_tunnel;
use crate::layout::{
    ctx_span, default_action_span, info_span, session_action_span, session_map_offset, token_span,
    Span, ACTION_WORDS, INFO_WORDS, MAX_SESSIONS,
};
use crate::region::SharedMemory;
use crate::{Result, ShmError};
use sase_ctx::{Direction, ACD_WORDS, CTX_WORDS};

/// Info record flag: tunnel mode (clear for transport)
pub const INFO_FLAG_TUNNEL_MODE: u8 = 1 << 0;
/// Info record flag: IPv6 outer header
pub const INFO_FLAG_IPV6: u8 = 1 << 1;

/// Per tunnel-direction parameters firmware needs to drive the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct InfoRecord {
    /// SPI
    pub spi: u32,
    /// Encapsulation mode selector
    pub mode: u8,
    /// Address family selector
    pub family: u8,
    /// IV bytes
    pub iv_size: u8,
    /// ICV bytes
    pub icv_size: u8,
    /// Pad block alignment
    pub pad_block: u8,
    /// Used context words
    pub ctx_words: u8,
    /// Used token words
    pub token_words: u8,
    /// `INFO_FLAG_*`
    pub flags: u8,
    /// Ingress interface index
    pub ingress_ifindex: u32,
    /// Egress interface index
    pub egress_ifindex: u32,
    /// Token instruction carrying the payload length
    pub payload_insn: u8,
    /// Token instruction carrying the pad length (0 when unused)
    pub pad_insn: u8,
}

impl InfoRecord {
    /// Pack into the wire record
    pub fn pack(&self) -> [u32; INFO_WORDS] {
        let mut w = [0u32; INFO_WORDS];
        w[0] = self.spi;
        w[1] = self.mode as u32
            | (self.family as u32) << 8
            | (self.iv_size as u32) << 16
            | (self.icv_size as u32) << 24;
        w[2] = self.pad_block as u32
            | (self.ctx_words as u32) << 8
            | (self.token_words as u32) << 16
            | (self.flags as u32) << 24;
        w[3] = self.ingress_ifindex;
        w[4] = self.egress_ifindex;
        w[5] = self.payload_insn as u32 | (self.pad_insn as u32) << 8;
        w
    }

    /// Unpack a wire record
    pub fn unpack(w: &[u32; INFO_WORDS]) -> Self {
        let b = |word: u32, n: u32| (word >> (8 * n)) as u8;
        Self {
            spi: w[0],
            mode: b(w[1], 0),
            family: b(w[1], 1),
            iv_size: b(w[1], 2),
            icv_size: b(w[1], 3),
            pad_block: b(w[2], 0),
            ctx_words: b(w[2], 1),
            token_words: b(w[2], 2),
            flags: b(w[2], 3),
            ingress_ifindex: w[3],
            egress_ifindex: w[4],
            payload_insn: b(w[5], 0),
            pad_insn: b(w[5], 1),
        }
    }
}

fn check_session(session: usize) -> Result<()> {
    if session < MAX_SESSIONS {
        Ok(())
    } else {
        Err(ShmError::InvalidIndex { what: "session", index: session })
    }
}

/// Host-side writer of the per-tunnel tables
pub struct TunnelTables<'a, M: SharedMemory> {
    region: &'a M,
}

impl<'a, M: SharedMemory> TunnelTables<'a, M> {
    pub(crate) fn new(region: &'a M) -> Self {
        Self { region }
    }

    fn read_span<const N: usize>(&self, span: Span) -> [u32; N] {
        debug_assert_eq!(span.words, N);
        let mut out = [0u32; N];
        self.region.read_words(span.offset, &mut out);
        out
    }

    /// Write the info record
    pub fn write_info(&self, tunnel: usize, dir: Direction, info: &InfoRecord) -> Result<()> {
        check_tunnel(tunnel)?;
        self.region.write_words(info_span(tunnel, dir).offset, &info.pack());
        Ok(())
    }

    /// Read back the info record
    pub fn info(&self, tunnel: usize, dir: Direction) -> Result<InfoRecord> {
        check_tunnel(tunnel)?;
        Ok(InfoRecord::unpack(&self.read_span(info_span(tunnel, dir))))
    }

    /// Write the full context record
    pub fn write_context(&self, tunnel: usize, dir: Direction, words: &[u32; CTX_WORDS]) -> Result<()> {
        check_tunnel(tunnel)?;
        self.region.write_words(ctx_span(tunnel, dir).offset, words);
        Ok(())
    }

    /// Read back the context record
    pub fn context(&self, tunnel: usize, dir: Direction) -> Result<[u32; CTX_WORDS]> {
        check_tunnel(tunnel)?;
        Ok(self.read_span(ctx_span(tunnel, dir)))
    }

    /// Write the full token buffer
    pub fn write_token(&self, tunnel: usize, dir: Direction, words: &[u32; ACD_WORDS]) -> Result<()> {
        check_tunnel(tunnel)?;
        self.region.write_words(token_span(tunnel, dir).offset, words);
        Ok(())
    }

    /// Read back the token buffer
    pub fn token(&self, tunnel: usize, dir: Direction) -> Result<[u32; ACD_WORDS]> {
        check_tunnel(tunnel)?;
        Ok(self.read_span(token_span(tunnel, dir)))
    }

    /// Zero info, context and token of one direction
    pub fn clear_sa(&self, tunnel: usize, dir: Direction) -> Result<()> {
        check_tunnel(tunnel)?;
        for span in [info_span(tunnel, dir), ctx_span(tunnel, dir), token_span(tunnel, dir)] {
            self.region.fill(span.offset, span.words, 0);
        }
        Ok(())
    }

    /// Overwrite the default action template of one direction
    pub fn write_default_action(&self, tunnel: usize, dir: Direction, words: &[u32; ACTION_WORDS]) -> Result<()> {
        check_tunnel(tunnel)?;
        self.region.write_words(default_action_span(tunnel, dir).offset, words);
        Ok(())
    }

    /// Read back a default action template
    pub fn default_action(&self, tunnel: usize, dir: Direction) -> Result<[u32; ACTION_WORDS]> {
        check_tunnel(tunnel)?;
        Ok(self.read_span(default_action_span(tunnel, dir)))
    }

    /// Overwrite a session action record
    pub fn write_session_action(&self, tunnel: usize, session: usize, words: &[u32; ACTION_WORDS]) -> Result<()> {
        check_tunnel(tunnel)?;
        check_session(session)?;
        self.region.write_words(session_action_span(tunnel, session).offset, words);
        Ok(())
    }

    /// Read back a session action record
    pub fn session_action(&self, tunnel: usize, session: usize) -> Result<[u32; ACTION_WORDS]> {
        check_tunnel(tunnel)?;
        check_session(session)?;
        Ok(self.read_span(session_action_span(tunnel, session)))
    }

    /// Zero both default action templates
    pub fn clear_actions(&self, tunnel: usize) -> Result<()> {
        check_tunnel(tunnel)?;
        for dir in Direction::ALL {
            let span = default_action_span(tunnel, dir);
            self.region.fill(span.offset, span.words, 0);
        }
        Ok(())
    }

    /// Publish the session-on bitmap
    pub fn set_session_map(&self, tunnel: usize, map: u8) -> Result<()> {
        check_tunnel(tunnel)?;
        self.region.write_word(session_map_offset(tunnel), map as u32);
        Ok(())
    }

    /// Current session-on bitmap
    pub fn session_map(&self, tunnel: usize) -> Result<u8> {
        check_tunnel(tunnel)?;
        Ok(self.region.read_word(session_map_offset(tunnel)) as u8)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::{MAX_TUNNELS, SHM_SIZE};
    use crate::region::HeapRegion;

    fn sample_info() -> InfoRecord {
        InfoRecord {
            spi: 0xCAFE_0001,
            mode: 1,
            family: 2,
            iv_size: 16,
            icv_size: 12,
            pad_block: 16,
            ctx_words: 18,
            token_words: 6,
            flags: INFO_FLAG_TUNNEL_MODE,
            ingress_ifindex: 3,
            egress_ifindex: 4,
            payload_insn: 1,
            pad_insn: 2,
        }
    }

    #[test]
    fn test_info_pack_layout() {
        let w = sample_info().pack();
        assert_eq!(w[0], 0xCAFE_0001);
        assert_eq!(w[1], 0x0C10_0201);
        assert_eq!(w[2], 0x0106_1210);
        assert_eq!(w[5], 0x0201);
        assert_eq!(w[6], 0);
        assert_eq!(InfoRecord::unpack(&w), sample_info());
    }

    #[test]
    fn test_write_and_clear_sa() {
        let region = HeapRegion::new(SHM_SIZE);
        let tables = TunnelTables::new(&region);
        let mut ctx = [0u32; CTX_WORDS];
        ctx[0] = 0xAA;
        ctx[CTX_WORDS - 1] = 0xBB;
        let token = [7u32; ACD_WORDS];

        tables.write_info(5, Direction::Inbound, &sample_info()).unwrap();
        tables.write_context(5, Direction::Inbound, &ctx).unwrap();
        tables.write_token(5, Direction::Inbound, &token).unwrap();
        tables.write_context(5, Direction::Outbound, &ctx).unwrap();

        assert_eq!(tables.info(5, Direction::Inbound).unwrap(), sample_info());
        assert_eq!(tables.context(5, Direction::Inbound).unwrap(), ctx);
        assert_eq!(tables.token(5, Direction::Inbound).unwrap(), token);

        tables.clear_sa(5, Direction::Inbound).unwrap();
        assert_eq!(tables.info(5, Direction::Inbound).unwrap(), InfoRecord::default());
        assert_eq!(tables.context(5, Direction::Inbound).unwrap(), [0; CTX_WORDS]);
        assert_eq!(tables.token(5, Direction::Inbound).unwrap(), [0; ACD_WORDS]);
        // other direction untouched
        assert_eq!(tables.context(5, Direction::Outbound).unwrap(), ctx);
    }

    #[test]
    fn test_actions_and_session_map() {
        let region = HeapRegion::new(SHM_SIZE);
        let tables = TunnelTables::new(&region);
        let action = [0x55u32; ACTION_WORDS];
        tables.write_session_action(1, MAX_SESSIONS - 1, &action).unwrap();
        tables.write_default_action(1, Direction::Outbound, &action).unwrap();
        assert_eq!(tables.session_action(1, MAX_SESSIONS - 1).unwrap(), action);
        assert_eq!(tables.session_action(1, 0).unwrap(), [0; ACTION_WORDS]);

        tables.set_session_map(1, 0b100_0001).unwrap();
        assert_eq!(tables.session_map(1).unwrap(), 0b100_0001);
        assert_eq!(tables.session_map(2).unwrap(), 0);

        tables.clear_actions(1).unwrap();
        assert_eq!(tables.default_action(1, Direction::Outbound).unwrap(), [0; ACTION_WORDS]);
        assert_eq!(tables.session_action(1, MAX_SESSIONS - 1).unwrap(), action);
    }

    #[test]
    fn test_index_checks() {
        let region = HeapRegion::new(SHM_SIZE);
        let tables = TunnelTables::new(&region);
        assert!(matches!(
            tables.session_action(0, MAX_SESSIONS),
            Err(ShmError::InvalidIndex { what: "session", .. })
        ));
        assert!(matches!(
            tables.clear_sa(MAX_TUNNELS, Direction::Outbound),
            Err(ShmError::InvalidIndex { what: "tunnel", .. })
        ));
    }
}
