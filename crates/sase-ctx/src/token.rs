//! Instruction Token Builder
//!
//! A token is the per-SA processing program the engine runs over each
//! packet. Lengths that depend on the packet (payload, padding) are left at
//! zero and patched by the firmware core before every submission.
//!
//! ```text
//! outbound: INSERT hdr+iv │ DIRECTION │ INSERT pad │ INSERT icv │ VERIFY │ CTX seq
//! inbound:  RETRIEVE hdr+iv │ DIRECTION │ RETRIEVE icv │ VERIFY │ CTX seq+mask
//! ```
//!
//! Instruction word:
//! `[31..28 opcode][27..20 instructions][18..17 stat][16..0 length]`

use crate::{
    Direction, Result, SaError, ACD_WORDS, ESP_HEADER_LEN, INBOUND_TOKEN_INSNS,
    OUTBOUND_TOKEN_INSNS,
};

/// Length field shift
pub const LENGTH_SHIFT: u32 = 0;
/// Length field mask (17 bits)
pub const LENGTH_MASK: u32 = 0x1_FFFF;
/// Stat field shift
pub const STAT_SHIFT: u32 = 17;
/// Stat field mask
pub const STAT_MASK: u32 = 0x3;
/// Instruction field shift
pub const INS_SHIFT: u32 = 20;
/// Instruction field mask
pub const INS_MASK: u32 = 0xFF;
/// Opcode shift
pub const OPCODE_SHIFT: u32 = 28;
/// Opcode mask
pub const OPCODE_MASK: u32 = 0xF;

/// VERIFY: compare the ICV, low bits hold its length
pub const VERIFY_ICV: u32 = 1 << 16;

/// Largest ICV a token can verify
pub const MAX_ICV_SIZE: usize = 64;

/// Largest IV a token can insert or strip
pub const MAX_IV_SIZE: usize = 16;

/// Index of the per-packet DIRECTION instruction (both directions)
pub const PAYLOAD_INSN: usize = 1;

/// Index of the per-packet padding INSERT (outbound)
pub const PAD_INSN: usize = 2;

/// Stat bits
pub mod stat {
    /// Last instruction feeding the hash
    pub const LAST_HASH: u8 = 1 << 0;
    /// Last instruction of the packet
    pub const LAST_PACKET: u8 = 1 << 1;
}

/// Instruction bits
pub mod ins {
    /// Data goes to the output packet
    pub const OUTPUT: u8 = 1 << 5;
    /// Data feeds the hash
    pub const HASH: u8 = 1 << 6;
    /// Data goes through the cipher
    pub const CRYPTO: u8 = 1 << 7;

    /// INSERT origin: bytes come from the token / context (ESP header, IV)
    pub const ORIGIN_TOKEN: u8 = 0x1B;
    /// INSERT origin: IV register
    pub const ORIGIN_IV: u8 = 0x14;
    /// INSERT origin: final hash digest
    pub const ORIGIN_HASH_DIGEST: u8 = 0x1C;
    /// INSERT origin: ESP trailer padding
    pub const ORIGIN_PAD: u8 = 0x1D;

    /// VERIFY: SPI matches the context
    pub const VERIFY_SPI: u8 = 1 << 0;
    /// VERIFY: sequence number passes the replay window
    pub const VERIFY_SEQ: u8 = 1 << 1;
    /// VERIFY: trailer padding is well formed
    pub const VERIFY_PAD: u8 = 1 << 2;

    /// CTX_ACCESS: write back the sequence number
    pub const CTX_UPDATE_SEQ: u8 = 1 << 0;
    /// CTX_ACCESS: write back the replay mask
    pub const CTX_UPDATE_MASK: u8 = 1 << 1;
}

/// Token opcode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Opcode {
    /// Process packet data
    Direction = 0x0,
    /// Insert generated data
    Insert = 0x2,
    /// Remove data from the packet
    Retrieve = 0x4,
    /// Check results
    Verify = 0xD,
    /// Read or write context words
    CtxAccess = 0xE,
}

impl Opcode {
    /// Decode an opcode nibble
    pub fn from_bits(bits: u8) -> Option<Self> {
        Some(match bits {
            0x0 => Opcode::Direction,
            0x2 => Opcode::Insert,
            0x4 => Opcode::Retrieve,
            0xD => Opcode::Verify,
            0xE => Opcode::CtxAccess,
            _ => return None,
        })
    }
}

/// One token instruction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenInstruction {
    /// Operation
    pub opcode: Opcode,
    /// Length / operand (17 bits)
    pub length: u32,
    /// Stat bits
    pub stat: u8,
    /// Instruction bits
    pub instructions: u8,
}

impl TokenInstruction {
    const fn new(opcode: Opcode, length: u32, stat: u8, instructions: u8) -> Self {
        Self { opcode, length, stat, instructions }
    }

    /// Pack into the wire word
    pub fn pack(&self) -> u32 {
        ((self.opcode as u32 & OPCODE_MASK) << OPCODE_SHIFT)
            | ((self.instructions as u32 & INS_MASK) << INS_SHIFT)
            | ((self.stat as u32 & STAT_MASK) << STAT_SHIFT)
            | ((self.length & LENGTH_MASK) << LENGTH_SHIFT)
    }

    /// Unpack a wire word; `None` for an unknown opcode
    pub fn unpack(word: u32) -> Option<Self> {
        Some(Self {
            opcode: Opcode::from_bits(((word >> OPCODE_SHIFT) & OPCODE_MASK) as u8)?,
            instructions: ((word >> INS_SHIFT) & INS_MASK) as u8,
            stat: ((word >> STAT_SHIFT) & STAT_MASK) as u8,
            length: (word >> LENGTH_SHIFT) & LENGTH_MASK,
        })
    }

    /// True when this instruction ends the packet
    pub fn is_last(&self) -> bool {
        self.stat & stat::LAST_PACKET != 0
    }
}

/// Fixed-capacity token
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenSequence {
    words: [u32; ACD_WORDS],
    count: usize,
    direction: Direction,
}

impl TokenSequence {
    /// Used instruction words
    pub fn as_words(&self) -> &[u32] {
        &self.words[..self.count]
    }

    /// Full buffer, zero-filled past the last instruction
    pub fn words(&self) -> &[u32; ACD_WORDS] {
        &self.words
    }

    /// Instruction count
    pub fn len(&self) -> usize {
        self.count
    }

    /// True for an empty token
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Direction the token was built for
    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Decoded instructions
    pub fn instructions(&self) -> impl Iterator<Item = TokenInstruction> + '_ {
        self.as_words().iter().filter_map(|w| TokenInstruction::unpack(*w))
    }

    /// Index of the padding instruction firmware patches, if any
    pub fn pad_index(&self) -> Option<usize> {
        (self.direction == Direction::Outbound).then_some(PAD_INSN)
    }

    fn push(&mut self, insn: TokenInstruction) {
        self.words[self.count] = insn.pack();
        self.count += 1;
    }
}

/// Build the processing token for one SA direction
pub fn build_token(direction: Direction, icv_size: usize, iv_size: usize) -> Result<TokenSequence> {
    if icv_size > MAX_ICV_SIZE || icv_size % 4 != 0 || iv_size > MAX_IV_SIZE {
        return Err(SaError::InvalidTokenParams { icv_size, iv_size });
    }

    let header = (ESP_HEADER_LEN + iv_size) as u32;
    let icv = icv_size as u32;
    let mut token = TokenSequence {
        words: [0; ACD_WORDS],
        count: 0,
        direction,
    };

    match direction {
        Direction::Outbound => {
            token.push(TokenInstruction::new(
                Opcode::Insert,
                header,
                0,
                ins::OUTPUT | ins::HASH | ins::ORIGIN_TOKEN,
            ));
            token.push(TokenInstruction::new(
                Opcode::Direction,
                0,
                0,
                ins::OUTPUT | ins::HASH | ins::CRYPTO,
            ));
            token.push(TokenInstruction::new(
                Opcode::Insert,
                0,
                stat::LAST_HASH,
                ins::OUTPUT | ins::HASH | ins::CRYPTO | ins::ORIGIN_PAD,
            ));
            token.push(TokenInstruction::new(
                Opcode::Insert,
                icv,
                0,
                ins::OUTPUT | ins::ORIGIN_HASH_DIGEST,
            ));
            token.push(TokenInstruction::new(Opcode::Verify, 0, 0, 0));
            token.push(TokenInstruction::new(
                Opcode::CtxAccess,
                1,
                stat::LAST_PACKET,
                ins::CTX_UPDATE_SEQ,
            ));
            debug_assert_eq!(token.count, OUTBOUND_TOKEN_INSNS);
        }
        Direction::Inbound => {
            token.push(TokenInstruction::new(Opcode::Retrieve, header, 0, ins::HASH));
            token.push(TokenInstruction::new(
                Opcode::Direction,
                0,
                stat::LAST_HASH,
                ins::OUTPUT | ins::HASH | ins::CRYPTO,
            ));
            token.push(TokenInstruction::new(Opcode::Retrieve, icv, 0, 0));
            token.push(TokenInstruction::new(
                Opcode::Verify,
                VERIFY_ICV | icv,
                0,
                ins::VERIFY_SPI | ins::VERIFY_SEQ | ins::VERIFY_PAD,
            ));
            // Sequence number + 64-bit mask, addressed from the sequence word
            token.push(TokenInstruction::new(
                Opcode::CtxAccess,
                3,
                stat::LAST_PACKET,
                ins::CTX_UPDATE_SEQ | ins::CTX_UPDATE_MASK,
            ));
            debug_assert_eq!(token.count, INBOUND_TOKEN_INSNS);
        }
    }

    Ok(token)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{build_context, Direction};
    use proptest::prelude::*;

    #[test]
    fn test_instruction_counts() {
        let out = build_token(Direction::Outbound, 12, 16).unwrap();
        let inb = build_token(Direction::Inbound, 12, 16).unwrap();
        assert_eq!(out.len(), OUTBOUND_TOKEN_INSNS);
        assert_eq!(inb.len(), INBOUND_TOKEN_INSNS);
        assert_eq!(out.words().len(), ACD_WORDS);
        assert!(out.words()[OUTBOUND_TOKEN_INSNS..].iter().all(|w| *w == 0));
    }

    #[test]
    fn test_outbound_order() {
        let token = build_token(Direction::Outbound, 16, 16).unwrap();
        let ops: Vec<Opcode> = token.instructions().map(|i| i.opcode).collect();
        assert_eq!(
            ops,
            vec![
                Opcode::Insert,
                Opcode::Direction,
                Opcode::Insert,
                Opcode::Insert,
                Opcode::Verify,
                Opcode::CtxAccess
            ]
        );
        let insns: Vec<_> = token.instructions().collect();
        assert_eq!(insns[0].length, 24);
        assert_eq!(insns[PAYLOAD_INSN].length, 0);
        assert_eq!(insns[PAD_INSN].length, 0);
        assert_eq!(insns[3].length, 16);
        assert!(insns[5].is_last());
        assert_eq!(token.pad_index(), Some(PAD_INSN));
    }

    #[test]
    fn test_inbound_order() {
        let token = build_token(Direction::Inbound, 12, 8).unwrap();
        let insns: Vec<_> = token.instructions().collect();
        assert_eq!(insns[0].opcode, Opcode::Retrieve);
        assert_eq!(insns[0].length, 16);
        assert_eq!(insns[2].opcode, Opcode::Retrieve);
        assert_eq!(insns[2].length, 12);
        assert_eq!(insns[3].opcode, Opcode::Verify);
        assert_eq!(insns[3].length, VERIFY_ICV | 12);
        assert_eq!(
            insns[4].instructions,
            ins::CTX_UPDATE_SEQ | ins::CTX_UPDATE_MASK
        );
        assert_eq!(token.pad_index(), None);
    }

    #[test]
    fn test_rejects_unencodable_sizes() {
        assert!(build_token(Direction::Outbound, 13, 16).is_err());
        assert!(build_token(Direction::Outbound, 68, 16).is_err());
        assert!(build_token(Direction::Inbound, 12, 32).is_err());
    }

    #[test]
    fn test_token_from_context_geometry() {
        let blob = build_context(Direction::Inbound, "cbc(des3_ede)", &[5; 24], "hmac(sha512)", b"k", 3).unwrap();
        let g = blob.geometry();
        let token = build_token(Direction::Inbound, g.icv_size, g.iv_size).unwrap();
        let verify = token.instructions().nth(3).unwrap();
        assert_eq!(verify.length & LENGTH_MASK & !VERIFY_ICV, 32);
    }

    #[test]
    fn test_opcode_position() {
        let w = TokenInstruction::new(Opcode::CtxAccess, 1, stat::LAST_PACKET, ins::CTX_UPDATE_SEQ).pack();
        assert_eq!(w >> 28, 0xE);
        assert_eq!((w >> 17) & 0x3, 0x2);
        assert_eq!((w >> 20) & 0xFF, 0x1);
        assert_eq!(w & 0x1FFFF, 1);
    }

    proptest! {
        #[test]
        fn test_instruction_pack_unpack(
            op in prop_oneof![
                Just(Opcode::Direction),
                Just(Opcode::Insert),
                Just(Opcode::Retrieve),
                Just(Opcode::Verify),
                Just(Opcode::CtxAccess),
            ],
            length in 0u32..=LENGTH_MASK,
            st in 0u8..4,
            instructions in any::<u8>(),
        ) {
            let insn = TokenInstruction::new(op, length, st, instructions);
            prop_assert_eq!(TokenInstruction::unpack(insn.pack()), Some(insn));
        }
    }
}
