//! Context Control Words
//!
//! The first two words of every context record tell the engine what the
//! rest of the record holds. They are packed by hand from named bit
//! ranges; nothing depends on compiler bitfield layout.
//!
//! ```text
//! ctrl0: [31..27 rsvd][26..23 hash][22..21 digest][20..17 crypto][16 key_en][15..8 size][3..0 type]
//! ctrl1: [31..24 seq_ptr][23 ptr_ok][18 mask64][17 seq][16 spi][10 ctr][5 iv0][3..0 mode]
//! ```

/// Control word 0 bit ranges
pub mod ctrl0 {
    /// Record type
    pub const TYPE_SHIFT: u32 = 0;
    /// Record type mask
    pub const TYPE_MASK: u32 = 0xF;
    /// Words following the control words
    pub const SIZE_SHIFT: u32 = 8;
    /// Size mask
    pub const SIZE_MASK: u32 = 0xFF;
    /// Cipher key present
    pub const KEY_EN: u32 = 1 << 16;
    /// Crypto algorithm selector
    pub const CRYPTO_ALG_SHIFT: u32 = 17;
    /// Crypto algorithm mask
    pub const CRYPTO_ALG_MASK: u32 = 0xF;
    /// Digest type
    pub const DIGEST_SHIFT: u32 = 21;
    /// Digest type mask
    pub const DIGEST_MASK: u32 = 0x3;
    /// Hash algorithm selector
    pub const HASH_ALG_SHIFT: u32 = 23;
    /// Hash algorithm mask
    pub const HASH_ALG_MASK: u32 = 0xF;

    /// Digest type: none
    pub const DIGEST_NONE: u8 = 0x0;
    /// Digest type: HMAC with precomputed inner/outer state
    pub const DIGEST_HMAC: u8 = 0x3;
}

/// Control word 1 bit ranges
pub mod ctrl1 {
    /// Crypto mode
    pub const MODE_SHIFT: u32 = 0;
    /// Crypto mode mask
    pub const MODE_MASK: u32 = 0xF;
    /// IV word 0 taken from the record (RFC 3686 nonce)
    pub const IV0: u32 = 1 << 5;
    /// Counter mode
    pub const COUNTER_MODE: u32 = 1 << 10;
    /// SPI present in the record
    pub const SPI: u32 = 1 << 16;
    /// 32-bit sequence number present
    pub const SEQ: u32 = 1 << 17;
    /// 64-bit anti-replay mask present
    pub const SEQ_MASK_64: u32 = 1 << 18;
    /// Sequence pointer is valid
    pub const SEQ_PTR_AVAIL: u32 = 1 << 23;
    /// Sequence pointer (word offset inside the record)
    pub const SEQ_PTR_SHIFT: u32 = 24;
    /// Sequence pointer mask
    pub const SEQ_PTR_MASK: u32 = 0xFF;
}

#[inline(always)]
fn field(word: u32, shift: u32, mask: u32) -> u32 {
    (word >> shift) & mask
}

/// Record type selector
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ContextType {
    /// Authenticate only, egress
    HashOut = 0x2,
    /// Authenticate only, ingress
    HashIn = 0x3,
    /// Encrypt only, egress
    CryptoOut = 0x4,
    /// Decrypt only, ingress
    CryptoIn = 0x5,
    /// Encrypt then hash, egress
    EncryptHashOut = 0x6,
    /// Hash then decrypt, ingress
    HashDecryptIn = 0xF,
}

impl ContextType {
    /// Decode a type selector
    pub fn from_bits(bits: u8) -> Option<Self> {
        Some(match bits {
            0x2 => ContextType::HashOut,
            0x3 => ContextType::HashIn,
            0x4 => ContextType::CryptoOut,
            0x5 => ContextType::CryptoIn,
            0x6 => ContextType::EncryptHashOut,
            0xF => ContextType::HashDecryptIn,
            _ => return None,
        })
    }
}

/// Control word 0
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlWord0 {
    /// Record type
    pub ty: ContextType,
    /// Record words following the control words
    pub size: u8,
    /// Cipher key present
    pub key_en: bool,
    /// Crypto algorithm selector
    pub crypto_alg: u8,
    /// Digest type
    pub digest: u8,
    /// Hash algorithm selector
    pub hash_alg: u8,
}

impl ControlWord0 {
    /// Pack into the wire word
    pub fn pack(&self) -> u32 {
        let mut w = (self.ty as u32 & ctrl0::TYPE_MASK) << ctrl0::TYPE_SHIFT;
        w |= (self.size as u32 & ctrl0::SIZE_MASK) << ctrl0::SIZE_SHIFT;
        if self.key_en {
            w |= ctrl0::KEY_EN;
        }
        w |= (self.crypto_alg as u32 & ctrl0::CRYPTO_ALG_MASK) << ctrl0::CRYPTO_ALG_SHIFT;
        w |= (self.digest as u32 & ctrl0::DIGEST_MASK) << ctrl0::DIGEST_SHIFT;
        w |= (self.hash_alg as u32 & ctrl0::HASH_ALG_MASK) << ctrl0::HASH_ALG_SHIFT;
        w
    }

    /// Unpack a wire word; `None` for an unknown record type
    pub fn unpack(word: u32) -> Option<Self> {
        Some(Self {
            ty: ContextType::from_bits(field(word, ctrl0::TYPE_SHIFT, ctrl0::TYPE_MASK) as u8)?,
            size: field(word, ctrl0::SIZE_SHIFT, ctrl0::SIZE_MASK) as u8,
            key_en: word & ctrl0::KEY_EN != 0,
            crypto_alg: field(word, ctrl0::CRYPTO_ALG_SHIFT, ctrl0::CRYPTO_ALG_MASK) as u8,
            digest: field(word, ctrl0::DIGEST_SHIFT, ctrl0::DIGEST_MASK) as u8,
            hash_alg: field(word, ctrl0::HASH_ALG_SHIFT, ctrl0::HASH_ALG_MASK) as u8,
        })
    }
}

/// Control word 1
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ControlWord1 {
    /// Crypto mode selector
    pub mode: u8,
    /// IV word 0 comes from the record
    pub iv0: bool,
    /// Counter mode
    pub counter_mode: bool,
    /// SPI present
    pub spi: bool,
    /// Sequence number present
    pub seq: bool,
    /// 64-bit replay mask present
    pub seq_mask_64: bool,
    /// Word offset of the sequence number (outbound)
    pub seq_ptr: Option<u8>,
}

impl ControlWord1 {
    /// Pack into the wire word
    pub fn pack(&self) -> u32 {
        let mut w = (self.mode as u32 & ctrl1::MODE_MASK) << ctrl1::MODE_SHIFT;
        for (set, bit) in [
            (self.iv0, ctrl1::IV0),
            (self.counter_mode, ctrl1::COUNTER_MODE),
            (self.spi, ctrl1::SPI),
            (self.seq, ctrl1::SEQ),
            (self.seq_mask_64, ctrl1::SEQ_MASK_64),
        ] {
            if set {
                w |= bit;
            }
        }
        if let Some(ptr) = self.seq_ptr {
            w |= ctrl1::SEQ_PTR_AVAIL;
            w |= (ptr as u32 & ctrl1::SEQ_PTR_MASK) << ctrl1::SEQ_PTR_SHIFT;
        }
        w
    }

    /// Unpack a wire word
    pub fn unpack(word: u32) -> Self {
        Self {
            mode: field(word, ctrl1::MODE_SHIFT, ctrl1::MODE_MASK) as u8,
            iv0: word & ctrl1::IV0 != 0,
            counter_mode: word & ctrl1::COUNTER_MODE != 0,
            spi: word & ctrl1::SPI != 0,
            seq: word & ctrl1::SEQ != 0,
            seq_mask_64: word & ctrl1::SEQ_MASK_64 != 0,
            seq_ptr: (word & ctrl1::SEQ_PTR_AVAIL != 0)
                .then(|| field(word, ctrl1::SEQ_PTR_SHIFT, ctrl1::SEQ_PTR_MASK) as u8),
        }
    }
}
