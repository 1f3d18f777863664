//! SA Context Record
//!
//! One record per tunnel direction, built once when the SA is installed and
//! left untouched until the SA is removed (the engine itself updates the
//! sequence number / replay mask words in place).
//!
//! # Layout
//!
//! ```text
//! word  0      ctrl0
//! word  1      ctrl1
//! word  2..    cipher key (raw bytes, memory order)
//!              RFC 3686 nonce (ctr(aes) only)
//!              HMAC inner state
//!              HMAC outer state
//!              SPI
//!              sequence number          <- ctrl1.seq_ptr (outbound)
//!              replay mask lo / hi      (inbound only)
//! ```

use crate::algo::{compute_iv_size, compute_pad_block_size, lookup_auth, lookup_cipher, CipherMode};
use crate::control::{ctrl0, ContextType, ControlWord0, ControlWord1};
use crate::hash_pad::derive_hash_pad;
use crate::{Direction, Result, SaError, CTX_WORDS};

/// Initial sequence number; the engine increments before use
pub const INITIAL_SEQ: u32 = 0;

/// Inbound anti-replay mask seed: sequence number 0 is never valid in ESP
pub const REPLAY_MASK_SEED: u64 = 0x0000_0000_0000_0001;

/// Fixed words after the variable part: SPI + sequence number
const OUTBOUND_OVERHEAD: usize = 2;

/// SPI + sequence number + 64-bit mask
const INBOUND_OVERHEAD: usize = 4;

/// Word offsets of the record sections
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ContextLayout {
    /// First cipher key word
    pub key: usize,
    /// Cipher key words
    pub key_words: usize,
    /// RFC 3686 nonce word, if any
    pub nonce: Option<usize>,
    /// First inner state word
    pub ipad: usize,
    /// First outer state word
    pub opad: usize,
    /// Words per HMAC state
    pub state_words: usize,
    /// SPI word
    pub spi: usize,
    /// Sequence number word
    pub seq: usize,
    /// Replay mask words (inbound)
    pub mask: Option<usize>,
    /// Total record words, control words included
    pub len: usize,
}

/// Per-packet geometry implied by the algorithms
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SaGeometry {
    /// IV bytes carried after the ESP header
    pub iv_size: usize,
    /// ICV bytes carried in the trailer
    pub icv_size: usize,
    /// Pad block alignment of the encrypted payload
    pub pad_block: usize,
}

/// Fixed-capacity context record
#[derive(Clone, PartialEq, Eq)]
pub struct ContextBlob {
    words: [u32; CTX_WORDS],
    layout: ContextLayout,
    direction: Direction,
    geometry: SaGeometry,
}

impl ContextBlob {
    /// Used part of the record
    pub fn as_words(&self) -> &[u32] {
        &self.words[..self.layout.len]
    }

    /// Full record, zero-filled past the used part
    pub fn words(&self) -> &[u32; CTX_WORDS] {
        &self.words
    }

    /// Section offsets
    pub fn layout(&self) -> &ContextLayout {
        &self.layout
    }

    /// Direction the record was built for
    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// IV / ICV / pad geometry
    pub fn geometry(&self) -> SaGeometry {
        self.geometry
    }

    /// Decoded control word 0
    pub fn control0(&self) -> Option<ControlWord0> {
        ControlWord0::unpack(self.words[0])
    }

    /// Decoded control word 1
    pub fn control1(&self) -> ControlWord1 {
        ControlWord1::unpack(self.words[1])
    }

    /// SPI stored in the record
    pub fn spi(&self) -> u32 {
        self.words[self.layout.spi]
    }

    /// Initial sequence number stored in the record
    pub fn seq(&self) -> u32 {
        self.words[self.layout.seq]
    }

    /// Inbound replay mask seed
    pub fn replay_mask(&self) -> Option<u64> {
        self.layout.mask.map(|m| {
            (self.words[m] as u64) | ((self.words[m + 1] as u64) << 32)
        })
    }
}

impl std::fmt::Debug for ContextBlob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Key material stays out of logs
        f.debug_struct("ContextBlob")
            .field("direction", &self.direction)
            .field("ctrl0", &format_args!("{:#010x}", self.words[0]))
            .field("ctrl1", &format_args!("{:#010x}", self.words[1]))
            .field("layout", &self.layout)
            .finish_non_exhaustive()
    }
}

/// Pack raw bytes into record words without reordering them in memory
fn push_bytes(words: &mut [u32], at: usize, bytes: &[u8]) -> usize {
    let mut n = 0;
    for chunk in bytes.chunks(4) {
        let mut b = [0u8; 4];
        b[..chunk.len()].copy_from_slice(chunk);
        words[at + n] = u32::from_le_bytes(b);
        n += 1;
    }
    n
}

/// Build the context record for one SA direction.
///
/// Fails without side effects on an unknown algorithm name, an unsupported
/// key size, or a failed HMAC state derivation.
pub fn build_context(
    direction: Direction,
    cipher_algo: &str,
    cipher_key: &[u8],
    auth_algo: &str,
    auth_key: &[u8],
    spi: u32,
) -> Result<ContextBlob> {
    let cipher = lookup_cipher(cipher_algo)?;
    let auth = lookup_auth(auth_algo)?;

    if cipher.is_null() && auth.is_null() {
        return Err(SaError::UnsupportedAlgorithm(format!(
            "{} + {}",
            cipher.name, auth.name
        )));
    }

    let (key, nonce) = cipher.split_key(cipher_key)?;
    let crypto_alg = cipher.crypto_alg(key.len())?;

    let pad = if auth.is_null() {
        if !auth_key.is_empty() {
            return Err(SaError::InvalidKeySize {
                algorithm: auth.name,
                len: auth_key.len(),
            });
        }
        None
    } else {
        Some(derive_hash_pad(auth.hash, auth_key)?)
    };

    let geometry = SaGeometry {
        iv_size: compute_iv_size(cipher.family, cipher.mode)?,
        icv_size: auth.icv_size,
        pad_block: compute_pad_block_size(cipher)?,
    };

    let key_words = key.len().div_ceil(4);
    let nonce_words = nonce.len().div_ceil(4);
    let state_words = auth.hash.state_words();
    let overhead = match direction {
        Direction::Outbound => OUTBOUND_OVERHEAD,
        Direction::Inbound => INBOUND_OVERHEAD,
    };
    let size = key_words + nonce_words + 2 * state_words + overhead;
    let needed = 2 + size;
    if needed > CTX_WORDS || size > ctrl0::SIZE_MASK as usize {
        return Err(SaError::ContextOverflow { needed, capacity: CTX_WORDS });
    }

    let mut layout = ContextLayout {
        key: 2,
        key_words,
        state_words,
        ..Default::default()
    };
    let mut words = [0u32; CTX_WORDS];
    let mut at = layout.key;
    at += push_bytes(&mut words, at, key);
    if nonce_words > 0 {
        layout.nonce = Some(at);
        at += push_bytes(&mut words, at, nonce);
    }
    layout.ipad = at;
    layout.opad = at + state_words;
    if let Some(pad) = &pad {
        for (i, w) in pad.ipad.record_words().enumerate() {
            words[layout.ipad + i] = w;
        }
        for (i, w) in pad.opad.record_words().enumerate() {
            words[layout.opad + i] = w;
        }
    }
    at = layout.opad + state_words;
    layout.spi = at;
    layout.seq = at + 1;
    words[layout.spi] = spi;
    words[layout.seq] = INITIAL_SEQ;
    at += 2;
    if direction == Direction::Inbound {
        layout.mask = Some(at);
        words[at] = REPLAY_MASK_SEED as u32;
        words[at + 1] = (REPLAY_MASK_SEED >> 32) as u32;
        at += 2;
    }
    layout.len = at;
    debug_assert_eq!(layout.len, needed);

    let ty = match (direction, cipher.is_null(), auth.is_null()) {
        (Direction::Outbound, false, false) => ContextType::EncryptHashOut,
        (Direction::Inbound, false, false) => ContextType::HashDecryptIn,
        (Direction::Outbound, true, _) => ContextType::HashOut,
        (Direction::Inbound, true, _) => ContextType::HashIn,
        (Direction::Outbound, false, true) => ContextType::CryptoOut,
        (Direction::Inbound, false, true) => ContextType::CryptoIn,
    };

    words[0] = ControlWord0 {
        ty,
        size: size as u8,
        key_en: !key.is_empty(),
        crypto_alg,
        digest: if pad.is_some() { ctrl0::DIGEST_HMAC } else { ctrl0::DIGEST_NONE },
        hash_alg: auth.hash.selector(),
    }
    .pack();

    let ctr = cipher.mode == CipherMode::Ctr;
    words[1] = ControlWord1 {
        mode: cipher.mode.selector(),
        iv0: ctr,
        counter_mode: ctr,
        spi: true,
        seq: true,
        seq_mask_64: direction == Direction::Inbound,
        seq_ptr: (direction == Direction::Outbound).then_some(layout.seq as u8),
    }
    .pack();

    tracing::trace!(
        spi,
        direction = %direction,
        cipher = cipher.name,
        auth = auth.name,
        words = layout.len,
        "context record built"
    );

    Ok(ContextBlob {
        words,
        layout,
        direction,
        geometry,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algo::{AUTHS, CIPHERS};
    use crate::control::ctrl1;

    const SPI: u32 = 0x1234_5678;

    fn aes_sha1(direction: Direction) -> ContextBlob {
        build_context(direction, "cbc(aes)", &[0x11; 16], "hmac(sha1)", &[0x22; 20], SPI).unwrap()
    }

    fn key_for(name: &str) -> Vec<u8> {
        match name {
            "ecb(cipher_null)" => vec![],
            "cbc(des)" => vec![1; 8],
            "cbc(des3_ede)" => vec![2; 24],
            "cbc(aes)" => vec![3; 32],
            "rfc3686(ctr(aes))" => vec![4; 20],
            other => panic!("no test key for {other}"),
        }
    }

    #[test]
    fn test_outbound_layout() {
        let blob = aes_sha1(Direction::Outbound);
        let l = blob.layout();
        assert_eq!(l.key, 2);
        assert_eq!(l.key_words, 4);
        assert_eq!(l.ipad, 6);
        assert_eq!(l.opad, 11);
        assert_eq!(l.spi, 16);
        assert_eq!(l.seq, 17);
        assert_eq!(l.mask, None);
        assert_eq!(l.len, 18);
        assert_eq!(blob.spi(), SPI);
        assert_eq!(blob.seq(), INITIAL_SEQ);
    }

    #[test]
    fn test_size_field_encodes_record() {
        for dir in Direction::ALL {
            let blob = aes_sha1(dir);
            let c0 = blob.control0().unwrap();
            // key 4 + 2 * sha1 state 5 + overhead
            let overhead = if dir == Direction::Outbound { 2 } else { 4 };
            assert_eq!(c0.size as usize, 4 + 10 + overhead);
            assert_eq!(c0.size as usize + 2, blob.as_words().len());
        }
    }

    #[test]
    fn test_direction_specific_control() {
        let out = aes_sha1(Direction::Outbound);
        let c1 = out.control1();
        assert!(c1.spi && c1.seq && !c1.seq_mask_64);
        assert_eq!(c1.seq_ptr, Some(out.layout().seq as u8));
        assert_eq!(out.control0().unwrap().ty, ContextType::EncryptHashOut);

        let inb = aes_sha1(Direction::Inbound);
        let c1 = inb.control1();
        assert!(c1.seq_mask_64);
        assert_eq!(c1.seq_ptr, None);
        assert_eq!(inb.words()[1] & ctrl1::SEQ_PTR_AVAIL, 0);
        assert_eq!(inb.replay_mask(), Some(REPLAY_MASK_SEED));
        assert_eq!(inb.control0().unwrap().ty, ContextType::HashDecryptIn);
    }

    #[test]
    fn test_key_bytes_in_memory_order() {
        let key: Vec<u8> = (0u8..16).collect();
        let blob = build_context(Direction::Outbound, "cbc(aes)", &key, "hmac(sha256)", b"k", 1).unwrap();
        let mut bytes = Vec::new();
        for w in &blob.as_words()[2..6] {
            bytes.extend_from_slice(&w.to_le_bytes());
        }
        assert_eq!(bytes, key);
    }

    #[test]
    fn test_every_table_combination_fits() {
        for cipher in CIPHERS {
            for auth in AUTHS {
                if cipher.is_null() && auth.is_null() {
                    continue;
                }
                let auth_key: &[u8] = if auth.is_null() { &[] } else { b"auth-key" };
                for dir in Direction::ALL {
                    let blob = build_context(dir, cipher.name, &key_for(cipher.name), auth.name, auth_key, 7)
                        .unwrap_or_else(|e| panic!("{} / {}: {e}", cipher.name, auth.name));
                    assert_eq!(blob.words().len(), CTX_WORDS);
                    assert!(blob.as_words().len() <= CTX_WORDS);
                    assert_eq!(blob.control0().unwrap().size as usize + 2, blob.as_words().len());
                }
            }
        }
    }

    #[test]
    fn test_rfc3686_nonce_word() {
        let mut key = vec![0xAA; 16];
        key.extend_from_slice(&[1, 2, 3, 4]);
        let blob = build_context(Direction::Outbound, "rfc3686(ctr(aes))", &key, "hmac(sha256)", b"k", 9).unwrap();
        let nonce = blob.layout().nonce.unwrap();
        assert_eq!(blob.words()[nonce], u32::from_le_bytes([1, 2, 3, 4]));
        assert!(blob.control1().counter_mode);
        assert_eq!(blob.geometry().iv_size, 8);
    }

    #[test]
    fn test_rejects_bad_input() {
        assert!(matches!(
            build_context(Direction::Outbound, "cbc(aes)", &[0; 15], "hmac(sha1)", b"k", 1),
            Err(SaError::InvalidKeySize { len: 15, .. })
        ));
        assert!(matches!(
            build_context(Direction::Outbound, "cbc(twofish)", &[0; 16], "hmac(sha1)", b"k", 1),
            Err(SaError::UnsupportedAlgorithm(_))
        ));
        assert!(matches!(
            build_context(Direction::Inbound, "ecb(cipher_null)", &[], "digest_null", &[], 1),
            Err(SaError::UnsupportedAlgorithm(_))
        ));
        assert!(matches!(
            build_context(Direction::Inbound, "cbc(aes)", &[0; 16], "digest_null", b"stray", 1),
            Err(SaError::InvalidKeySize { algorithm: "digest_null", .. })
        ));
    }

    #[test]
    fn test_debug_hides_key() {
        let blob = build_context(Direction::Outbound, "cbc(aes)", &[0xEE; 16], "hmac(sha1)", b"k", 1).unwrap();
        let s = format!("{blob:?}");
        assert!(!s.contains("eeeeeeee"));
        assert!(s.contains("ContextBlob"));
    }
}
