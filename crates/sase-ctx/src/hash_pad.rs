//! HMAC Pad Derivation
//!
//! The engine never sees the raw authentication key. It gets the hash state
//! reached after compressing `K ^ ipad` and `K ^ opad`, one block each, and
//! resumes from those states for every packet.
//!
//! # Byte order
//!
//! The exported state is serialized in the hash's natural word order:
//! big-endian for the SHA family, little-endian for MD5.

use crate::algo::HashAlgorithm;
use crate::{Result, SaError};
use md5::Md5;
use sha1::Sha1;
use sha2::digest::generic_array::GenericArray;
use sha2::{Digest, Sha224, Sha256, Sha384, Sha512};

/// HMAC inner pad byte
pub const HMAC_IPAD: u8 = 0x36;

/// HMAC outer pad byte
pub const HMAC_OPAD: u8 = 0x5c;

/// Largest exported state (SHA-512)
pub const MAX_STATE_BYTES: usize = 64;

/// Largest compression block (SHA-512)
const MAX_BLOCK_BYTES: usize = 128;

const MD5_IV: [u32; 4] = [0x6745_2301, 0xefcd_ab89, 0x98ba_dcfe, 0x1032_5476];

const SHA1_IV: [u32; 5] = [0x6745_2301, 0xefcd_ab89, 0x98ba_dcfe, 0x1032_5476, 0xc3d2_e1f0];

const SHA224_IV: [u32; 8] = [
    0xc105_9ed8, 0x367c_d507, 0x3070_dd17, 0xf70e_5939,
    0xffc0_0b31, 0x6858_1511, 0x64f9_8fa7, 0xbefa_4fa4,
];

const SHA256_IV: [u32; 8] = [
    0x6a09_e667, 0xbb67_ae85, 0x3c6e_f372, 0xa54f_f53a,
    0x510e_527f, 0x9b05_688c, 0x1f83_d9ab, 0x5be0_cd19,
];

const SHA384_IV: [u64; 8] = [
    0xcbbb_9d5d_c105_9ed8, 0x629a_292a_367c_d507,
    0x9159_015a_3070_dd17, 0x152f_ecd8_f70e_5939,
    0x6733_2667_ffc0_0b31, 0x8eb4_4a87_6858_1511,
    0xdb0c_2e0d_64f9_8fa7, 0x47b5_481d_befa_4fa4,
];

const SHA512_IV: [u64; 8] = [
    0x6a09_e667_f3bc_c908, 0xbb67_ae85_84ca_a73b,
    0x3c6e_f372_fe94_f82b, 0xa54f_f53a_5f1d_36f1,
    0x510e_527f_ade6_82d1, 0x9b05_688c_2b3e_6c1f,
    0x1f83_d9ab_fb41_bd6b, 0x5be0_cd19_137e_2179,
];

/// Intermediate hash state after one compression
#[derive(Clone, PartialEq, Eq)]
pub struct HashState {
    bytes: [u8; MAX_STATE_BYTES],
    len: usize,
}

impl HashState {
    fn from_words_le(words: &[u32]) -> Self {
        let mut state = Self { bytes: [0; MAX_STATE_BYTES], len: words.len() * 4 };
        for (chunk, w) in state.bytes.chunks_exact_mut(4).zip(words) {
            chunk.copy_from_slice(&w.to_le_bytes());
        }
        state
    }

    fn from_words_be(words: &[u32]) -> Self {
        let mut state = Self { bytes: [0; MAX_STATE_BYTES], len: words.len() * 4 };
        for (chunk, w) in state.bytes.chunks_exact_mut(4).zip(words) {
            chunk.copy_from_slice(&w.to_be_bytes());
        }
        state
    }

    fn from_dwords_be(words: &[u64]) -> Self {
        let mut state = Self { bytes: [0; MAX_STATE_BYTES], len: words.len() * 8 };
        for (chunk, w) in state.bytes.chunks_exact_mut(8).zip(words) {
            chunk.copy_from_slice(&w.to_be_bytes());
        }
        state
    }

    /// Serialized state bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes[..self.len]
    }

    /// State length in bytes
    pub fn len(&self) -> usize {
        self.len
    }

    /// True for an empty state
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// State as record words, bytes kept in memory order
    pub fn record_words(&self) -> impl Iterator<Item = u32> + '_ {
        self.as_bytes()
            .chunks_exact(4)
            .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
    }
}

impl std::fmt::Debug for HashState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Key-derived material, never printed
        f.debug_struct("HashState").field("len", &self.len).finish_non_exhaustive()
    }
}

/// Inner and outer HMAC states
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HashPad {
    /// State after compressing `K ^ ipad`
    pub ipad: HashState,
    /// State after compressing `K ^ opad`
    pub opad: HashState,
}

/// Derive the HMAC inner/outer states for a hash and key.
///
/// Keys longer than the block size are hashed down first, shorter keys are
/// zero-extended, as in RFC 2104.
pub fn derive_hash_pad(hash: HashAlgorithm, key: &[u8]) -> Result<HashPad> {
    let block = hash.block_size();
    if block == 0 {
        return Err(SaError::HashPad("digest_null has no HMAC state".into()));
    }

    let mut k = [0u8; MAX_BLOCK_BYTES];
    if key.len() > block {
        let digest = digest(hash, key)?;
        k[..digest.len()].copy_from_slice(&digest);
    } else {
        k[..key.len()].copy_from_slice(key);
    }

    let mut ipad = [0u8; MAX_BLOCK_BYTES];
    let mut opad = [0u8; MAX_BLOCK_BYTES];
    for i in 0..block {
        ipad[i] = k[i] ^ HMAC_IPAD;
        opad[i] = k[i] ^ HMAC_OPAD;
    }

    Ok(HashPad {
        ipad: compress_one(hash, &ipad[..block])?,
        opad: compress_one(hash, &opad[..block])?,
    })
}

fn digest(hash: HashAlgorithm, data: &[u8]) -> Result<Vec<u8>> {
    Ok(match hash {
        HashAlgorithm::Null => return Err(SaError::HashPad("digest_null cannot hash".into())),
        HashAlgorithm::Md5 => Md5::digest(data).to_vec(),
        HashAlgorithm::Sha1 => Sha1::digest(data).to_vec(),
        HashAlgorithm::Sha224 => Sha224::digest(data).to_vec(),
        HashAlgorithm::Sha256 => Sha256::digest(data).to_vec(),
        HashAlgorithm::Sha384 => Sha384::digest(data).to_vec(),
        HashAlgorithm::Sha512 => Sha512::digest(data).to_vec(),
    })
}

/// Run a single compression from the hash's initial state
fn compress_one(hash: HashAlgorithm, block: &[u8]) -> Result<HashState> {
    if block.len() != hash.block_size() {
        return Err(SaError::HashPad(format!(
            "block of {} bytes for {:?}",
            block.len(),
            hash
        )));
    }

    Ok(match hash {
        HashAlgorithm::Null => return Err(SaError::HashPad("digest_null has no state".into())),
        HashAlgorithm::Md5 => {
            let mut state = MD5_IV;
            md5_block(&mut state, block);
            HashState::from_words_le(&state)
        }
        HashAlgorithm::Sha1 => {
            let mut state = SHA1_IV;
            sha1::compress(&mut state, std::slice::from_ref(GenericArray::from_slice(block)));
            HashState::from_words_be(&state)
        }
        HashAlgorithm::Sha224 | HashAlgorithm::Sha256 => {
            let mut state = if hash == HashAlgorithm::Sha224 { SHA224_IV } else { SHA256_IV };
            sha2::compress256(&mut state, std::slice::from_ref(GenericArray::from_slice(block)));
            HashState::from_words_be(&state)
        }
        HashAlgorithm::Sha384 | HashAlgorithm::Sha512 => {
            let mut state = if hash == HashAlgorithm::Sha384 { SHA384_IV } else { SHA512_IV };
            sha2::compress512(&mut state, std::slice::from_ref(GenericArray::from_slice(block)));
            HashState::from_dwords_be(&state)
        }
    })
}

// md-5 keeps its block function private, so the round is spelled out here
const MD5_K: [u32; 64] = [
    0xd76a_a478, 0xe8c7_b756, 0x2420_70db, 0xc1bd_ceee, 0xf57c_0faf, 0x4787_c62a, 0xa830_4613, 0xfd46_9501,
    0x6980_98d8, 0x8b44_f7af, 0xffff_5bb1, 0x895c_d7be, 0x6b90_1122, 0xfd98_7193, 0xa679_438e, 0x49b4_0821,
    0xf61e_2562, 0xc040_b340, 0x265e_5a51, 0xe9b6_c7aa, 0xd62f_105d, 0x0244_1453, 0xd8a1_e681, 0xe7d3_fbc8,
    0x21e1_cde6, 0xc337_07d6, 0xf4d5_0d87, 0x455a_14ed, 0xa9e3_e905, 0xfcef_a3f8, 0x676f_02d9, 0x8d2a_4c8a,
    0xfffa_3942, 0x8771_f681, 0x6d9d_6122, 0xfde5_380c, 0xa4be_ea44, 0x4bde_cfa9, 0xf6bb_4b60, 0xbebf_bc70,
    0x289b_7ec6, 0xeaa1_27fa, 0xd4ef_3085, 0x0488_1d05, 0xd9d4_d039, 0xe6db_99e5, 0x1fa2_7cf8, 0xc4ac_5665,
    0xf429_2244, 0x432a_ff97, 0xab94_23a7, 0xfc93_a039, 0x655b_59c3, 0x8f0c_cc92, 0xffef_f47d, 0x8584_5dd1,
    0x6fa8_7e4f, 0xfe2c_e6e0, 0xa301_4314, 0x4e08_11a1, 0xf753_7e82, 0xbd3a_f235, 0x2ad7_d2bb, 0xeb86_d391,
];

const MD5_SHIFT: [[u32; 4]; 4] = [[7, 12, 17, 22], [5, 9, 14, 20], [4, 11, 16, 23], [6, 10, 15, 21]];

/// One MD5 compression of a 64-byte block into `state`
fn md5_block(state: &mut [u32; 4], block: &[u8]) {
    let mut m = [0u32; 16];
    for (w, c) in m.iter_mut().zip(block.chunks_exact(4)) {
        *w = u32::from_le_bytes([c[0], c[1], c[2], c[3]]);
    }

    let [mut a, mut b, mut c, mut d] = *state;
    for i in 0..64 {
        let (f, g) = match i / 16 {
            0 => ((b & c) | (!b & d), i),
            1 => ((d & b) | (!d & c), (5 * i + 1) % 16),
            2 => (b ^ c ^ d, (3 * i + 5) % 16),
            _ => (c ^ (b | !d), (7 * i) % 16),
        };
        let f = f.wrapping_add(a).wrapping_add(MD5_K[i]).wrapping_add(m[g]);
        a = d;
        d = c;
        c = b;
        b = b.wrapping_add(f.rotate_left(MD5_SHIFT[i / 16][i % 4]));
    }

    state[0] = state[0].wrapping_add(a);
    state[1] = state[1].wrapping_add(b);
    state[2] = state[2].wrapping_add(c);
    state[3] = state[3].wrapping_add(d);
}
