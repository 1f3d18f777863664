//! Algorithm Descriptor Tables
//!
//! Ciphers and authenticators are looked up by their xfrm names, the same
//! strings the packet-path collaborator receives from the IPsec stack.
//! The tables are the only place that knows which engine selector a name
//! maps to; everything downstream works with the descriptors.

use crate::{Result, SaError};

/// Cipher family (engine crypto algorithm group)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CipherFamily {
    /// No encryption
    Null,
    /// Single DES
    Des,
    /// Triple DES (EDE)
    TripleDes,
    /// AES, key size picks the selector
    Aes,
}

/// Block cipher mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CipherMode {
    /// Electronic codebook (null cipher only)
    Ecb,
    /// Cipher block chaining
    Cbc,
    /// Counter mode, RFC 3686 framing
    Ctr,
}

impl CipherMode {
    /// Control word 1 mode selector
    pub const fn selector(self) -> u8 {
        match self {
            CipherMode::Ecb => 0x0,
            CipherMode::Cbc => 0x1,
            CipherMode::Ctr => 0x6,
        }
    }
}

/// Cipher descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CipherDescriptor {
    /// xfrm name
    pub name: &'static str,
    /// Algorithm family
    pub family: CipherFamily,
    /// Block mode
    pub mode: CipherMode,
    /// Nonce bytes trailing the key material (RFC 3686 carries 4)
    pub nonce_len: usize,
}

/// Supported ciphers
pub const CIPHERS: &[CipherDescriptor] = &[
    CipherDescriptor {
        name: "ecb(cipher_null)",
        family: CipherFamily::Null,
        mode: CipherMode::Ecb,
        nonce_len: 0,
    },
    CipherDescriptor {
        name: "cbc(des)",
        family: CipherFamily::Des,
        mode: CipherMode::Cbc,
        nonce_len: 0,
    },
    CipherDescriptor {
        name: "cbc(des3_ede)",
        family: CipherFamily::TripleDes,
        mode: CipherMode::Cbc,
        nonce_len: 0,
    },
    CipherDescriptor {
        name: "cbc(aes)",
        family: CipherFamily::Aes,
        mode: CipherMode::Cbc,
        nonce_len: 0,
    },
    CipherDescriptor {
        name: "rfc3686(ctr(aes))",
        family: CipherFamily::Aes,
        mode: CipherMode::Ctr,
        nonce_len: 4,
    },
];

/// Look up a cipher descriptor by xfrm name
pub fn lookup_cipher(name: &str) -> Result<&'static CipherDescriptor> {
    CIPHERS
        .iter()
        .find(|c| c.name == name)
        .ok_or_else(|| SaError::UnsupportedAlgorithm(name.to_string()))
}

impl CipherDescriptor {
    /// Split key material into (cipher key length, nonce) after validating it
    pub fn split_key<'k>(&self, key: &'k [u8]) -> Result<(&'k [u8], &'k [u8])> {
        if key.len() < self.nonce_len {
            return Err(self.bad_key(key.len()));
        }
        let (cipher_key, nonce) = key.split_at(key.len() - self.nonce_len);
        self.crypto_alg(cipher_key.len())?;
        Ok((cipher_key, nonce))
    }

    /// Control word 0 crypto algorithm selector for a cipher key length
    pub fn crypto_alg(&self, key_len: usize) -> Result<u8> {
        match (self.family, key_len) {
            (CipherFamily::Null, 0) => Ok(0x0),
            (CipherFamily::Des, 8) => Ok(0x0),
            (CipherFamily::TripleDes, 24) => Ok(0x2),
            (CipherFamily::Aes, 16) => Ok(0x5),
            (CipherFamily::Aes, 24) => Ok(0x6),
            (CipherFamily::Aes, 32) => Ok(0x7),
            _ => Err(self.bad_key(key_len)),
        }
    }

    /// True for the null cipher
    pub fn is_null(&self) -> bool {
        self.family == CipherFamily::Null
    }

    fn bad_key(&self, len: usize) -> SaError {
        SaError::InvalidKeySize {
            algorithm: self.name,
            len,
        }
    }
}

/// ESP pad block size for a cipher
pub fn compute_pad_block_size(cipher: &CipherDescriptor) -> Result<usize> {
    match (cipher.family, cipher.mode) {
        (CipherFamily::Aes, CipherMode::Cbc) => Ok(16),
        (CipherFamily::Des | CipherFamily::TripleDes, CipherMode::Cbc) => Ok(8),
        // Stream-like modes still align the trailer to 4 bytes
        (CipherFamily::Aes, CipherMode::Ctr) => Ok(4),
        (CipherFamily::Null, CipherMode::Ecb) => Ok(4),
        (family, mode) => Err(SaError::UnsupportedMode { family, mode }),
    }
}

/// Per-packet IV size for a cipher family and mode
pub fn compute_iv_size(family: CipherFamily, mode: CipherMode) -> Result<usize> {
    match (family, mode) {
        (CipherFamily::Aes, CipherMode::Cbc) => Ok(16),
        (CipherFamily::Des | CipherFamily::TripleDes, CipherMode::Cbc) => Ok(8),
        (CipherFamily::Aes, CipherMode::Ctr) => Ok(8),
        (CipherFamily::Null, CipherMode::Ecb) => Ok(0),
        (family, mode) => Err(SaError::UnsupportedMode { family, mode }),
    }
}

/// Hash underlying an authenticator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HashAlgorithm {
    /// No authentication
    Null,
    /// MD5
    Md5,
    /// SHA-1
    Sha1,
    /// SHA-224
    Sha224,
    /// SHA-256
    Sha256,
    /// SHA-384
    Sha384,
    /// SHA-512
    Sha512,
}

impl HashAlgorithm {
    /// Compression block size in bytes
    pub const fn block_size(self) -> usize {
        match self {
            HashAlgorithm::Null => 0,
            HashAlgorithm::Md5
            | HashAlgorithm::Sha1
            | HashAlgorithm::Sha224
            | HashAlgorithm::Sha256 => 64,
            HashAlgorithm::Sha384 | HashAlgorithm::Sha512 => 128,
        }
    }

    /// Final digest size in bytes
    pub const fn digest_size(self) -> usize {
        match self {
            HashAlgorithm::Null => 0,
            HashAlgorithm::Md5 => 16,
            HashAlgorithm::Sha1 => 20,
            HashAlgorithm::Sha224 => 28,
            HashAlgorithm::Sha256 => 32,
            HashAlgorithm::Sha384 => 48,
            HashAlgorithm::Sha512 => 64,
        }
    }

    /// Size of the exported intermediate state in bytes.
    ///
    /// Truncated hashes (SHA-224, SHA-384) export the full state of the
    /// wider compressor they run on.
    pub const fn state_size(self) -> usize {
        match self {
            HashAlgorithm::Null => 0,
            HashAlgorithm::Md5 => 16,
            HashAlgorithm::Sha1 => 20,
            HashAlgorithm::Sha224 | HashAlgorithm::Sha256 => 32,
            HashAlgorithm::Sha384 | HashAlgorithm::Sha512 => 64,
        }
    }

    /// Exported state size in 32-bit words
    pub const fn state_words(self) -> usize {
        self.state_size() / 4
    }

    /// Control word 0 hash algorithm selector
    pub const fn selector(self) -> u8 {
        match self {
            HashAlgorithm::Null | HashAlgorithm::Md5 => 0x0,
            HashAlgorithm::Sha1 => 0x2,
            HashAlgorithm::Sha256 => 0x3,
            HashAlgorithm::Sha224 => 0x4,
            HashAlgorithm::Sha512 => 0x5,
            HashAlgorithm::Sha384 => 0x6,
        }
    }
}

/// Authenticator descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthDescriptor {
    /// xfrm name
    pub name: &'static str,
    /// Underlying hash
    pub hash: HashAlgorithm,
    /// Truncated ICV length carried in the ESP trailer
    pub icv_size: usize,
}

impl AuthDescriptor {
    /// True for `digest_null`
    pub fn is_null(&self) -> bool {
        self.hash == HashAlgorithm::Null
    }
}

/// Supported authenticators (ICV sizes per RFC 2403 / 2404 / 4868)
pub const AUTHS: &[AuthDescriptor] = &[
    AuthDescriptor { name: "digest_null", hash: HashAlgorithm::Null, icv_size: 0 },
    AuthDescriptor { name: "hmac(md5)", hash: HashAlgorithm::Md5, icv_size: 12 },
    AuthDescriptor { name: "hmac(sha1)", hash: HashAlgorithm::Sha1, icv_size: 12 },
    AuthDescriptor { name: "hmac(sha224)", hash: HashAlgorithm::Sha224, icv_size: 16 },
    AuthDescriptor { name: "hmac(sha256)", hash: HashAlgorithm::Sha256, icv_size: 16 },
    AuthDescriptor { name: "hmac(sha384)", hash: HashAlgorithm::Sha384, icv_size: 24 },
    AuthDescriptor { name: "hmac(sha512)", hash: HashAlgorithm::Sha512, icv_size: 32 },
];

/// Look up an authenticator descriptor by xfrm name
pub fn lookup_auth(name: &str) -> Result<&'static AuthDescriptor> {
    AUTHS
        .iter()
        .find(|a| a.name == name)
        .ok_or_else(|| SaError::UnsupportedAlgorithm(name.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_known_names() {
        assert_eq!(lookup_cipher("cbc(aes)").unwrap().family, CipherFamily::Aes);
        assert_eq!(lookup_auth("hmac(sha256)").unwrap().icv_size, 16);
    }

    #[test]
    fn test_lookup_unknown_name() {
        assert_eq!(
            lookup_cipher("rfc4106(gcm(aes))"),
            Err(SaError::UnsupportedAlgorithm("rfc4106(gcm(aes))".into()))
        );
        assert!(matches!(
            lookup_auth("hmac(whirlpool)"),
            Err(SaError::UnsupportedAlgorithm(_))
        ));
    }

    #[test]
    fn test_aes_key_sizes() {
        let aes = lookup_cipher("cbc(aes)").unwrap();
        assert_eq!(aes.crypto_alg(16), Ok(0x5));
        assert_eq!(aes.crypto_alg(24), Ok(0x6));
        assert_eq!(aes.crypto_alg(32), Ok(0x7));
        assert_eq!(
            aes.crypto_alg(20),
            Err(SaError::InvalidKeySize { algorithm: "cbc(aes)", len: 20 })
        );
    }

    #[test]
    fn test_rfc3686_key_split() {
        let ctr = lookup_cipher("rfc3686(ctr(aes))").unwrap();
        let key = [7u8; 20];
        let (k, nonce) = ctr.split_key(&key).unwrap();
        assert_eq!(k.len(), 16);
        assert_eq!(nonce.len(), 4);

        assert!(ctr.split_key(&[0u8; 16]).is_err());
        assert!(ctr.split_key(&[0u8; 3]).is_err());
    }

    #[test]
    fn test_pad_and_iv_tables() {
        let aes = lookup_cipher("cbc(aes)").unwrap();
        let des3 = lookup_cipher("cbc(des3_ede)").unwrap();
        let null = lookup_cipher("ecb(cipher_null)").unwrap();

        assert_eq!(compute_pad_block_size(aes), Ok(16));
        assert_eq!(compute_pad_block_size(des3), Ok(8));
        assert_eq!(compute_pad_block_size(null), Ok(4));

        assert_eq!(compute_iv_size(CipherFamily::Aes, CipherMode::Cbc), Ok(16));
        assert_eq!(compute_iv_size(CipherFamily::Aes, CipherMode::Ctr), Ok(8));
        assert_eq!(compute_iv_size(CipherFamily::Null, CipherMode::Ecb), Ok(0));
    }

    #[test]
    fn test_unsupported_mode() {
        assert_eq!(
            compute_iv_size(CipherFamily::Des, CipherMode::Ctr),
            Err(SaError::UnsupportedMode {
                family: CipherFamily::Des,
                mode: CipherMode::Ctr
            })
        );
        let bogus = CipherDescriptor {
            name: "ecb(aes)",
            family: CipherFamily::Aes,
            mode: CipherMode::Ecb,
            nonce_len: 0,
        };
        assert!(matches!(
            compute_pad_block_size(&bogus),
            Err(SaError::UnsupportedMode { .. })
        ));
    }

    #[test]
    fn test_state_sizes() {
        assert_eq!(HashAlgorithm::Md5.state_words(), 4);
        assert_eq!(HashAlgorithm::Sha1.state_words(), 5);
        assert_eq!(HashAlgorithm::Sha224.state_words(), 8);
        assert_eq!(HashAlgorithm::Sha384.state_words(), 16);
        for auth in AUTHS.iter().filter(|a| !a.is_null()) {
            assert!(auth.icv_size <= auth.hash.digest_size());
        }
    }
}
