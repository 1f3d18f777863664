//! Firmware Image Header
//!
//! Fixed 32-byte preamble at the start of every firmware image. The magic
//! word doubles as the endianness tag: it reads as `0x4553_5046` in the
//! byte order the rest of the header uses.
//!
//! ```text
//! w0 magic        w1 family u16 | major u8 | minor u8
//! w2 compat id    w3 shared-region offset
//! w4 region size  w5 image length
//! w6 reserved     w7 checksum (negated wrapping sum of w0..w6)
//! ```

use thiserror::Error;

/// Header magic / endianness tag
pub const IMAGE_MAGIC: u32 = 0x4553_5046;

/// Header length in bytes
pub const IMAGE_HEADER_LEN: usize = 32;

const HEADER_WORDS: usize = IMAGE_HEADER_LEN / 4;

/// Image header errors; all of them are fatal to bring-up
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ImageError {
    /// Fewer bytes than a header
    #[error("image too short: {0} bytes")]
    TooShort(usize),

    /// Magic word matches neither byte order
    #[error("bad magic {0:#010x}")]
    BadMagic(u32),

    /// Header checksum mismatch
    #[error("header checksum {found:#010x}, expected {expected:#010x}")]
    BadChecksum {
        /// Computed checksum
        expected: u32,
        /// Stored checksum
        found: u32,
    },

    /// Declared image length exceeds the data provided
    #[error("image declares {declared} bytes, only {actual} present")]
    Truncated {
        /// Length in the header
        declared: usize,
        /// Bytes provided
        actual: usize,
    },

    /// Shared region does not lie inside the image
    #[error("shared region {offset:#x}+{size:#x} outside image of {image_len:#x} bytes")]
    RegionOutsideImage {
        /// Region offset
        offset: u32,
        /// Region size
        size: u32,
        /// Image length
        image_len: u32,
    },

    /// Shared region smaller than the compiled layout
    #[error("shared region of {size:#x} bytes, layout needs {needed:#x}")]
    RegionTooSmall {
        /// Region size
        size: u32,
        /// Bytes required
        needed: usize,
    },

    /// Layout compatibility id mismatch
    #[error("compat id {found:#010x}, host expects {expected:#010x}")]
    CompatMismatch {
        /// Host compat id
        expected: u32,
        /// Image compat id
        found: u32,
    },
}

/// Byte order of an image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endian {
    /// Little-endian image
    Little,
    /// Big-endian image
    Big,
}

/// Decoded image header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageHeader {
    /// Byte order
    pub endian: Endian,
    /// Engine family
    pub family: u16,
    /// Firmware major version
    pub version_major: u8,
    /// Firmware minor version
    pub version_minor: u8,
    /// Shared layout compat id
    pub compat_id: u32,
    /// Shared region offset within the image
    pub shm_offset: u32,
    /// Shared region size
    pub shm_size: u32,
    /// Total image length
    pub image_len: u32,
}

fn checksum(words: &[u32]) -> u32 {
    words.iter().fold(0u32, |acc, w| acc.wrapping_add(*w)).wrapping_neg()
}

impl ImageHeader {
    /// Parse and check the header at the start of `image`
    pub fn parse(image: &[u8]) -> Result<Self, ImageError> {
        if image.len() < IMAGE_HEADER_LEN {
            return Err(ImageError::TooShort(image.len()));
        }

        let raw = |i: usize| [image[i * 4], image[i * 4 + 1], image[i * 4 + 2], image[i * 4 + 3]];
        let endian = match u32::from_le_bytes(raw(0)) {
            IMAGE_MAGIC => Endian::Little,
            m if m.swap_bytes() == IMAGE_MAGIC => Endian::Big,
            m => return Err(ImageError::BadMagic(m)),
        };

        let mut w = [0u32; HEADER_WORDS];
        for (i, word) in w.iter_mut().enumerate() {
            *word = match endian {
                Endian::Little => u32::from_le_bytes(raw(i)),
                Endian::Big => u32::from_be_bytes(raw(i)),
            };
        }

        let expected = checksum(&w[..HEADER_WORDS - 1]);
        if w[HEADER_WORDS - 1] != expected {
            return Err(ImageError::BadChecksum {
                expected,
                found: w[HEADER_WORDS - 1],
            });
        }

        let header = Self {
            endian,
            family: w[1] as u16,
            version_major: (w[1] >> 16) as u8,
            version_minor: (w[1] >> 24) as u8,
            compat_id: w[2],
            shm_offset: w[3],
            shm_size: w[4],
            image_len: w[5],
        };

        if header.image_len as usize > image.len() {
            return Err(ImageError::Truncated {
                declared: header.image_len as usize,
                actual: image.len(),
            });
        }
        let end = header.shm_offset as u64 + header.shm_size as u64;
        if (header.shm_offset as usize) < IMAGE_HEADER_LEN || end > header.image_len as u64 {
            return Err(ImageError::RegionOutsideImage {
                offset: header.shm_offset,
                size: header.shm_size,
                image_len: header.image_len,
            });
        }
        Ok(header)
    }

    /// Reject an image built against a different shared layout
    pub fn check_compat(&self, expected: u32, layout_size: usize) -> Result<(), ImageError> {
        if self.compat_id != expected {
            return Err(ImageError::CompatMismatch {
                expected,
                found: self.compat_id,
            });
        }
        if (self.shm_size as usize) < layout_size {
            return Err(ImageError::RegionTooSmall {
                size: self.shm_size,
                needed: layout_size,
            });
        }
        Ok(())
    }

    /// Encode in the header's byte order, checksum included
    pub fn encode(&self) -> [u8; IMAGE_HEADER_LEN] {
        let mut w = [0u32; HEADER_WORDS];
        w[0] = IMAGE_MAGIC;
        w[1] = self.family as u32 | (self.version_major as u32) << 16 | (self.version_minor as u32) << 24;
        w[2] = self.compat_id;
        w[3] = self.shm_offset;
        w[4] = self.shm_size;
        w[5] = self.image_len;
        w[HEADER_WORDS - 1] = checksum(&w[..HEADER_WORDS - 1]);

        let mut out = [0u8; IMAGE_HEADER_LEN];
        for (chunk, word) in out.chunks_exact_mut(4).zip(w) {
            chunk.copy_from_slice(&match self.endian {
                Endian::Little => word.to_le_bytes(),
                Endian::Big => word.to_be_bytes(),
            });
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    pub(crate) fn header(endian: Endian) -> ImageHeader {
        ImageHeader {
            endian,
            family: 0x0197,
            version_major: 3,
            version_minor: 1,
            compat_id: 0x0001_0003,
            shm_offset: 0x1000,
            shm_size: 0x4000,
            image_len: 0x8000,
        }
    }

    fn image(h: &ImageHeader) -> Vec<u8> {
        let mut bytes = vec![0u8; h.image_len as usize];
        bytes[..IMAGE_HEADER_LEN].copy_from_slice(&h.encode());
        bytes
    }

    #[test]
    fn test_parse_both_byte_orders() {
        for endian in [Endian::Little, Endian::Big] {
            let h = header(endian);
            assert_eq!(ImageHeader::parse(&image(&h)).unwrap(), h);
        }
        let be = header(Endian::Big).encode();
        assert_eq!(&be[..4], &[0x45, 0x53, 0x50, 0x46]);
    }

    #[test]
    fn test_rejects_corruption() {
        let h = header(Endian::Little);
        let mut bytes = image(&h);
        bytes[8] ^= 0x01;
        assert!(matches!(ImageHeader::parse(&bytes), Err(ImageError::BadChecksum { .. })));

        let mut bytes = image(&h);
        bytes[0] = 0;
        assert!(matches!(ImageHeader::parse(&bytes), Err(ImageError::BadMagic(_))));

        assert_eq!(ImageHeader::parse(&[0u8; 16]), Err(ImageError::TooShort(16)));

        let bytes = image(&h);
        assert!(matches!(
            ImageHeader::parse(&bytes[..0x100]),
            Err(ImageError::Truncated { declared: 0x8000, .. })
        ));
    }

    #[test]
    fn test_region_bounds() {
        let mut h = header(Endian::Little);
        h.shm_offset = 0x7000;
        assert!(matches!(
            ImageHeader::parse(&image(&h)),
            Err(ImageError::RegionOutsideImage { .. })
        ));
        h.shm_offset = 0;
        assert!(matches!(
            ImageHeader::parse(&image(&h)),
            Err(ImageError::RegionOutsideImage { .. })
        ));
    }

    #[test]
    fn test_compat_check() {
        let h = header(Endian::Little);
        assert!(h.check_compat(0x0001_0003, 0x3D80).is_ok());
        assert_eq!(
            h.check_compat(0x0001_0004, 0x3D80),
            Err(ImageError::CompatMismatch {
                expected: 0x0001_0004,
                found: 0x0001_0003
            })
        );
        assert!(matches!(h.check_compat(0x0001_0003, 0x5000), Err(ImageError::RegionTooSmall { .. })));
    }
}
