//! Hash functions for koko-keywords
//!
//! Words are hashed with xxHash64 to key the keyword index. Snapshot files
//! carry a CRC32 so a torn or corrupted cache file is rejected on load.

use std::hash::Hasher;

use twox_hash::XxHash64;

const WORD_SEED: u64 = 0x9e37_79b9_7f4a_7c15;

/// Hash a normalized word for keyword index lookup.
#[inline]
pub fn hash_word(word: &str) -> u64 {
    let mut hasher = XxHash64::with_seed(WORD_SEED);
    hasher.write(word.as_bytes());
    hasher.finish()
}

/// Stable key for arbitrary text, such as a service URL.
pub fn hash_key(text: &str) -> u64 {
    let mut hasher = XxHash64::with_seed(0);
    hasher.write(text.as_bytes());
    hasher.finish()
}

/// Compute CRC32 for snapshot integrity checking.
/// Uses the standard CRC32 polynomial (IEEE 802.3).
pub fn crc32(data: &[u8]) -> u32 {
    crc32_update(0xffff_ffff, data) ^ 0xffff_ffff
}

/// CRC32 over several slices, as if they were concatenated.
pub fn crc32_chunks(chunks: &[&[u8]]) -> u32 {
    let mut crc = 0xffff_ffff_u32;
    for chunk in chunks {
        crc = crc32_update(crc, chunk);
    }
    crc ^ 0xffff_ffff
}

fn crc32_update(mut crc: u32, data: &[u8]) -> u32 {
    static CRC32_TABLE: [u32; 256] = {
        let mut table = [0u32; 256];
        let mut i = 0;
        while i < 256 {
            let mut c = i as u32;
            let mut j = 0;
            while j < 8 {
                c = if c & 1 != 0 { 0xedb88320 ^ (c >> 1) } else { c >> 1 };
                j += 1;
            }
            table[i] = c;
            i += 1;
        }
        table
    };

    for &byte in data {
        crc = CRC32_TABLE[((crc ^ byte as u32) & 0xff) as usize] ^ (crc >> 8);
    }
    crc
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_word_consistent() {
        assert_eq!(hash_word("sewerslide"), hash_word("sewerslide"));
    }

    #[test]
    fn test_hash_word_different_words() {
        assert_ne!(hash_word("sewer"), hash_word("slide"));
        assert_ne!(hash_word("sewer"), hash_word("sewerslide"));
    }

    #[test]
    fn test_crc32_known_value() {
        // Standard check value for "123456789"
        assert_eq!(crc32(b"123456789"), 0xcbf4_3926);
    }

    #[test]
    fn test_crc32_chunks_matches_contiguous() {
        let whole = crc32(b"hello world");
        let parts = crc32_chunks(&[b"hello", b" ", b"world"]);
        assert_eq!(whole, parts);
    }

    #[test]
    fn test_crc32_detects_changes() {
        assert_ne!(crc32(&[1u8, 2, 3]), crc32(&[1u8, 2, 4]));
    }
}
