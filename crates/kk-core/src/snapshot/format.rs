//! KKS Snapshot Format v1 Constants
//!
//! All values are little-endian. Layout:
//!
//! ```text
//! header (48 bytes)
//! string pool      u32 byte length, UTF-8 bytes, padded to 4
//! category table   u32 count, count * CATEGORY_ENTRY_SIZE
//! entry table      entry_count * ENTRY_SIZE
//! ```

/// Magic bytes: "KKS1"
pub const KKS_MAGIC: [u8; 4] = [0x4B, 0x4B, 0x53, 0x31];

/// Current format version
pub const KKS_VERSION: u16 = 1;

/// Header size in bytes
pub const HEADER_SIZE: usize = 48;

/// Category table record size
pub const CATEGORY_ENTRY_SIZE: usize = 8;

/// Entry table record size
pub const ENTRY_SIZE: usize = 12;

// =============================================================================
// Header Field Offsets
// =============================================================================

/// Header field byte offsets.
pub mod header {
    /// u8[4] magic = "KKS1"
    pub const MAGIC: usize = 0;
    /// u16 format version
    pub const VERSION: usize = 4;
    /// u16 flags
    pub const FLAGS: usize = 6;
    /// u32 headerBytes (always 48)
    pub const HEADER_BYTES: usize = 8;
    /// u32 entryCount
    pub const ENTRY_COUNT: usize = 12;
    /// u32 strPoolOffset
    pub const STR_POOL_OFFSET: usize = 16;
    /// u32 categoryTableOffset
    pub const CATEGORY_TABLE_OFFSET: usize = 20;
    /// u32 entryTableOffset
    pub const ENTRY_TABLE_OFFSET: usize = 24;
    /// u32 snapshotCrc32
    pub const SNAPSHOT_CRC32: usize = 28;
    /// u64 fetchedAt (unix millis)
    pub const FETCHED_AT_MS: usize = 32;
    /// u32 dataset version string offset (string pool)
    pub const DATASET_VERSION_OFF: usize = 40;
    /// u16 dataset version string length
    pub const DATASET_VERSION_LEN: usize = 44;
}

/// Header flags.
pub mod header_flags {
    /// Snapshot includes CRC32 checksum
    pub const HAS_CRC32: u16 = 1 << 0;
}

/// Category table record offsets.
pub mod category_entry {
    /// u32 string offset
    pub const STR_OFF: usize = 0;
    /// u16 string length
    pub const STR_LEN: usize = 4;
}

/// Entry table record offsets.
pub mod entry {
    /// u32 phrase offset
    pub const PHRASE_OFF: usize = 0;
    /// u16 phrase length
    pub const PHRASE_LEN: usize = 4;
    /// u16 category count
    pub const CATEGORY_COUNT: usize = 6;
    /// u32 index of the first category record
    pub const FIRST_CATEGORY: usize = 8;
}

// =============================================================================
// Helpers
// =============================================================================

/// Align offset to boundary.
#[inline]
pub const fn align_offset(offset: usize, alignment: usize) -> usize {
    (offset + alignment - 1) & !(alignment - 1)
}

/// Validate magic bytes.
#[inline]
pub fn validate_magic(data: &[u8]) -> bool {
    data.len() >= 4 && data[..4] == KKS_MAGIC
}

/// Read u16 little-endian, `None` if out of bounds.
#[inline]
pub fn read_u16_le(data: &[u8], offset: usize) -> Option<u16> {
    let bytes = data.get(offset..offset.checked_add(2)?)?;
    Some(u16::from_le_bytes([bytes[0], bytes[1]]))
}

/// Read u32 little-endian, `None` if out of bounds.
#[inline]
pub fn read_u32_le(data: &[u8], offset: usize) -> Option<u32> {
    let bytes = data.get(offset..offset.checked_add(4)?)?;
    Some(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

/// Read u64 little-endian, `None` if out of bounds.
#[inline]
pub fn read_u64_le(data: &[u8], offset: usize) -> Option<u64> {
    let bytes = data.get(offset..offset.checked_add(8)?)?;
    let mut buf = [0u8; 8];
    buf.copy_from_slice(bytes);
    Some(u64::from_le_bytes(buf))
}

#[inline]
pub fn write_u16_le(data: &mut [u8], offset: usize, value: u16) {
    data[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
}

#[inline]
pub fn write_u32_le(data: &mut [u8], offset: usize, value: u32) {
    data[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

#[inline]
pub fn write_u64_le(data: &mut [u8], offset: usize, value: u64) {
    data[offset..offset + 8].copy_from_slice(&value.to_le_bytes());
}
