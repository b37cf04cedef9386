//! Bounds-checked KKS Snapshot Loader
//!
//! Snapshot files come from disk and may be truncated or corrupted, so every
//! offset and length is validated against the buffer before use.

use std::time::{Duration, UNIX_EPOCH};

use super::format::*;
use super::Snapshot;
use crate::hash::crc32_chunks;
use crate::types::KeywordEntry;

/// Error type for snapshot encoding and loading.
#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    #[error("Invalid magic bytes")]
    InvalidMagic,
    #[error("Unsupported version: {0}")]
    UnsupportedVersion(u16),
    #[error("CRC32 mismatch: stored={stored}, computed={computed}")]
    Crc32Mismatch { stored: u32, computed: u32 },
    #[error("Invalid section: {0}")]
    InvalidSection(String),
    #[error("Data too short")]
    DataTooShort,
    #[error("Invalid UTF-8 in string pool")]
    InvalidUtf8,
    #[error("Snapshot has no entries")]
    Empty,
    #[error("Too large to encode: {0}")]
    TooLarge(String),
}

fn section_err(what: &str) -> SnapshotError {
    SnapshotError::InvalidSection(what.to_string())
}

fn pool_str(pool: &[u8], offset: usize, len: usize) -> Result<&str, SnapshotError> {
    let bytes = pool
        .get(offset..offset.saturating_add(len))
        .ok_or_else(|| section_err("string reference"))?;
    std::str::from_utf8(bytes).map_err(|_| SnapshotError::InvalidUtf8)
}

/// Decode KKS bytes into a snapshot.
pub fn decode_snapshot(data: &[u8]) -> Result<Snapshot, SnapshotError> {
    if data.len() < HEADER_SIZE {
        return Err(SnapshotError::DataTooShort);
    }

    // Validate magic
    if !validate_magic(data) {
        return Err(SnapshotError::InvalidMagic);
    }

    let header_u16 = |offset| read_u16_le(data, offset).ok_or(SnapshotError::DataTooShort);
    let header_u32 = |offset| {
        read_u32_le(data, offset)
            .map(|v| v as usize)
            .ok_or(SnapshotError::DataTooShort)
    };

    let version = header_u16(header::VERSION)?;
    if version != KKS_VERSION {
        return Err(SnapshotError::UnsupportedVersion(version));
    }

    let flags = header_u16(header::FLAGS)?;

    // Validate CRC32 if present
    if flags & header_flags::HAS_CRC32 != 0 {
        let stored = read_u32_le(data, header::SNAPSHOT_CRC32).ok_or(SnapshotError::DataTooShort)?;
        let computed = crc32_chunks(&[
            &data[..header::SNAPSHOT_CRC32],
            &data[header::SNAPSHOT_CRC32 + 4..],
        ]);
        if stored != computed {
            return Err(SnapshotError::Crc32Mismatch { stored, computed });
        }
    }

    let entry_count = header_u32(header::ENTRY_COUNT)?;
    let str_pool_offset = header_u32(header::STR_POOL_OFFSET)?;
    let category_table_offset = header_u32(header::CATEGORY_TABLE_OFFSET)?;
    let entry_table_offset = header_u32(header::ENTRY_TABLE_OFFSET)?;
    let fetched_at_ms = read_u64_le(data, header::FETCHED_AT_MS).ok_or(SnapshotError::DataTooShort)?;

    // String pool
    let pool_len = read_u32_le(data, str_pool_offset).ok_or_else(|| section_err("string pool"))? as usize;
    let pool_start = str_pool_offset + 4;
    let pool = data
        .get(pool_start..pool_start.saturating_add(pool_len))
        .ok_or_else(|| section_err("string pool"))?;

    let dataset_version = pool_str(
        pool,
        header_u32(header::DATASET_VERSION_OFF)?,
        header_u16(header::DATASET_VERSION_LEN)? as usize,
    )?;

    // Category table
    let category_count = read_u32_le(data, category_table_offset)
        .ok_or_else(|| section_err("category table"))? as usize;
    let categories_start = category_table_offset + 4;
    let categories = data
        .get(categories_start..categories_start.saturating_add(category_count.saturating_mul(CATEGORY_ENTRY_SIZE)))
        .ok_or_else(|| section_err("category table"))?;

    // Entry table
    let entries_data = data
        .get(entry_table_offset..entry_table_offset.saturating_add(entry_count.saturating_mul(ENTRY_SIZE)))
        .ok_or_else(|| section_err("entry table"))?;

    let mut entries = Vec::with_capacity(entry_count);
    for i in 0..entry_count {
        let record = &entries_data[i * ENTRY_SIZE..(i + 1) * ENTRY_SIZE];
        let field_u16 = |offset| read_u16_le(record, offset).map(|v| v as usize);
        let field_u32 = |offset| read_u32_le(record, offset).map(|v| v as usize);

        let (phrase_off, phrase_len, count, first) = match (
            field_u32(entry::PHRASE_OFF),
            field_u16(entry::PHRASE_LEN),
            field_u16(entry::CATEGORY_COUNT),
            field_u32(entry::FIRST_CATEGORY),
        ) {
            (Some(a), Some(b), Some(c), Some(d)) => (a, b, c, d),
            _ => return Err(section_err("entry record")),
        };

        let phrase = pool_str(pool, phrase_off, phrase_len)?;

        if first.saturating_add(count) > category_count {
            return Err(section_err("category range"));
        }

        let mut names = Vec::with_capacity(count);
        for c in first..first + count {
            let record = &categories[c * CATEGORY_ENTRY_SIZE..(c + 1) * CATEGORY_ENTRY_SIZE];
            let off = read_u32_le(record, category_entry::STR_OFF).ok_or_else(|| section_err("category record"))?;
            let len = read_u16_le(record, category_entry::STR_LEN).ok_or_else(|| section_err("category record"))?;
            names.push(pool_str(pool, off as usize, len as usize)?);
        }

        entries.push(KeywordEntry::new(phrase, names));
    }

    let fetched_at = UNIX_EPOCH + Duration::from_millis(fetched_at_ms);
    Snapshot::new(dataset_version, entries, fetched_at)
}
