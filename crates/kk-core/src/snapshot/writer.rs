//! KKS Snapshot Encoder

use std::collections::HashMap;
use std::time::UNIX_EPOCH;

use super::format::*;
use super::{Snapshot, SnapshotError};
use crate::hash::crc32_chunks;

struct StringPool {
    data: Vec<u8>,
    index: HashMap<String, u32>,
}

impl StringPool {
    fn new() -> Self {
        Self {
            data: Vec::new(),
            index: HashMap::new(),
        }
    }

    fn intern(&mut self, s: &str) -> Result<(u32, u16), SnapshotError> {
        let len = u16::try_from(s.len())
            .map_err(|_| SnapshotError::TooLarge(format!("string of {} bytes", s.len())))?;
        if let Some(&offset) = self.index.get(s) {
            return Ok((offset, len));
        }
        let offset = u32::try_from(self.data.len())
            .map_err(|_| SnapshotError::TooLarge("string pool".to_string()))?;
        self.data.extend_from_slice(s.as_bytes());
        self.index.insert(s.to_string(), offset);
        Ok((offset, len))
    }

    fn build(self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(4 + self.data.len());
        buf.extend_from_slice(&(self.data.len() as u32).to_le_bytes());
        buf.extend_from_slice(&self.data);
        buf
    }
}

fn to_u32(value: usize, what: &str) -> Result<u32, SnapshotError> {
    u32::try_from(value).map_err(|_| SnapshotError::TooLarge(what.to_string()))
}

/// Encode a snapshot into KKS bytes, CRC32 included.
pub fn encode_snapshot(snapshot: &Snapshot) -> Result<Vec<u8>, SnapshotError> {
    let mut pool = StringPool::new();
    let (version_off, version_len) = pool.intern(snapshot.version())?;

    let mut category_table = Vec::new();
    let mut category_count = 0usize;
    let mut entry_table = Vec::with_capacity(snapshot.len() * ENTRY_SIZE);

    for kw in snapshot.entries() {
        let (phrase_off, phrase_len) = pool.intern(&kw.phrase)?;
        let first_category = to_u32(category_count, "category table")?;
        let count = u16::try_from(kw.categories.len())
            .map_err(|_| SnapshotError::TooLarge(format!("categories of '{}'", kw.phrase)))?;

        for category in &kw.categories {
            let (off, len) = pool.intern(category)?;
            let mut record = [0u8; CATEGORY_ENTRY_SIZE];
            write_u32_le(&mut record, category_entry::STR_OFF, off);
            write_u16_le(&mut record, category_entry::STR_LEN, len);
            category_table.extend_from_slice(&record);
            category_count += 1;
        }

        let mut record = [0u8; ENTRY_SIZE];
        write_u32_le(&mut record, entry::PHRASE_OFF, phrase_off);
        write_u16_le(&mut record, entry::PHRASE_LEN, phrase_len);
        write_u16_le(&mut record, entry::CATEGORY_COUNT, count);
        write_u32_le(&mut record, entry::FIRST_CATEGORY, first_category);
        entry_table.extend_from_slice(&record);
    }

    let pool_section = pool.build();

    let str_pool_offset = HEADER_SIZE;
    let category_table_offset = align_offset(str_pool_offset + pool_section.len(), 4);
    let entry_table_offset = category_table_offset + 4 + category_table.len();
    let total_size = entry_table_offset + entry_table.len();

    let mut buffer = vec![0u8; total_size];

    buffer[header::MAGIC..header::MAGIC + 4].copy_from_slice(&KKS_MAGIC);
    write_u16_le(&mut buffer, header::VERSION, KKS_VERSION);
    write_u16_le(&mut buffer, header::FLAGS, header_flags::HAS_CRC32);
    write_u32_le(&mut buffer, header::HEADER_BYTES, HEADER_SIZE as u32);
    write_u32_le(&mut buffer, header::ENTRY_COUNT, to_u32(snapshot.len(), "entry count")?);
    write_u32_le(&mut buffer, header::STR_POOL_OFFSET, to_u32(str_pool_offset, "offset")?);
    write_u32_le(
        &mut buffer,
        header::CATEGORY_TABLE_OFFSET,
        to_u32(category_table_offset, "offset")?,
    );
    write_u32_le(&mut buffer, header::ENTRY_TABLE_OFFSET, to_u32(entry_table_offset, "offset")?);

    let fetched_at_ms = snapshot
        .fetched_at()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0);
    write_u64_le(&mut buffer, header::FETCHED_AT_MS, fetched_at_ms);
    write_u32_le(&mut buffer, header::DATASET_VERSION_OFF, version_off);
    write_u16_le(&mut buffer, header::DATASET_VERSION_LEN, version_len);

    buffer[str_pool_offset..str_pool_offset + pool_section.len()].copy_from_slice(&pool_section);
    write_u32_le(&mut buffer, category_table_offset, to_u32(category_count, "category table")?);
    buffer[category_table_offset + 4..entry_table_offset].copy_from_slice(&category_table);
    buffer[entry_table_offset..].copy_from_slice(&entry_table);

    // CRC over everything except the CRC field itself
    let crc = crc32_chunks(&[
        &buffer[..header::SNAPSHOT_CRC32],
        &buffer[header::SNAPSHOT_CRC32 + 4..],
    ]);
    write_u32_le(&mut buffer, header::SNAPSHOT_CRC32, crc);

    Ok(buffer)
}
