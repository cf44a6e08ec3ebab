//! Per-revision delta documents.
//!
//! Layout: magic | version | payload length (u64 LE) | MessagePack path set |
//! CRC32 of the payload (u32 LE).

use crate::error::{Result, StoreError};
use crate::types::PathSet;
use std::fs::{self, File};
use std::io::Write;
use std::path::Path;

/// Magic bytes for delta files.
const DELTA_MAGIC: &[u8; 4] = b"DLT\0";

/// Current delta format version.
const DELTA_VERSION: u8 = 1;

/// Write a delta document, replacing any existing one.
pub fn write_delta(path: &Path, delta: &PathSet) -> Result<()> {
    let payload = rmp_serde::to_vec(delta)?;

    let mut file = File::create(path)?;
    file.write_all(DELTA_MAGIC)?;
    file.write_all(&[DELTA_VERSION])?;
    file.write_all(&(payload.len() as u64).to_le_bytes())?;
    file.write_all(&payload)?;
    file.write_all(&crc32fast::hash(&payload).to_le_bytes())?;
    file.sync_all()?;

    Ok(())
}

/// Read and verify a delta document.
pub fn read_delta(path: &Path) -> Result<PathSet> {
    let data = fs::read(path)?;
    decode_delta(&data)
}

fn decode_delta(data: &[u8]) -> Result<PathSet> {
    const HEADER: usize = 4 + 1 + 8;

    if data.len() < HEADER + 4 {
        return Err(StoreError::InvalidFormat("truncated delta".into()));
    }
    if data[..4] != DELTA_MAGIC[..] {
        return Err(StoreError::InvalidFormat("Invalid delta magic".into()));
    }
    if data[4] != DELTA_VERSION {
        return Err(StoreError::InvalidFormat(format!(
            "Unsupported delta version: {}",
            data[4]
        )));
    }

    let mut len_bytes = [0u8; 8];
    len_bytes.copy_from_slice(&data[5..HEADER]);
    let declared = u64::from_le_bytes(len_bytes);
    let len = usize::try_from(declared)
        .ok()
        .filter(|len| len.checked_add(HEADER + 4) == Some(data.len()))
        .ok_or_else(|| {
            StoreError::Corruption(format!(
                "delta length mismatch: header says {} bytes, file holds {}",
                declared,
                data.len() - (HEADER + 4)
            ))
        })?;

    let payload = &data[HEADER..HEADER + len];
    let mut checksum_bytes = [0u8; 4];
    checksum_bytes.copy_from_slice(&data[HEADER + len..]);
    let stored = u32::from_le_bytes(checksum_bytes);
    let computed = crc32fast::hash(payload);
    if stored != computed {
        return Err(StoreError::ChecksumMismatch {
            expected: stored,
            got: computed,
        });
    }

    Ok(rmp_serde::from_slice(payload)?)
}
