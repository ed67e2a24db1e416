//! On-disk index file framing
//!
//! Layout: `KANN` magic, u32 format version, u64 payload length, u32 CRC32 of
//! the payload (all little-endian), then the payload itself. Files are
//! written to a temporary sibling, synced and renamed into place, so a crash
//! never leaves a half-written index under the final name.

use crate::error::{AnnError, Result};

use std::ffi::OsString;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Magic bytes for index files: "KANN"
const MAGIC_BYTES: &[u8; 4] = b"KANN";
pub const FORMAT_VERSION: u32 = 1;
pub const HEADER_SIZE: usize = 20;

/// Write `payload` to `path` atomically
pub fn write_file(path: &Path, payload: &[u8]) -> Result<()> {
    let tmp = temp_path(path);
    if let Err(e) = write_framed(&tmp, payload) {
        let _ = fs::remove_file(&tmp);
        return Err(e);
    }
    fs::rename(&tmp, path)?;
    Ok(())
}

fn write_framed(path: &Path, payload: &[u8]) -> Result<()> {
    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)?;

    let mut header = Vec::with_capacity(HEADER_SIZE);
    header.extend_from_slice(MAGIC_BYTES);
    header.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
    header.extend_from_slice(&(payload.len() as u64).to_le_bytes());
    header.extend_from_slice(&crc32fast::hash(payload).to_le_bytes());

    file.write_all(&header)?;
    file.write_all(payload)?;
    file.flush()?;
    file.sync_all()?;
    Ok(())
}

/// Read and validate an index file, returning its payload.
///
/// Any framing problem is an error; a damaged file is never partially loaded.
pub fn read_file(path: &Path) -> Result<Vec<u8>> {
    let mut bytes = fs::read(path)?;
    if bytes.len() < HEADER_SIZE {
        return Err(AnnError::InvalidFormat(format!(
            "file is {} bytes, shorter than the {} byte header",
            bytes.len(),
            HEADER_SIZE
        )));
    }

    if &bytes[0..4] != MAGIC_BYTES {
        return Err(AnnError::InvalidFormat("Invalid magic bytes".to_string()));
    }

    let version = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
    if version != FORMAT_VERSION {
        return Err(AnnError::VersionMismatch {
            expected: FORMAT_VERSION,
            actual: version,
        });
    }

    let mut len_bytes = [0u8; 8];
    len_bytes.copy_from_slice(&bytes[8..16]);
    let payload_len = u64::from_le_bytes(len_bytes);
    let actual_len = (bytes.len() - HEADER_SIZE) as u64;
    if payload_len != actual_len {
        return Err(AnnError::InvalidFormat(format!(
            "payload is {} bytes, header says {}",
            actual_len, payload_len
        )));
    }

    let checksum = u32::from_le_bytes([bytes[16], bytes[17], bytes[18], bytes[19]]);
    if crc32fast::hash(&bytes[HEADER_SIZE..]) != checksum {
        return Err(AnnError::ChecksumMismatch);
    }

    bytes.drain(..HEADER_SIZE);
    Ok(bytes)
}

/// Sibling path used while writing
fn temp_path(path: &Path) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(".tmp");
    PathBuf::from(name)
}
