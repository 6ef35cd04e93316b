//! Physical framing of WAL records.
//!
//! Each record is stored as a fixed header followed by the payload:
//!
//! - payload length (u32 LE)
//! - CRC32 of the payload (u32 LE)
//! - payload bytes
//!
//! Every record carries its own checksum; any mismatch on read is reported
//! as corruption rather than silently returning damaged bytes.

use crc32fast::Hasher;

use super::errors::{WalError, WalResult};

/// Byte length of the frame header preceding every payload.
pub const FRAME_HEADER_LEN: usize = 8;

/// Computes the CRC32 checksum of a payload.
pub fn checksum(payload: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(payload);
    hasher.finalize()
}

/// Encode a payload into a framed record ready for appending.
pub fn encode_frame(payload: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(FRAME_HEADER_LEN + payload.len());
    frame.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    frame.extend_from_slice(&checksum(payload).to_le_bytes());
    frame.extend_from_slice(payload);
    frame
}

/// Decode the frame at the front of `buf`.
///
/// Returns the payload slice and the total number of bytes consumed.
pub fn decode_frame(buf: &[u8]) -> WalResult<(&[u8], usize)> {
    if buf.len() < FRAME_HEADER_LEN {
        return Err(WalError::Corruption(format!(
            "truncated frame header: {} bytes",
            buf.len()
        )));
    }
    let len = u32::from_le_bytes(buf[..4].try_into().unwrap()) as usize;
    let expected = u32::from_le_bytes(buf[4..8].try_into().unwrap());

    let end = FRAME_HEADER_LEN + len;
    if buf.len() < end {
        return Err(WalError::Corruption(format!(
            "truncated payload: want {} bytes, have {}",
            len,
            buf.len() - FRAME_HEADER_LEN
        )));
    }
    let payload = &buf[FRAME_HEADER_LEN..end];
    let actual = checksum(payload);
    if actual != expected {
        return Err(WalError::Corruption(format!(
            "checksum mismatch: stored {:#010x}, computed {:#010x}",
            expected, actual
        )));
    }
    Ok((payload, end))
}
