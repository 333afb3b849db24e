//! Journal framing.
//!
//! The journal is a sequence of frames, one per committed batch:
//!
//! ```text
//! | magic "SLJ1" (4) | payload len u32 LE (4) | crc32 u32 LE (4) | CBOR payload |
//! ```
//!
//! The payload is a CBOR array of [`JournalEntry`]. A frame is the unit of
//! atomicity: on replay a frame either applies in full or, if it is torn or
//! fails its checksum, stops replay at its start offset.

use crate::error::{StoreError, StoreResult};
use crate::event::{Event, EventId};
use serde::{Deserialize, Serialize};

/// Magic bytes opening every frame.
pub const FRAME_MAGIC: [u8; 4] = *b"SLJ1";

/// Bytes before the payload.
pub const FRAME_HEADER_LEN: usize = 12;

/// One logical change inside a frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum JournalEntry {
    /// Insert or overwrite a row.
    Put(Event),
    /// Remove a row.
    Delete(EventId),
}

/// Encodes a batch of entries as one frame.
pub fn encode_frame(entries: &[JournalEntry]) -> StoreResult<Vec<u8>> {
    let mut payload = Vec::new();
    ciborium::into_writer(entries, &mut payload)
        .map_err(|e| StoreError::Codec(format!("failed to encode frame: {e}")))?;

    let len = u32::try_from(payload.len())
        .map_err(|_| StoreError::Codec(format!("frame of {} bytes too large", payload.len())))?;

    let mut frame = Vec::with_capacity(FRAME_HEADER_LEN + payload.len());
    frame.extend_from_slice(&FRAME_MAGIC);
    frame.extend_from_slice(&len.to_le_bytes());
    frame.extend_from_slice(&compute_crc32(&payload).to_le_bytes());
    frame.extend_from_slice(&payload);
    Ok(frame)
}

/// Result of scanning a journal.
#[derive(Debug, Default)]
pub struct Replay {
    /// Batches in commit order.
    pub batches: Vec<Vec<JournalEntry>>,
    /// Length of the well-formed prefix.
    pub valid_len: u64,
    /// Why the scan stopped early, if it did.
    pub torn_tail: Option<String>,
}

/// Scans journal bytes into batches.
///
/// Never fails: the first malformed frame ends the scan and is reported in
/// [`Replay::torn_tail`] so the caller can truncate it away.
pub fn replay(bytes: &[u8]) -> Replay {
    let mut replay = Replay::default();
    let mut offset = 0usize;

    while offset < bytes.len() {
        match decode_frame(&bytes[offset..]) {
            Ok((entries, consumed)) => {
                replay.batches.push(entries);
                offset += consumed;
                replay.valid_len = offset as u64;
            }
            Err(reason) => {
                replay.torn_tail = Some(format!("at offset {offset}: {reason}"));
                break;
            }
        }
    }

    replay
}

fn decode_frame(bytes: &[u8]) -> Result<(Vec<JournalEntry>, usize), String> {
    if bytes.len() < FRAME_HEADER_LEN {
        return Err(format!("short header ({} bytes)", bytes.len()));
    }
    if bytes[0..4] != FRAME_MAGIC {
        return Err("bad magic".into());
    }

    let len = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]) as usize;
    let expected_crc = u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]);

    let end = FRAME_HEADER_LEN + len;
    if bytes.len() < end {
        return Err(format!(
            "payload truncated: need {len} bytes, have {}",
            bytes.len() - FRAME_HEADER_LEN
        ));
    }

    let payload = &bytes[FRAME_HEADER_LEN..end];
    let actual_crc = compute_crc32(payload);
    if actual_crc != expected_crc {
        return Err(format!(
            "checksum mismatch: expected {expected_crc:#010x}, got {actual_crc:#010x}"
        ));
    }

    let entries: Vec<JournalEntry> =
        ciborium::from_reader(payload).map_err(|e| format!("undecodable payload: {e}"))?;

    Ok((entries, end))
}

/// CRC32 (IEEE polynomial) of `data`.
pub fn compute_crc32(data: &[u8]) -> u32 {
    const TABLE: [u32; 256] = {
        let mut table = [0u32; 256];
        let mut i = 0;
        while i < 256 {
            let mut crc = i as u32;
            let mut bit = 0;
            while bit < 8 {
                crc = if crc & 1 != 0 {
                    (crc >> 1) ^ 0xEDB8_8320
                } else {
                    crc >> 1
                };
                bit += 1;
            }
            table[i] = crc;
            i += 1;
        }
        table
    };

    !data.iter().fold(0xFFFF_FFFF_u32, |crc, &byte| {
        (crc >> 8) ^ TABLE[((crc ^ u32::from(byte)) & 0xFF) as usize]
    })
}
