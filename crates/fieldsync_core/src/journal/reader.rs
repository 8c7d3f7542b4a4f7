//! Journal scanning.
//!
//! Recovery policy:
//! - an incomplete frame at the very end (torn write) ends the journal and
//!   is reported so the caller can truncate it away
//! - a complete frame with a bad magic, unknown kind, future version or
//!   checksum mismatch is corruption and fails the scan

use crate::error::{CoreError, CoreResult};
use crate::journal::record::{
    crc32, JournalRecord, RecordKind, CRC_SIZE, HEADER_SIZE, JOURNAL_MAGIC, JOURNAL_VERSION,
};

/// Result of scanning journal bytes.
#[derive(Debug, Default)]
pub struct ScanOutcome {
    /// Decoded records with their frame offsets.
    pub records: Vec<(u64, JournalRecord)>,
    /// Length of the valid prefix.
    pub valid_len: u64,
    /// Bytes of an incomplete trailing frame, if any.
    pub torn_bytes: u64,
}

/// Scans every frame in `data`.
pub fn scan(data: &[u8]) -> CoreResult<ScanOutcome> {
    let mut outcome = ScanOutcome::default();
    let mut pos = 0usize;

    while pos < data.len() {
        let offset = pos as u64;
        let remaining = &data[pos..];
        if remaining.len() < HEADER_SIZE {
            outcome.torn_bytes = remaining.len() as u64;
            break;
        }

        if remaining[0..4] != JOURNAL_MAGIC {
            return Err(CoreError::journal_corruption(offset, "invalid magic"));
        }
        let version = u16::from_le_bytes([remaining[4], remaining[5]]);
        if version == 0 || version > JOURNAL_VERSION {
            return Err(CoreError::journal_corruption(
                offset,
                format!("unsupported version {version}"),
            ));
        }
        let kind = RecordKind::from_byte(remaining[6]).ok_or_else(|| {
            CoreError::journal_corruption(offset, format!("unknown record kind {}", remaining[6]))
        })?;
        let len = u32::from_le_bytes([remaining[7], remaining[8], remaining[9], remaining[10]]) as usize;

        let frame_len = HEADER_SIZE + len + CRC_SIZE;
        if remaining.len() < frame_len {
            outcome.torn_bytes = remaining.len() as u64;
            break;
        }

        let body = &remaining[..HEADER_SIZE + len];
        let expected = u32::from_le_bytes([
            remaining[HEADER_SIZE + len],
            remaining[HEADER_SIZE + len + 1],
            remaining[HEADER_SIZE + len + 2],
            remaining[HEADER_SIZE + len + 3],
        ]);
        let actual = crc32(body);
        if expected != actual {
            return Err(CoreError::ChecksumMismatch {
                offset,
                expected,
                actual,
            });
        }

        let record = JournalRecord::decode_payload(kind, &body[HEADER_SIZE..])
            .map_err(|e| CoreError::journal_corruption(offset, e.to_string()))?;
        outcome.records.push((offset, record));
        pos += frame_len;
        outcome.valid_len = pos as u64;
    }

    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::journal::record::{CommitRecord, TableOp};
    use crate::types::ChangeId;

    fn frame(sequence: u64) -> Vec<u8> {
        JournalRecord::Commit(CommitRecord {
            sequence,
            ops: vec![TableOp::SetNextChangeId(ChangeId::new(sequence + 1))],
        })
        .encode_frame()
        .unwrap()
    }

    #[test]
    fn empty_journal() {
        let outcome = scan(&[]).unwrap();
        assert!(outcome.records.is_empty());
        assert_eq!(outcome.valid_len, 0);
        assert_eq!(outcome.torn_bytes, 0);
    }

    #[test]
    fn reads_consecutive_frames() {
        let mut data = frame(1);
        let first_len = data.len() as u64;
        data.extend(frame(2));

        let outcome = scan(&data).unwrap();
        assert_eq!(outcome.records.len(), 2);
        assert_eq!(outcome.records[1].0, first_len);
        assert_eq!(outcome.records[1].1.sequence(), 2);
        assert_eq!(outcome.valid_len, data.len() as u64);
    }

    #[test]
    fn torn_tail_is_reported_not_fatal() {
        let data = frame(1);
        let valid = data.len() as u64;
        let second = frame(2);
        for cut in [1, HEADER_SIZE - 1, HEADER_SIZE + 2, second.len() - 1] {
            let mut torn = data.clone();
            torn.extend_from_slice(&second[..cut]);
            let outcome = scan(&torn).unwrap();
            assert_eq!(outcome.records.len(), 1);
            assert_eq!(outcome.valid_len, valid);
            assert_eq!(outcome.torn_bytes, cut as u64);
        }
    }

    #[test]
    fn checksum_mismatch_is_fatal() {
        let mut data = frame(1);
        data[HEADER_SIZE] ^= 0xFF;
        assert!(matches!(scan(&data), Err(CoreError::ChecksumMismatch { offset: 0, .. })));
    }

    #[test]
    fn bad_header_fields_are_fatal() {
        let mut magic = frame(1);
        magic[0] = b'X';
        assert!(scan(&magic).unwrap_err().is_corruption());

        let mut kind = frame(1);
        kind[6] = 42;
        assert!(scan(&kind).unwrap_err().is_corruption());

        let mut version = frame(1);
        version[4] = 9;
        assert!(scan(&version).unwrap_err().is_corruption());
    }
}
