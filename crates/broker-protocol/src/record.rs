use bytes::{Buf, BufMut, BytesMut};
use thiserror::Error;

/// Header size up to and including `key_len`, i.e. everything before the
/// variable-length `key` and `payload` sections.
const HEADER_LEN: usize = 4 + 8 + 8 + 4;

/// A single record appended to a partition.
///
/// On-disk layout (big-endian):
/// `[ total_size u32 | offset u64 | timestamp u64 | key_len u32 | key | payload ]`
/// `total_size` covers the whole record, including itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub offset: u64,
    pub timestamp: u64,
    pub key: Vec<u8>,
    pub payload: Vec<u8>,
}

#[derive(Debug, Error)]
pub enum RecordError {
    #[error("buffer too small to contain a record header")]
    Truncated,
    #[error("declared total_size {declared} does not match buffer length {actual}")]
    SizeMismatch { declared: u32, actual: usize },
    #[error("key_len {key_len} exceeds total_size {total_size}")]
    KeyLenOverflow { key_len: u32, total_size: u32 },
}

impl Record {
    pub fn new(timestamp: u64, key: Vec<u8>, payload: Vec<u8>) -> Self {
        Record {
            offset: 0,
            timestamp,
            key,
            payload,
        }
    }

    /// Total on-disk size of this record, were it serialized now.
    pub fn encoded_len(&self) -> usize {
        HEADER_LEN + self.key.len() + self.payload.len()
    }

    /// Serializes the record. `offset` is written as-is; callers that don't
    /// yet know the assigned offset (e.g. `Partition::push`, which learns it
    /// from the segment) should pass `0` and patch bytes `4..12` afterward.
    pub fn serialize(&self) -> BytesMut {
        let total_size = self.encoded_len() as u32;
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        buf.put_u32(total_size);
        buf.put_u64(self.offset);
        buf.put_u64(self.timestamp);
        buf.put_u32(self.key.len() as u32);
        buf.put_slice(&self.key);
        buf.put_slice(&self.payload);
        buf
    }

    pub fn deserialize(mut blob: &[u8]) -> Result<Record, RecordError> {
        if blob.len() < HEADER_LEN {
            return Err(RecordError::Truncated);
        }

        let total_size = blob.get_u32();
        if total_size as usize != blob.len() + 4 {
            return Err(RecordError::SizeMismatch {
                declared: total_size,
                actual: blob.len() + 4,
            });
        }

        let offset = blob.get_u64();
        let timestamp = blob.get_u64();
        let key_len = blob.get_u32();

        if HEADER_LEN as u32 + key_len > total_size {
            return Err(RecordError::KeyLenOverflow {
                key_len,
                total_size,
            });
        }

        let key_len = key_len as usize;
        if blob.len() < key_len {
            return Err(RecordError::Truncated);
        }
        let key = blob[..key_len].to_vec();
        let payload = blob[key_len..].to_vec();

        Ok(Record {
            offset,
            timestamp,
            key,
            payload,
        })
    }

    /// Overwrites the offset field (bytes `4..12`) of an already-serialized
    /// blob in place. Used by `Segment::append_blob` once the segment's
    /// `next_offset` is known.
    pub fn patch_offset(blob: &mut [u8], offset: u64) {
        blob[4..12].copy_from_slice(&offset.to_be_bytes());
    }

    /// Reads the `total_size` field from the first 4 bytes of a blob.
    pub fn peek_total_size(header: &[u8; 4]) -> u32 {
        u32::from_be_bytes(*header)
    }

    /// Reads the `offset` field, which sits at byte offset 4 within a record.
    pub fn peek_offset(header: &[u8; 8]) -> u64 {
        u64::from_be_bytes(*header)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn round_trips() {
        let rec = Record {
            offset: 42,
            timestamp: 1_700_000_000,
            key: b"k".to_vec(),
            payload: b"v".to_vec(),
        };
        let blob = rec.serialize();
        let back = Record::deserialize(&blob).unwrap();
        assert_eq!(rec, back);
    }

    #[test]
    fn empty_key_round_trips() {
        let rec = Record::new(1, Vec::new(), b"payload".to_vec());
        let blob = rec.serialize();
        let back = Record::deserialize(&blob).unwrap();
        assert_eq!(back.key, Vec::<u8>::new());
        assert_eq!(back.payload, b"payload");
    }

    #[test]
    fn patch_offset_updates_bytes_4_to_12() {
        let rec = Record::new(1, b"k".to_vec(), b"v".to_vec());
        let mut blob = rec.serialize();
        Record::patch_offset(&mut blob, 7);
        let back = Record::deserialize(&blob).unwrap();
        assert_eq!(back.offset, 7);
    }

    #[test]
    fn rejects_truncated_buffer() {
        assert!(matches!(
            Record::deserialize(&[0, 0, 0, 1]),
            Err(RecordError::Truncated)
        ));
    }
}
