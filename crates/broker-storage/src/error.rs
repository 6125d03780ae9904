use thiserror::Error;

/// Errors raised by segment-level operations. `MaxSizeReached` and `Eof` are
/// sentinels the caller is expected to handle, not fatal conditions.
#[derive(Debug, Error)]
pub enum SegmentError {
    #[error("segment max size reached")]
    MaxSizeReached,
    #[error("end of segment reached")]
    Eof,
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("corrupt record in segment: {0}")]
    Corrupt(#[from] broker_protocol::record::RecordError),
}

impl SegmentError {
    pub fn is_max_size_reached(&self) -> bool {
        matches!(self, SegmentError::MaxSizeReached)
    }

    pub fn is_eof(&self) -> bool {
        matches!(self, SegmentError::Eof)
    }
}

/// Errors raised by partition-level operations.
#[derive(Debug, Error)]
pub enum PartitionError {
    #[error("message.exceeds.max.segment.size")]
    MessageTooLarge,
    #[error(transparent)]
    Segment(#[from] SegmentError),
}
