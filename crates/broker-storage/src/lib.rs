//! On-disk segmented log storage: `Segment` is a single append-only file,
//! `Partition` is the ordered sequence of segments backing one topic
//! partition.

pub mod error;
pub mod partition;
pub mod segment;

pub use error::{PartitionError, SegmentError};
pub use partition::Partition;
pub use segment::Segment;
