use broker_config::ConfigError;
use broker_protocol::BrokerErrorCode;
use broker_storage::{PartitionError, SegmentError};
use thiserror::Error;

/// Errors raised by `Topic`/`Broker`/`ConsumerGroup` operations. Each
/// variant maps to exactly one `BrokerErrorCode` so the server layer can
/// translate it straight into a `WireError`.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("topic.not.found")]
    TopicNotFound,
    #[error("topic.already.exists")]
    TopicAlreadyExists,
    #[error("partition.already.exists")]
    PartitionAlreadyExists,
    #[error("num.partition.mismatch")]
    NumPartitionMismatch,
    #[error("consumer.group.not.found")]
    ConsumerGroupNotFound,
    #[error("consumer.not.found")]
    ConsumerNotFound,
    #[error("consumer.id.already.exists")]
    ConsumerIdAlreadyExists,
    #[error("missing.group.name")]
    MissingGroupName,
    #[error("missing.consumer.id")]
    MissingConsumerId,
    #[error("consumer.groups.partitions.mismatch")]
    ConsumerGroupsPartitionsMismatch,
    #[error("offset commit {attempted} regresses behind already-committed {committed}")]
    OffsetRegression { committed: u64, attempted: u64 },
    #[error(transparent)]
    Partition(#[from] PartitionError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl CoreError {
    /// True when the offset simply hasn't been produced yet: a consume loop
    /// should keep long-polling rather than surface this as an error. Any
    /// other partition error (IO failure, record corruption) is genuine and
    /// must be propagated instead of silently retried forever.
    pub fn is_not_yet_available(&self) -> bool {
        matches!(self, CoreError::Partition(PartitionError::Segment(SegmentError::Eof)))
    }

    pub fn code(&self) -> BrokerErrorCode {
        match self {
            CoreError::TopicNotFound => BrokerErrorCode::TopicNotFound,
            CoreError::TopicAlreadyExists => BrokerErrorCode::TopicAlreadyExists,
            CoreError::PartitionAlreadyExists => BrokerErrorCode::PartitionAlreadyExists,
            CoreError::NumPartitionMismatch => BrokerErrorCode::NumPartitionMismatch,
            CoreError::ConsumerGroupNotFound => BrokerErrorCode::ConsumerGroupNotFound,
            CoreError::ConsumerNotFound => BrokerErrorCode::ConsumerNotFound,
            CoreError::ConsumerIdAlreadyExists => BrokerErrorCode::ConsumerIdAlreadyExists,
            CoreError::MissingGroupName => BrokerErrorCode::MissingGroupName,
            CoreError::MissingConsumerId => BrokerErrorCode::MissingConsumerId,
            CoreError::ConsumerGroupsPartitionsMismatch => {
                BrokerErrorCode::ConsumerGroupsPartitionsMismatch
            }
            CoreError::Partition(PartitionError::MessageTooLarge) => {
                BrokerErrorCode::MessageExceedsMaxSegmentSize
            }
            CoreError::OffsetRegression { .. }
            | CoreError::Partition(_)
            | CoreError::Config(_)
            | CoreError::Io(_) => BrokerErrorCode::Internal,
        }
    }
}
