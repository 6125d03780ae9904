use serde::{Deserialize, Serialize};

/// Named error conditions. Both the string form and the numeric
/// discriminant are part of the wire contract; never rename a variant's
/// `as_str()` or renumber it once deployed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum BrokerErrorCode {
    TopicNotFound = 1,
    TopicAlreadyExists = 2,
    PartitionAlreadyExists = 3,
    NumPartitionMismatch = 4,
    ConsumerGroupNotFound = 5,
    ConsumerNotFound = 6,
    ConsumerIdAlreadyExists = 7,
    MissingGroupName = 8,
    MissingConsumerId = 9,
    ConsumerGroupsPartitionsMismatch = 10,
    MessageExceedsMaxSegmentSize = 11,
    Internal = 99,
}

impl BrokerErrorCode {
    pub fn code(self) -> i32 {
        self as i32
    }

    pub fn as_str(self) -> &'static str {
        match self {
            BrokerErrorCode::TopicNotFound => "topic.not.found",
            BrokerErrorCode::TopicAlreadyExists => "topic.already.exists",
            BrokerErrorCode::PartitionAlreadyExists => "partition.already.exists",
            BrokerErrorCode::NumPartitionMismatch => "num.partition.mismatch",
            BrokerErrorCode::ConsumerGroupNotFound => "consumer.group.not.found",
            BrokerErrorCode::ConsumerNotFound => "consumer.not.found",
            BrokerErrorCode::ConsumerIdAlreadyExists => "consumer.id.already.exists",
            BrokerErrorCode::MissingGroupName => "missing.group.name",
            BrokerErrorCode::MissingConsumerId => "missing.consumer.id",
            BrokerErrorCode::ConsumerGroupsPartitionsMismatch => {
                "consumer.groups.partitions.mismatch"
            }
            BrokerErrorCode::MessageExceedsMaxSegmentSize => "message.exceeds.max.segment.size",
            BrokerErrorCode::Internal => "internal.error",
        }
    }
}

/// The `{errorCode, errorMessage}` envelope every response payload carries.
/// `error_code` is `0` on success.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WireError {
    #[serde(rename = "errorCode")]
    pub error_code: i32,
    #[serde(rename = "errorMessage", skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl WireError {
    pub fn ok() -> Self {
        WireError {
            error_code: 0,
            error_message: None,
        }
    }

    pub fn from_code(code: BrokerErrorCode, message: impl Into<String>) -> Self {
        WireError {
            error_code: code.code(),
            error_message: Some(format!("{}: {}", code.as_str(), message.into())),
        }
    }
}
