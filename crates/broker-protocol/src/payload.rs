//! Request/response payload shapes, one struct per command. Wire-coded as
//! JSON.

use crate::error::WireError;
use broker_config::{ConsumerOptions, TopicOptions};
use serde::{Deserialize, Serialize};

/// `key`/`value` of a single message inside a `produce` request. `timestamp`
/// is the producer-supplied epoch-seconds value; when absent the broker
/// stamps its own time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProduceMessage {
    #[serde(default)]
    pub key: Vec<u8>,
    pub value: Vec<u8>,
    #[serde(default)]
    pub timestamp: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProduceRequest {
    pub topic: String,
    pub messages: Vec<ProduceMessage>,
    #[serde(default)]
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProduceResponse {
    #[serde(flatten)]
    pub error: WireError,
    /// Offsets assigned to each message in `messages`, in order, when `error`
    /// indicates success.
    #[serde(default)]
    pub offsets: Vec<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsumeRequest {
    pub id: String,
    pub topic: String,
    pub group: String,
    #[serde(default)]
    pub from_beginning: bool,
    #[serde(default)]
    pub consumer_options: ConsumerOptions,
}

/// One delivered record, pushed as a response carrying the original
/// `consume` request's correlation id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsumeMessage {
    pub partition: u32,
    pub offset: u64,
    pub key: Vec<u8>,
    pub payload: Vec<u8>,
    pub timestamp: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsumeResponse {
    #[serde(flatten)]
    pub error: WireError,
    #[serde(default)]
    pub message: Option<ConsumeMessage>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateTopicSpec {
    pub name: String,
    #[serde(default)]
    pub configs: Option<TopicOptions>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateTopicsRequest {
    pub topics: Vec<CreateTopicSpec>,
    #[serde(default)]
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateTopicsResponse {
    #[serde(flatten)]
    pub error: WireError,
    #[serde(default)]
    pub created: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteTopicRequest {
    pub topic: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteTopicResponse {
    #[serde(flatten)]
    pub error: WireError,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListTopicsRequest {
    #[serde(default)]
    pub name_filter: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopicSummary {
    pub name: String,
    pub num_partitions: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListTopicsResponse {
    #[serde(flatten)]
    pub error: WireError,
    #[serde(default)]
    pub topics: Vec<TopicSummary>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetTopicRequest {
    pub topic: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetTopicResponse {
    #[serde(flatten)]
    pub error: WireError,
    #[serde(default)]
    pub topic: Option<TopicDetail>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopicDetail {
    pub name: String,
    pub options: TopicOptions,
    pub partition_sizes: Vec<u64>,
    pub groups: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateConsumerRequest {
    #[serde(default)]
    pub id: String,
    pub topic: String,
    pub group: String,
    #[serde(default)]
    pub options: ConsumerOptions,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateConsumerResponse {
    #[serde(flatten)]
    pub error: WireError,
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub assigned_partitions: Vec<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteConsumerRequest {
    pub topic: String,
    pub group: String,
    pub id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteConsumerResponse {
    #[serde(flatten)]
    pub error: WireError,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatRequest {
    pub topic: String,
    pub group: String,
    pub consumer_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatResponse {
    #[serde(flatten)]
    pub error: WireError,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommitOffsetRequest {
    pub topic: String,
    pub group: String,
    pub partition: u32,
    pub offset: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommitOffsetResponse {
    #[serde(flatten)]
    pub error: WireError,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListGroupsRequest {
    pub topic: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListGroupsResponse {
    #[serde(flatten)]
    pub error: WireError,
    #[serde(default)]
    pub groups: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetGroupRequest {
    pub topic: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupMemberDetail {
    pub id: String,
    pub assigned_partitions: Vec<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetGroupResponse {
    #[serde(flatten)]
    pub error: WireError,
    #[serde(default)]
    pub consumers: Vec<GroupMemberDetail>,
    #[serde(default)]
    pub offsets: std::collections::BTreeMap<u32, u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn produce_request_round_trips_through_json() {
        let req = ProduceRequest {
            topic: "events".into(),
            messages: vec![ProduceMessage {
                key: b"k".to_vec(),
                value: b"v".to_vec(),
                timestamp: None,
            }],
            timeout_ms: 5000,
        };
        let json = serde_json::to_vec(&req).unwrap();
        let back: ProduceRequest = serde_json::from_slice(&json).unwrap();
        assert_eq!(back.topic, "events");
        assert_eq!(back.messages.len(), 1);
    }

    #[test]
    fn error_envelope_flattens_into_response() {
        let resp = ProduceResponse {
            error: WireError::ok(),
            offsets: vec![0, 1],
        };
        let json = serde_json::to_string(&resp).unwrap();
        assert!(json.contains("\"errorCode\":0"));
        assert!(!json.contains("errorMessage"));
    }
}
