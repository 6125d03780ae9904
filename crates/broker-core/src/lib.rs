//! Broker domain logic: topics, partitions' produce/consume orchestration,
//! consumer-group membership and rebalancing, and the retention sweeper.
//! Builds on `broker-storage` for the on-disk log and `broker-config` for
//! persisted options.

pub mod broker;
pub mod error;
pub mod group;
pub mod heartbeat;
pub mod partitioner;
pub mod retention;
pub mod topic;

pub use broker::Broker;
pub use error::CoreError;
pub use group::ConsumerGroup;
pub use topic::Topic;
