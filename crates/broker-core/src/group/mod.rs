mod consumer;
mod group;

pub use consumer::{Consumer, ConsumerSnapshot};
pub use group::ConsumerGroup;
