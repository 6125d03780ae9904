use super::consumer::{now_unix_millis, Consumer, ConsumerSnapshot};
use crate::error::CoreError;
use broker_config::ConsumerOptions;
use rand::seq::SliceRandom;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

/// A consumer group registered against one topic. Membership lives only in
/// memory; only `offsets` survive a restart.
#[derive(Debug)]
pub struct ConsumerGroup {
    name: String,
    consumers: Vec<Consumer>,
    offsets: BTreeMap<u32, u64>,
}

impl ConsumerGroup {
    pub fn new(name: String) -> Self {
        ConsumerGroup {
            name,
            consumers: Vec::new(),
            offsets: BTreeMap::new(),
        }
    }

    /// Rebuilds a group from persisted `state.json` offsets after a
    /// restart, with no members yet. They rejoin and get reassigned as
    /// `create_consumer` calls arrive.
    pub fn restore(name: String, offsets: BTreeMap<u32, u64>) -> Self {
        ConsumerGroup {
            name,
            consumers: Vec::new(),
            offsets,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn offsets(&self) -> BTreeMap<u32, u64> {
        self.offsets.clone()
    }

    pub fn consumer_snapshots(&self) -> Vec<ConsumerSnapshot> {
        self.consumers
            .iter()
            .map(|c| ConsumerSnapshot {
                id: c.id.clone(),
                assigned_partitions: c.partitions.clone(),
            })
            .collect()
    }

    pub fn partitions_for(&self, consumer_id: &str) -> Vec<u32> {
        self.consumers
            .iter()
            .find(|c| c.id == consumer_id)
            .map(|c| c.partitions.clone())
            .unwrap_or_default()
    }

    /// Like `partitions_for`, but distinguishes "member with no partitions
    /// assigned" from "not a member at all": the latter tells a live
    /// consume loop it has been removed (explicit leave or heartbeat
    /// expiry, flagged via `pending_removal` ahead of the physical
    /// removal) and should stop via the stop→stopped handshake.
    pub fn member_partitions(&self, consumer_id: &str) -> Option<Vec<u32>> {
        self.consumers
            .iter()
            .find(|c| c.id == consumer_id && !c.pending_removal)
            .map(|c| c.partitions.clone())
    }

    /// The offset committed for `partition`, if any.
    pub fn committed_offset(&self, partition: u32) -> Option<u64> {
        self.offsets.get(&partition).copied()
    }

    /// Registers a new consumer. Caller must follow up with `rebalance`.
    pub fn add_consumer(&mut self, id: String, options: ConsumerOptions) -> Result<(), CoreError> {
        if self.consumers.iter().any(|c| c.id == id) {
            return Err(CoreError::ConsumerIdAlreadyExists);
        }
        self.consumers.push(Consumer::new(id, options));
        Ok(())
    }

    /// Flags `id` as pending removal (so `member_partitions` reports it
    /// gone immediately) and cancels its stop token to wake a blocked push
    /// loop. Returns the `stopped` handle the caller awaits, unlocked,
    /// before calling `finalize_removal`.
    pub fn request_removal(&mut self, id: &str) -> Result<Arc<Notify>, CoreError> {
        let consumer = self
            .consumers
            .iter_mut()
            .find(|c| c.id == id)
            .ok_or(CoreError::ConsumerNotFound)?;
        consumer.pending_removal = true;
        consumer.stop.cancel();
        Ok(consumer.stopped.clone())
    }

    /// Physically removes `id` after its stop→stopped handshake has been
    /// awaited (or timed out). A no-op if already gone. Caller must follow
    /// up with `rebalance`.
    pub fn finalize_removal(&mut self, id: &str) {
        self.consumers.retain(|c| c.id != id);
    }

    /// Ids whose heartbeat has aged past their own `session.timeout.ms`,
    /// not already pending removal from a racing call.
    pub fn expired_consumer_ids(&self) -> Vec<String> {
        let now = now_unix_millis();
        self.consumers
            .iter()
            .filter(|c| !c.pending_removal)
            .filter(|c| now.saturating_sub(c.last_heartbeat_unix_millis) >= c.options.session_timeout_ms.max(0) as u64)
            .map(|c| c.id.clone())
            .collect()
    }

    /// Cancels and re-arms `id`'s stop token so a push loop blocked on the
    /// previous generation wakes immediately; a `CancellationToken` is
    /// one-shot, so the token must be replaced to catch the next rebalance.
    pub fn consumer_stop_token(&self, id: &str) -> Option<CancellationToken> {
        self.consumers.iter().find(|c| c.id == id).map(|c| c.stop.clone())
    }

    /// Marks `id`'s push loop as attached, recording the request's
    /// correlation id, and rejects a concurrent second attach for the same
    /// consumer id (the `started` guard prevents double-start).
    pub fn mark_started(&mut self, id: &str, correlation_id: i32) -> Result<(), CoreError> {
        let consumer = self
            .consumers
            .iter_mut()
            .find(|c| c.id == id)
            .ok_or(CoreError::ConsumerNotFound)?;
        if consumer.started {
            return Err(CoreError::ConsumerIdAlreadyExists);
        }
        consumer.started = true;
        consumer.current_correlation_id = Some(correlation_id);
        Ok(())
    }

    /// Acknowledges that a push loop has drained and exited: clears
    /// `started` so a future attach is allowed, and wakes whoever is
    /// awaiting this consumer's stop→stopped handshake.
    pub fn ack_stopped(&mut self, id: &str) {
        if let Some(consumer) = self.consumers.iter_mut().find(|c| c.id == id) {
            consumer.started = false;
            consumer.current_correlation_id = None;
            consumer.stopped.notify_one();
        }
    }

    /// Reassigns every topic partition across the current membership in
    /// shuffled round-robin order: shuffle the consumer list, then walk
    /// partitions 0..num_partitions assigning each to the next consumer in
    /// rotation, advancing the index modulo the consumer count every
    /// iteration so no single consumer absorbs every partition. Every
    /// surviving member's stop token is cancelled and replaced, waking any
    /// push loop blocked on the old assignment so it re-reads the new one
    /// without waiting for the poll fallback.
    pub fn rebalance(&mut self, num_partitions: u32) {
        if self.consumers.is_empty() {
            return;
        }

        self.consumers.shuffle(&mut rand::thread_rng());
        for consumer in &mut self.consumers {
            consumer.partitions.clear();
            consumer.stop.cancel();
            consumer.stop = CancellationToken::new();
        }

        let mut j = 0usize;
        for partition in 0..num_partitions {
            self.consumers[j].partitions.push(partition);
            j = (j + 1) % self.consumers.len();
        }
    }

    /// Marks `consumer_id` as alive, resetting the expiry clock checked by
    /// `expired_consumer_ids`.
    pub fn heartbeat(&mut self, consumer_id: &str) -> Result<(), CoreError> {
        let consumer = self
            .consumers
            .iter_mut()
            .find(|c| c.id == consumer_id)
            .ok_or(CoreError::ConsumerNotFound)?;
        consumer.last_heartbeat_unix_millis = now_unix_millis();
        Ok(())
    }

    /// Commits `offset` for `partition`, rejecting any value behind the
    /// already-committed one.
    pub fn commit_offset(&mut self, partition: u32, offset: u64) -> Result<(), CoreError> {
        if let Some(&committed) = self.offsets.get(&partition) {
            if offset < committed {
                return Err(CoreError::OffsetRegression {
                    committed,
                    attempted: offset,
                });
            }
        }
        self.offsets.insert(partition, offset);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn opts() -> ConsumerOptions {
        ConsumerOptions::default()
    }

    #[test]
    fn add_consumer_rejects_duplicate_id() {
        let mut group = ConsumerGroup::new("g".into());
        group.add_consumer("c1".into(), opts()).unwrap();
        let err = group.add_consumer("c1".into(), opts()).unwrap_err();
        assert!(matches!(err, CoreError::ConsumerIdAlreadyExists));
    }

    #[test]
    fn rebalance_assigns_every_partition_exactly_once() {
        let mut group = ConsumerGroup::new("g".into());
        group.add_consumer("c1".into(), opts()).unwrap();
        group.add_consumer("c2".into(), opts()).unwrap();
        group.add_consumer("c3".into(), opts()).unwrap();

        group.rebalance(10);

        let mut all: Vec<u32> = group
            .consumers
            .iter()
            .flat_map(|c| c.partitions.clone())
            .collect();
        all.sort_unstable();
        assert_eq!(all, (0..10).collect::<Vec<u32>>());
    }

    #[test]
    fn rebalance_distributes_round_robin_not_all_to_one_consumer() {
        let mut group = ConsumerGroup::new("g".into());
        group.add_consumer("c1".into(), opts()).unwrap();
        group.add_consumer("c2".into(), opts()).unwrap();
        group.rebalance(4);

        for consumer in &group.consumers {
            assert_eq!(consumer.partitions.len(), 2);
        }
    }

    #[test]
    fn commit_offset_rejects_regression() {
        let mut group = ConsumerGroup::new("g".into());
        group.commit_offset(0, 10).unwrap();
        let err = group.commit_offset(0, 3).unwrap_err();
        assert!(matches!(err, CoreError::OffsetRegression { .. }));
        group.commit_offset(0, 10).unwrap();
        group.commit_offset(0, 11).unwrap();
    }

    #[test]
    fn expired_consumer_ids_uses_each_consumers_own_timeout() {
        let mut group = ConsumerGroup::new("g".into());
        group.add_consumer("c1".into(), opts().with_session_timeout_ms(1)).unwrap();
        group.add_consumer("c2".into(), opts().with_session_timeout_ms(60_000)).unwrap();
        for consumer in &mut group.consumers {
            consumer.last_heartbeat_unix_millis = 0;
        }

        assert_eq!(group.expired_consumer_ids(), vec!["c1".to_string()]);
    }

    #[test]
    fn request_removal_flags_pending_and_excludes_from_member_partitions() {
        let mut group = ConsumerGroup::new("g".into());
        group.add_consumer("c1".into(), opts()).unwrap();
        group.rebalance(2);
        assert!(group.member_partitions("c1").is_some());

        group.request_removal("c1").unwrap();
        assert!(group.member_partitions("c1").is_none());
        // still physically present until finalize_removal runs
        assert_eq!(group.consumers.len(), 1);

        group.finalize_removal("c1");
        assert!(group.consumers.is_empty());
    }

    #[test]
    fn mark_started_rejects_double_start() {
        let mut group = ConsumerGroup::new("g".into());
        group.add_consumer("c1".into(), opts()).unwrap();
        group.mark_started("c1", 1).unwrap();
        let err = group.mark_started("c1", 2).unwrap_err();
        assert!(matches!(err, CoreError::ConsumerIdAlreadyExists));

        group.ack_stopped("c1");
        group.mark_started("c1", 3).unwrap();
    }
}
