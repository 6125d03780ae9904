use crate::error::CoreError;
use crate::group::ConsumerGroup;
use crate::partitioner::partition_for_key;
use broker_config::{ConsumerOptions, TopicOptions};
use broker_storage::Partition;
use broker_protocol::Record;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;

/// How long `remove_consumer`/`expire_stale_consumers` wait for a push
/// loop's stopped-ack before finalizing removal anyway. A loop that has
/// already exited (client disconnected) never sends one, so this bounds
/// the wait rather than blocking removal indefinitely.
const CONSUMER_STOP_TIMEOUT: Duration = Duration::from_secs(2);

/// A topic's on-disk partitions plus the consumer groups registered against
/// it. Partitions are each behind their own `Mutex` so producers and
/// consumers of different partitions never block each other.
pub struct Topic {
    name: String,
    base_path: PathBuf,
    options: TopicOptions,
    partitions: Vec<Mutex<Partition>>,
    groups: RwLock<BTreeMap<String, ConsumerGroup>>,
}

fn options_path(base_path: &Path, name: &str) -> PathBuf {
    base_path.join(name).join("options.json")
}

fn state_path(base_path: &Path, name: &str) -> PathBuf {
    base_path.join(name).join("state.json")
}

/// Persisted shape of `state.json`: group existence and committed offsets
/// only. Membership is never persisted since consumers rejoin and
/// rebalance fresh on every broker restart.
#[derive(Debug, Default, serde::Serialize, serde::Deserialize)]
struct TopicState {
    groups: Vec<GroupState>,
}

#[derive(Debug, serde::Serialize, serde::Deserialize)]
struct GroupState {
    name: String,
    offsets: BTreeMap<u32, u64>,
}

impl Topic {
    /// Creates a brand new topic: makes its directory, persists
    /// `options.json`, and initializes `options.num_partitions` partitions
    /// starting empty. Errors if the topic directory already exists.
    pub async fn create(
        base_path: &Path,
        name: &str,
        options: TopicOptions,
    ) -> Result<Topic, CoreError> {
        let topic_path = base_path.join(name);
        if topic_path.exists() {
            return Err(CoreError::TopicAlreadyExists);
        }
        std::fs::create_dir_all(&topic_path)?;

        let mut options = options;
        if options.num_partitions < 1 {
            options.num_partitions = 1;
        }
        options.save(&options_path(base_path, name))?;

        let partitions = Self::init_partitions(base_path, name, &options).await?;

        Ok(Topic {
            name: name.to_string(),
            base_path: base_path.to_path_buf(),
            options,
            partitions,
            groups: RwLock::new(BTreeMap::new()),
        })
    }

    async fn init_partitions(
        base_path: &Path,
        name: &str,
        options: &TopicOptions,
    ) -> Result<Vec<Mutex<Partition>>, CoreError> {
        let mut partitions = Vec::with_capacity(options.num_partitions as usize);
        for i in 0..options.num_partitions {
            let partition = Partition::create(
                base_path,
                name,
                i,
                options.segment_bytes,
                options.max_message_bytes,
            )
            .await?;
            partitions.push(Mutex::new(partition));
        }
        Ok(partitions)
    }

    /// Reopens an existing topic from disk: loads `options.json`, rebuilds
    /// every partition by scanning its segment files, and restores group
    /// offsets from `state.json`. Membership is intentionally not restored.
    pub async fn load(base_path: &Path, name: &str) -> Result<Topic, CoreError> {
        let options = TopicOptions::load(&options_path(base_path, name))?;

        let topic_path = base_path.join(name);
        let mut partition_ids = Vec::new();
        if topic_path.is_dir() {
            for entry in std::fs::read_dir(&topic_path)? {
                let entry = entry?;
                if entry.file_type()?.is_dir() {
                    if let Ok(id) = entry.file_name().to_string_lossy().parse::<u32>() {
                        partition_ids.push(id);
                    }
                }
            }
        }
        partition_ids.sort_unstable();

        if partition_ids.is_empty() {
            let partitions = Self::init_partitions(base_path, name, &options).await?;
            return Ok(Topic {
                name: name.to_string(),
                base_path: base_path.to_path_buf(),
                options,
                partitions,
                groups: RwLock::new(BTreeMap::new()),
            });
        }

        if partition_ids.len() != options.num_partitions as usize {
            return Err(CoreError::NumPartitionMismatch);
        }

        let mut partitions = Vec::with_capacity(partition_ids.len());
        for id in partition_ids {
            let segment_base_offsets = list_segment_base_offsets(&topic_path.join(id.to_string()))?;
            let partition = Partition::load(
                base_path,
                name,
                id,
                segment_base_offsets,
                options.segment_bytes,
                options.max_message_bytes,
            )
            .await?;
            partitions.push(Mutex::new(partition));
        }

        let groups = load_state(&state_path(base_path, name)).unwrap_or_default();
        let mut group_map = BTreeMap::new();
        for g in groups.groups {
            group_map.insert(g.name.clone(), ConsumerGroup::restore(g.name, g.offsets));
        }

        Ok(Topic {
            name: name.to_string(),
            base_path: base_path.to_path_buf(),
            options,
            partitions,
            groups: RwLock::new(group_map),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn options(&self) -> &TopicOptions {
        &self.options
    }

    pub fn num_partitions(&self) -> u32 {
        self.partitions.len() as u32
    }

    /// Hashes `key` to a partition and appends the message there, returning
    /// `(partition, offset)`. Uses `timestamp` (producer-supplied epoch
    /// seconds) when given, otherwise the server's own clock.
    pub async fn produce(
        &self,
        key: Vec<u8>,
        payload: Vec<u8>,
        timestamp: Option<u64>,
    ) -> Result<(u32, u64), CoreError> {
        let partition_id = partition_for_key(&key, self.num_partitions());
        let timestamp = timestamp.unwrap_or_else(now_unix_secs);

        let mut partition = self.partitions[partition_id as usize].lock().await;
        let offset = partition.push(key, payload, timestamp).await?;
        Ok((partition_id, offset))
    }

    /// Reads a single record at `offset` from `partition`. Returns
    /// `Err(Partition(Segment(Eof)))` when the offset hasn't been produced
    /// yet; callers long-poll via `watch_partition`.
    pub async fn consume(&self, partition: u32, offset: u64) -> Result<Record, CoreError> {
        let mut p = self
            .partitions
            .get(partition as usize)
            .ok_or(CoreError::TopicNotFound)?
            .lock()
            .await;
        Ok(p.consume(offset).await?)
    }

    /// Subscribes to a partition's produced-offset watch, used by the
    /// server's consume push loop to wake up without polling.
    pub async fn watch_partition(&self, partition: u32) -> Option<tokio::sync::watch::Receiver<u64>> {
        let p = self.partitions.get(partition as usize)?.lock().await;
        Some(p.subscribe())
    }

    pub async fn partition_sizes(&self) -> Vec<u64> {
        let mut sizes = Vec::with_capacity(self.partitions.len());
        for p in &self.partitions {
            sizes.push(p.lock().await.size());
        }
        sizes
    }

    pub async fn partition_next_offset(&self, partition: u32) -> Option<u64> {
        let p = self.partitions.get(partition as usize)?.lock().await;
        Some(p.next_offset())
    }

    /// Retention sweep entry point for one topic: evaluates every
    /// non-active segment of every partition against `retention.ms`/
    /// `retention.bytes`, deleting expired ones. The active segment is
    /// never a candidate, enforced already by `Partition::retirable_segments`.
    pub async fn run_retention_sweep(&self, now_unix_secs: u64) {
        if self.options.cleanup_policy != broker_config::CleanupPolicy::Delete {
            return;
        }

        for (idx, partition) in self.partitions.iter().enumerate() {
            let mut p = partition.lock().await;

            if self.options.retention_ms > -1 {
                let retention_secs = (self.options.retention_ms as u64) / 1000;
                loop {
                    let Some((base_offset, last_append)) = p.retirable_segments().into_iter().next()
                    else {
                        break;
                    };
                    if now_unix_secs.saturating_sub(last_append) < retention_secs {
                        break;
                    }
                    tracing::info!(topic = %self.name, partition = idx, base_offset, "deleting expired segment");
                    if !p.delete_oldest_segment().await.unwrap_or(false) {
                        break;
                    }
                }
            }

            if self.options.retention_bytes > -1 {
                while p.size() as i64 > self.options.retention_bytes {
                    tracing::info!(topic = %self.name, partition = idx, "deleting segment over retention.bytes");
                    if !p.delete_oldest_segment().await.unwrap_or(false) {
                        break;
                    }
                }
            }
        }
    }

    pub async fn groups(&self) -> Vec<String> {
        self.groups.read().await.keys().cloned().collect()
    }

    /// Current partition assignment for `consumer_id` in `group_name`.
    /// `None` means the consumer is no longer a member of the group
    /// (removed by explicit leave or heartbeat expiry); a live consume loop
    /// polls this to notice both removal and mid-stream rebalances.
    pub async fn consumer_assignment(&self, group_name: &str, consumer_id: &str) -> Option<Vec<u32>> {
        let groups = self.groups.read().await;
        groups.get(group_name)?.member_partitions(consumer_id)
    }

    /// The offset committed for `(group, partition)`, if any, used to
    /// resolve a consume loop's starting offset.
    pub async fn committed_offset(&self, group_name: &str, partition: u32) -> Option<u64> {
        let groups = self.groups.read().await;
        groups.get(group_name)?.committed_offset(partition)
    }

    pub async fn get_group_snapshot(&self, name: &str) -> Option<(Vec<crate::group::ConsumerSnapshot>, BTreeMap<u32, u64>)> {
        let groups = self.groups.read().await;
        let group = groups.get(name)?;
        Some((group.consumer_snapshots(), group.offsets()))
    }

    /// Creates a consumer, registering its group on first use, and
    /// rebalances the group's partition assignment.
    pub async fn create_consumer(
        &self,
        group_name: &str,
        consumer_id: &str,
        options: ConsumerOptions,
    ) -> Result<Vec<u32>, CoreError> {
        if group_name.is_empty() {
            return Err(CoreError::MissingGroupName);
        }
        if consumer_id.is_empty() {
            return Err(CoreError::MissingConsumerId);
        }

        let mut groups = self.groups.write().await;
        let group = groups
            .entry(group_name.to_string())
            .or_insert_with(|| ConsumerGroup::new(group_name.to_string()));

        group.add_consumer(consumer_id.to_string(), options)?;
        group.rebalance(self.num_partitions());
        self.persist_state(&groups)?;

        Ok(group.partitions_for(consumer_id))
    }

    /// Removes a consumer: flags it pending removal and cancels its stop
    /// token under the group lock, then - unlocked, so an in-flight push
    /// loop can still read group state to notice its own removal - waits
    /// (bounded) for its stopped-ack before physically removing it and
    /// rebalancing.
    pub async fn remove_consumer(&self, group_name: &str, consumer_id: &str) -> Result<(), CoreError> {
        let stopped = {
            let mut groups = self.groups.write().await;
            let group = groups.get_mut(group_name).ok_or(CoreError::ConsumerGroupNotFound)?;
            group.request_removal(consumer_id)?
        };
        let _ = tokio::time::timeout(CONSUMER_STOP_TIMEOUT, stopped.notified()).await;

        let mut groups = self.groups.write().await;
        let group = groups.get_mut(group_name).ok_or(CoreError::ConsumerGroupNotFound)?;
        group.finalize_removal(consumer_id);
        group.rebalance(self.num_partitions());
        self.persist_state(&groups)?;
        Ok(())
    }

    /// The `CancellationToken` a consume loop should watch while blocked
    /// waiting for more data: cancelled on every rebalance (to re-read a
    /// changed assignment promptly) and on removal (to notice it should
    /// stop). `None` once the consumer is gone.
    pub async fn consumer_stop_token(&self, group_name: &str, consumer_id: &str) -> Option<CancellationToken> {
        let groups = self.groups.read().await;
        groups.get(group_name)?.consumer_stop_token(consumer_id)
    }

    /// Attaches a push loop to `consumer_id`, rejecting a concurrent
    /// second attach for the same id.
    pub async fn mark_consumer_started(
        &self,
        group_name: &str,
        consumer_id: &str,
        correlation_id: i32,
    ) -> Result<(), CoreError> {
        let mut groups = self.groups.write().await;
        let group = groups.get_mut(group_name).ok_or(CoreError::ConsumerGroupNotFound)?;
        group.mark_started(consumer_id, correlation_id)
    }

    /// Acknowledges that a push loop has drained and exited, for whatever
    /// reason (removal, rebalance away, client disconnect).
    pub async fn ack_consumer_stopped(&self, group_name: &str, consumer_id: &str) {
        let mut groups = self.groups.write().await;
        if let Some(group) = groups.get_mut(group_name) {
            group.ack_stopped(consumer_id);
        }
    }

    pub async fn heartbeat(&self, group_name: &str, consumer_id: &str) -> Result<(), CoreError> {
        let mut groups = self.groups.write().await;
        let group = groups
            .get_mut(group_name)
            .ok_or(CoreError::ConsumerGroupNotFound)?;
        group.heartbeat(consumer_id)
    }

    /// Commits an offset for `(group, partition)`, rejecting regressions:
    /// a commit behind the already-committed offset never moves it backward.
    pub async fn commit_offset(
        &self,
        group_name: &str,
        partition: u32,
        offset: u64,
    ) -> Result<(), CoreError> {
        let mut groups = self.groups.write().await;
        let group = groups
            .get_mut(group_name)
            .ok_or(CoreError::ConsumerGroupNotFound)?;
        group.commit_offset(partition, offset)?;
        self.persist_state(&groups)?;
        Ok(())
    }

    /// Sweeps every group's consumers for heartbeat expiry against each
    /// consumer's own `session.timeout.ms`, running the same stop→stopped
    /// handshake as an explicit removal before rebalancing groups that
    /// lost a member.
    pub async fn expire_stale_consumers(&self) {
        let mut pending: Vec<(String, String, std::sync::Arc<tokio::sync::Notify>)> = Vec::new();
        {
            let mut groups = self.groups.write().await;
            for (group_name, group) in groups.iter_mut() {
                for id in group.expired_consumer_ids() {
                    if let Ok(stopped) = group.request_removal(&id) {
                        pending.push((group_name.clone(), id, stopped));
                    }
                }
            }
        }
        if pending.is_empty() {
            return;
        }

        // Waited unlocked, one at a time: a mass expiry is rare, and
        // keeping this simple avoids pulling in a join-all dependency for
        // a sweep that isn't on any hot path.
        for (_, _, stopped) in &pending {
            let _ = tokio::time::timeout(CONSUMER_STOP_TIMEOUT, stopped.notified()).await;
        }

        let mut groups = self.groups.write().await;
        let mut changed_groups = std::collections::BTreeSet::new();
        for (group_name, id, _) in &pending {
            if let Some(group) = groups.get_mut(group_name) {
                group.finalize_removal(id);
                changed_groups.insert(group_name.clone());
            }
        }
        for group_name in &changed_groups {
            if let Some(group) = groups.get_mut(group_name) {
                group.rebalance(self.num_partitions());
            }
        }
        let _ = self.persist_state(&groups);
    }

    fn persist_state(&self, groups: &BTreeMap<String, ConsumerGroup>) -> Result<(), CoreError> {
        let state = TopicState {
            groups: groups
                .values()
                .map(|g| GroupState {
                    name: g.name().to_string(),
                    offsets: g.offsets(),
                })
                .collect(),
        };
        let bytes = serde_json::to_vec_pretty(&state).expect("TopicState always serializes");
        std::fs::write(state_path(&self.base_path, &self.name), bytes)?;
        Ok(())
    }
}

fn list_segment_base_offsets(partition_path: &Path) -> std::io::Result<Vec<u64>> {
    let mut offsets = Vec::new();
    for entry in std::fs::read_dir(partition_path)? {
        let entry = entry?;
        let file_name = entry.file_name();
        let file_name = file_name.to_string_lossy();
        if let Some(stem) = file_name.strip_suffix(".log") {
            if let Ok(base_offset) = stem.parse::<u64>() {
                offsets.push(base_offset);
            }
        }
    }
    Ok(offsets)
}

fn load_state(path: &Path) -> Option<TopicState> {
    let bytes = std::fs::read(path).ok()?;
    serde_json::from_slice(&bytes).ok()
}

fn now_unix_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn create_then_produce_and_consume_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let topic = Topic::create(dir.path(), "events", TopicOptions::default().with_num_partitions(2))
            .await
            .unwrap();

        let (partition, offset) = topic.produce(b"k".to_vec(), b"v".to_vec(), None).await.unwrap();
        let record = topic.consume(partition, offset).await.unwrap();
        assert_eq!(record.payload, b"v");
    }

    #[tokio::test]
    async fn create_twice_fails_with_already_exists() {
        let dir = tempfile::tempdir().unwrap();
        Topic::create(dir.path(), "events", TopicOptions::default())
            .await
            .unwrap();
        let err = Topic::create(dir.path(), "events", TopicOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::TopicAlreadyExists));
    }

    #[tokio::test]
    async fn load_recovers_produced_data() {
        let dir = tempfile::tempdir().unwrap();
        {
            let topic = Topic::create(dir.path(), "events", TopicOptions::default().with_num_partitions(1))
                .await
                .unwrap();
            topic.produce(Vec::new(), b"v0".to_vec(), None).await.unwrap();
            topic.produce(Vec::new(), b"v1".to_vec(), None).await.unwrap();
        }

        let loaded = Topic::load(dir.path(), "events").await.unwrap();
        assert_eq!(loaded.partition_next_offset(0).await, Some(2));
        let record = loaded.consume(0, 1).await.unwrap();
        assert_eq!(record.payload, b"v1");
    }

    #[tokio::test]
    async fn create_consumer_assigns_all_partitions_to_sole_member() {
        let dir = tempfile::tempdir().unwrap();
        let topic = Topic::create(dir.path(), "events", TopicOptions::default().with_num_partitions(4))
            .await
            .unwrap();

        let assigned = topic.create_consumer("g1", "c1", ConsumerOptions::default()).await.unwrap();
        assert_eq!(assigned.len(), 4);
    }

    #[tokio::test]
    async fn commit_offset_rejects_regression() {
        let dir = tempfile::tempdir().unwrap();
        let topic = Topic::create(dir.path(), "events", TopicOptions::default())
            .await
            .unwrap();
        topic.create_consumer("g1", "c1", ConsumerOptions::default()).await.unwrap();

        topic.commit_offset("g1", 0, 10).await.unwrap();
        let err = topic.commit_offset("g1", 0, 5).await.unwrap_err();
        assert!(matches!(err, CoreError::OffsetRegression { .. }));
    }
}
