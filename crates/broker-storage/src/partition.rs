use crate::error::{PartitionError, SegmentError};
use crate::segment::Segment;
use broker_protocol::Record;
use std::path::{Path, PathBuf};
use tokio::sync::watch;
use tokio::task;

/// One partition's on-disk segments plus the in-memory index needed to
/// locate them.
///
/// Segments are kept in ascending `base_offset` order. Only the last
/// segment ever accepts appends; once it caps out a new one is opened.
pub struct Partition {
    topic: String,
    id: u32,
    base_path: PathBuf,
    segment_bytes: i64,
    max_message_bytes: i64,
    segments: Vec<Segment>,
    produced_tx: watch::Sender<u64>,
}

async fn create_dir_all(dir: PathBuf) -> Result<(), SegmentError> {
    task::spawn_blocking(move || std::fs::create_dir_all(dir))
        .await
        .expect("blocking mkdir task panicked")
        .map_err(SegmentError::Io)
}

impl Partition {
    /// Creates a brand new partition starting at offset 0, creating its
    /// directory (`<base_path>/<topic>/<id>/`) if needed.
    pub async fn create(
        base_path: &Path,
        topic: &str,
        id: u32,
        segment_bytes: i64,
        max_message_bytes: i64,
    ) -> Result<Partition, PartitionError> {
        create_dir_all(base_path.join(topic).join(id.to_string())).await?;
        let segment = Segment::open(base_path, topic, id, 0, segment_bytes).await?;
        let (produced_tx, _rx) = watch::channel(segment.next_offset());

        Ok(Partition {
            topic: topic.to_string(),
            id,
            base_path: base_path.to_path_buf(),
            segment_bytes,
            max_message_bytes,
            segments: vec![segment],
            produced_tx,
        })
    }

    /// Reopens a partition whose segment files already exist on disk, in
    /// ascending `base_offset` order.
    pub async fn load(
        base_path: &Path,
        topic: &str,
        id: u32,
        mut base_offsets: Vec<u64>,
        segment_bytes: i64,
        max_message_bytes: i64,
    ) -> Result<Partition, PartitionError> {
        create_dir_all(base_path.join(topic).join(id.to_string())).await?;

        base_offsets.sort_unstable();
        if base_offsets.is_empty() {
            base_offsets.push(0);
        }

        let mut segments = Vec::with_capacity(base_offsets.len());
        for base_offset in &base_offsets {
            segments.push(Segment::load(base_path, topic, id, *base_offset, segment_bytes).await?);
        }
        for segment in segments.iter_mut().rev().skip(1) {
            segment.cap();
        }

        let next_offset = segments.last().expect("at least one segment").next_offset();
        let (produced_tx, _rx) = watch::channel(next_offset);

        Ok(Partition {
            topic: topic.to_string(),
            id,
            base_path: base_path.to_path_buf(),
            segment_bytes,
            max_message_bytes,
            segments,
            produced_tx,
        })
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn next_offset(&self) -> u64 {
        self.active().next_offset()
    }

    /// Total bytes across every segment on disk, used by the retention
    /// sweep's size-based trigger.
    pub fn size(&self) -> u64 {
        self.segments.iter().map(Segment::current_size).sum()
    }

    /// Subscribes to this partition's produced-offset watch, used by the
    /// consume loop to wake up without polling.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.produced_tx.subscribe()
    }

    fn active(&self) -> &Segment {
        self.segments.last().expect("partition always has a segment")
    }

    fn active_mut(&mut self) -> &mut Segment {
        self.segments.last_mut().expect("partition always has a segment")
    }

    /// Appends one record, rolling to a new segment first if the active one
    /// is capped or would overflow.
    pub async fn push(&mut self, key: Vec<u8>, payload: Vec<u8>, timestamp: u64) -> Result<u64, PartitionError> {
        let record = Record::new(timestamp, key, payload);
        if record.encoded_len() as i64 > self.max_message_bytes {
            return Err(PartitionError::MessageTooLarge);
        }
        let blob = record.serialize().to_vec();

        let offset = match self.active_mut().append_blob(blob.clone()).await {
            Ok(offset) => offset,
            Err(SegmentError::MaxSizeReached) => {
                self.roll_segment().await?;
                self.active_mut().append_blob(blob).await?
            }
            Err(e) => return Err(e.into()),
        };

        self.produced_tx.send_replace(offset + 1);
        Ok(offset)
    }

    async fn roll_segment(&mut self) -> Result<(), PartitionError> {
        self.active_mut().cap();
        let next_base = self.active().next_offset();
        let segment = Segment::open(&self.base_path, &self.topic, self.id, next_base, self.segment_bytes).await?;
        self.segments.push(segment);
        Ok(())
    }

    /// Reads the record at `offset`, searching segments via binary search on
    /// `base_offset`. An `offset` preceding the first surviving segment
    /// (retention has already evicted it) is clamped up to that segment's
    /// `base_offset` rather than erroring, so a consumer that fell behind
    /// retention gets repositioned to the earliest available record instead
    /// of a permanent not-found.
    pub async fn consume(&mut self, offset: u64) -> Result<Record, PartitionError> {
        let offset = self.clamp_to_oldest(offset);
        let idx = self.locate_segment(offset)?;
        Ok(self.segments[idx].get_message(offset).await?)
    }

    fn clamp_to_oldest(&self, offset: u64) -> u64 {
        match self.segments.first() {
            Some(oldest) if offset < oldest.base_offset() => oldest.base_offset(),
            _ => offset,
        }
    }

    /// Returns the index of the segment that could contain `offset`: the
    /// last segment whose `base_offset <= offset`. Ties (an exact
    /// `base_offset` match) resolve to that segment. Callers must clamp
    /// `offset` to `segments[0].base_offset()` first; an `offset` that still
    /// precedes every segment falls back to the oldest segment rather than
    /// erroring.
    fn locate_segment(&self, offset: u64) -> Result<usize, PartitionError> {
        if self.segments.is_empty() {
            return Err(SegmentError::Eof.into());
        }

        let mut lo = 0i64;
        let mut hi = self.segments.len() as i64 - 1;
        let mut best: Option<usize> = None;

        while lo <= hi {
            let mid = lo + (hi - lo) / 2;
            let base_offset = self.segments[mid as usize].base_offset();

            match base_offset.cmp(&offset) {
                std::cmp::Ordering::Equal => return Ok(mid as usize),
                std::cmp::Ordering::Less => {
                    best = Some(mid as usize);
                    lo = mid + 1;
                }
                std::cmp::Ordering::Greater => hi = mid - 1,
            }
        }

        Ok(best.unwrap_or(0))
    }

    /// Drops the oldest segment from the in-memory index and removes its
    /// file, unless it is the only segment left. The retention sweep must
    /// never delete a partition's append target.
    pub async fn delete_oldest_segment(&mut self) -> Result<bool, PartitionError> {
        if self.segments.len() <= 1 {
            return Ok(false);
        }
        let segment = self.segments.remove(0);
        segment.delete().await?;
        Ok(true)
    }

    /// Base offsets and last-append timestamps of every segment but the
    /// active one, for the retention sweep to evaluate (oldest first).
    pub fn retirable_segments(&self) -> Vec<(u64, u64)> {
        self.segments[..self.segments.len().saturating_sub(1)]
            .iter()
            .map(|s| (s.base_offset(), s.last_append_unix_secs()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn push_then_consume_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("t").join("0")).unwrap();
        let mut part = Partition::create(dir.path(), "t", 0, 4096, 1024).await.unwrap();

        let offset = part.push(b"k".to_vec(), b"v".to_vec(), 1).await.unwrap();
        assert_eq!(offset, 0);

        let record = part.consume(0).await.unwrap();
        assert_eq!(record.payload, b"v");
    }

    #[tokio::test]
    async fn push_rolls_segment_when_capped() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("t").join("0")).unwrap();
        // Each record is 24 + 1 + 1 = 26 bytes; cap the segment at 30 so the
        // second push must roll to a new segment.
        let mut part = Partition::create(dir.path(), "t", 0, 30, 1024).await.unwrap();

        let o0 = part.push(b"k".to_vec(), b"v".to_vec(), 1).await.unwrap();
        let o1 = part.push(b"k".to_vec(), b"v".to_vec(), 2).await.unwrap();
        assert_eq!(o0, 0);
        assert_eq!(o1, 1);
        assert_eq!(part.segments.len(), 2);

        assert_eq!(part.consume(0).await.unwrap().timestamp, 1);
        assert_eq!(part.consume(1).await.unwrap().timestamp, 2);
    }

    #[tokio::test]
    async fn push_rejects_oversized_message() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("t").join("0")).unwrap();
        let mut part = Partition::create(dir.path(), "t", 0, 4096, 10).await.unwrap();

        let err = part
            .push(Vec::new(), b"this-payload-is-too-long".to_vec(), 1)
            .await
            .unwrap_err();
        assert!(matches!(err, PartitionError::MessageTooLarge));
    }

    #[tokio::test]
    async fn delete_oldest_segment_keeps_the_last_one() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("t").join("0")).unwrap();
        let mut part = Partition::create(dir.path(), "t", 0, 30, 1024).await.unwrap();
        part.push(b"k".to_vec(), b"v".to_vec(), 1).await.unwrap();
        part.push(b"k".to_vec(), b"v".to_vec(), 2).await.unwrap();
        assert_eq!(part.segments.len(), 2);

        assert!(part.delete_oldest_segment().await.unwrap());
        assert_eq!(part.segments.len(), 1);
        assert!(!part.delete_oldest_segment().await.unwrap());
        assert_eq!(part.segments.len(), 1);
    }

    #[tokio::test]
    async fn consume_clamps_to_the_oldest_surviving_segment() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("t").join("0")).unwrap();
        let mut part = Partition::create(dir.path(), "t", 0, 30, 1024).await.unwrap();
        part.push(b"k".to_vec(), b"v0".to_vec(), 1).await.unwrap();
        part.push(b"k".to_vec(), b"v1".to_vec(), 2).await.unwrap();
        assert_eq!(part.segments.len(), 2);

        assert!(part.delete_oldest_segment().await.unwrap());

        // Offset 0 was on the segment retention just deleted; consume must
        // clamp forward to the oldest surviving record instead of erroring.
        let record = part.consume(0).await.unwrap();
        assert_eq!(record.payload, b"v1");
    }

    #[tokio::test]
    async fn subscribe_observes_pushes() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("t").join("0")).unwrap();
        let mut part = Partition::create(dir.path(), "t", 0, 4096, 1024).await.unwrap();
        let rx = part.subscribe();
        assert_eq!(*rx.borrow(), 0);

        part.push(Vec::new(), b"v".to_vec(), 1).await.unwrap();
        assert_eq!(*rx.borrow(), 1);
    }
}
