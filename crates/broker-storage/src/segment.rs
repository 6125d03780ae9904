use crate::error::SegmentError;
use broker_protocol::Record;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::task;

/// An append-only log file holding a contiguous range of a partition's
/// records. No external index is kept; reads scan the file record by
/// record. All file I/O runs on a blocking-pool thread via
/// `tokio::task::spawn_blocking`, since `std::fs::File` has no async API.
pub struct Segment {
    base_offset: u64,
    next_offset: u64,
    current_size: u64,
    max_size: i64,
    capped: bool,
    file: File,
    path: PathBuf,
    last_append_unix_secs: u64,
}

fn segment_path(base_path: &Path, topic: &str, partition: u32, base_offset: u64) -> PathBuf {
    base_path
        .join(topic)
        .join(partition.to_string())
        .join(format!("{base_offset}.log"))
}

fn now_unix_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Unwraps a `spawn_blocking` join result. A blocking task only fails by
/// panicking, which indicates a bug in the closure, not a recoverable I/O
/// condition.
fn join<T>(result: Result<T, task::JoinError>) -> T {
    result.expect("blocking segment task panicked")
}

impl Segment {
    /// Opens (creating if absent) `<base_path>/<topic>/<partition>/<base_offset>.log`
    /// in read+append mode. Returns a fresh segment positioned at `base_offset`.
    pub async fn open(
        base_path: &Path,
        topic: &str,
        partition: u32,
        base_offset: u64,
        max_size: i64,
    ) -> Result<Segment, SegmentError> {
        let path = segment_path(base_path, topic, partition, base_offset);
        let open_path = path.clone();
        let file = join(
            task::spawn_blocking(move || {
                OpenOptions::new()
                    .read(true)
                    .append(true)
                    .create(true)
                    .open(&open_path)
            })
            .await,
        )?;

        tracing::debug!(topic, partition, base_offset, path = %path.display(), "opened segment");

        Ok(Segment {
            base_offset,
            next_offset: base_offset,
            current_size: 0,
            max_size,
            capped: false,
            file,
            path,
            last_append_unix_secs: now_unix_secs(),
        })
    }

    /// Opens an existing segment file and recovers `base_offset`/`next_offset`
    /// by scanning its contents.
    pub async fn load(
        base_path: &Path,
        topic: &str,
        partition: u32,
        base_offset: u64,
        max_size: i64,
    ) -> Result<Segment, SegmentError> {
        let mut segment = Segment::open(base_path, topic, partition, base_offset, max_size).await?;
        segment.recover().await?;

        let meta_path = segment.path.clone();
        let modified = join(task::spawn_blocking(move || {
            std::fs::metadata(&meta_path).and_then(|m| m.modified())
        })
        .await);
        if let Ok(modified) = modified {
            segment.last_append_unix_secs = modified
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs();
        }

        tracing::debug!(
            base_offset = segment.base_offset,
            next_offset = segment.next_offset,
            "recovered segment"
        );
        Ok(segment)
    }

    async fn recover(&mut self) -> Result<(), SegmentError> {
        let mut file = self.file.try_clone()?;
        let fallback_base_offset = self.base_offset;

        let (base_offset, next_offset, current_size) = join(task::spawn_blocking(
            move || -> Result<(u64, u64, u64), SegmentError> {
                file.seek(SeekFrom::Start(0))?;
                let mut pos: u64 = 0;
                let mut first_offset: Option<u64> = None;
                let mut last_next_offset = fallback_base_offset;

                loop {
                    let mut header = [0u8; 12];
                    match file.read_exact(&mut header) {
                        Ok(()) => {}
                        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
                        Err(e) => return Err(e.into()),
                    }

                    let total_size = Record::peek_total_size(&header[0..4].try_into().unwrap());
                    let offset = Record::peek_offset(&header[4..12].try_into().unwrap());

                    if first_offset.is_none() {
                        first_offset = Some(offset);
                    }
                    last_next_offset = offset + 1;

                    pos += total_size as u64;
                    file.seek(SeekFrom::Start(pos))?;
                }

                Ok((first_offset.unwrap_or(fallback_base_offset), last_next_offset, pos))
            },
        )
        .await)?;

        self.base_offset = base_offset;
        self.next_offset = next_offset;
        self.current_size = current_size;
        Ok(())
    }

    pub fn base_offset(&self) -> u64 {
        self.base_offset
    }

    pub fn next_offset(&self) -> u64 {
        self.next_offset
    }

    pub fn current_size(&self) -> u64 {
        self.current_size
    }

    pub fn capped(&self) -> bool {
        self.capped
    }

    pub fn cap(&mut self) {
        self.capped = true;
    }

    pub fn last_append_unix_secs(&self) -> u64 {
        self.last_append_unix_secs
    }

    /// Appends an already-serialized record blob, overwriting its offset
    /// field with this segment's `next_offset`. Returns the assigned offset,
    /// or `SegmentError::MaxSizeReached` (a sentinel, not fatal) if the
    /// segment has no room.
    pub async fn append_blob(&mut self, mut blob: Vec<u8>) -> Result<u64, SegmentError> {
        if self.current_size as i64 + blob.len() as i64 > self.max_size {
            return Err(SegmentError::MaxSizeReached);
        }

        let offset = self.next_offset;
        Record::patch_offset(&mut blob, offset);
        let blob_len = blob.len() as u64;

        let mut file = self.file.try_clone()?;
        join(
            task::spawn_blocking(move || -> std::io::Result<()> {
                file.write_all(&blob)?;
                file.flush()
            })
            .await,
        )?;

        self.current_size += blob_len;
        self.next_offset += 1;
        self.last_append_unix_secs = now_unix_secs();
        tracing::trace!(base_offset = self.base_offset, offset, size = blob_len, "appended record");

        Ok(offset)
    }

    /// Sequentially scans from the start of the file looking for `offset`.
    /// Returns `SegmentError::Eof` once past the last record.
    pub async fn get_message(&mut self, offset: u64) -> Result<Record, SegmentError> {
        let mut file = self.file.try_clone()?;
        join(task::spawn_blocking(move || -> Result<Record, SegmentError> {
            file.seek(SeekFrom::Start(0))?;
            let mut pos: u64 = 0;

            loop {
                let mut header = [0u8; 12];
                match file.read_exact(&mut header) {
                    Ok(()) => {}
                    Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                        return Err(SegmentError::Eof)
                    }
                    Err(e) => return Err(e.into()),
                }

                let total_size = Record::peek_total_size(&header[0..4].try_into().unwrap());
                let record_offset = Record::peek_offset(&header[4..12].try_into().unwrap());

                if record_offset == offset {
                    let mut blob = vec![0u8; total_size as usize];
                    file.seek(SeekFrom::Start(pos))?;
                    file.read_exact(&mut blob)?;
                    return Ok(Record::deserialize(&blob)?);
                }

                pos += total_size as u64;
                file.seek(SeekFrom::Start(pos))?;
            }
        })
        .await)
    }

    /// Closes the file descriptor and removes the segment's file from disk.
    pub async fn delete(self) -> Result<(), SegmentError> {
        let path = self.path.clone();
        let file = self.file;
        tracing::info!(base_offset = self.base_offset, path = %path.display(), "deleting segment file");
        join(
            task::spawn_blocking(move || {
                drop(file);
                std::fs::remove_file(path)
            })
            .await,
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mkdirs(dir: &Path, topic: &str, partition: u32) {
        std::fs::create_dir_all(dir.join(topic).join(partition.to_string())).unwrap();
    }

    #[tokio::test]
    async fn append_and_read_back() {
        let dir = tempfile::tempdir().unwrap();
        mkdirs(dir.path(), "t", 0);
        let mut seg = Segment::open(dir.path(), "t", 0, 0, 1024).await.unwrap();

        let rec = Record::new(1, b"k".to_vec(), b"v".to_vec());
        let offset = seg.append_blob(rec.serialize().to_vec()).await.unwrap();
        assert_eq!(offset, 0);
        assert_eq!(seg.next_offset(), 1);

        let got = seg.get_message(0).await.unwrap();
        assert_eq!(got.key, b"k");
        assert_eq!(got.payload, b"v");
        assert_eq!(got.offset, 0);
    }

    #[tokio::test]
    async fn get_message_past_end_is_eof() {
        let dir = tempfile::tempdir().unwrap();
        mkdirs(dir.path(), "t", 0);
        let mut seg = Segment::open(dir.path(), "t", 0, 0, 1024).await.unwrap();
        let rec = Record::new(1, Vec::new(), b"v".to_vec());
        seg.append_blob(rec.serialize().to_vec()).await.unwrap();

        let err = seg.get_message(5).await.unwrap_err();
        assert!(err.is_eof());
    }

    #[tokio::test]
    async fn append_blob_reports_max_size_reached() {
        let dir = tempfile::tempdir().unwrap();
        mkdirs(dir.path(), "t", 0);
        let mut seg = Segment::open(dir.path(), "t", 0, 0, 10).await.unwrap();
        let rec = Record::new(1, Vec::new(), b"this-is-too-long".to_vec());

        let err = seg.append_blob(rec.serialize().to_vec()).await.unwrap_err();
        assert!(err.is_max_size_reached());
    }

    #[tokio::test]
    async fn load_recovers_offsets_from_an_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        mkdirs(dir.path(), "t", 0);
        {
            let mut seg = Segment::open(dir.path(), "t", 0, 0, 1024).await.unwrap();
            for i in 0..3u64 {
                let rec = Record::new(i, Vec::new(), format!("v{i}").into_bytes());
                seg.append_blob(rec.serialize().to_vec()).await.unwrap();
            }
        }

        let loaded = Segment::load(dir.path(), "t", 0, 0, 1024).await.unwrap();
        assert_eq!(loaded.base_offset(), 0);
        assert_eq!(loaded.next_offset(), 3);
    }

    #[tokio::test]
    async fn delete_removes_the_file() {
        let dir = tempfile::tempdir().unwrap();
        mkdirs(dir.path(), "t", 0);
        let seg = Segment::open(dir.path(), "t", 0, 0, 1024).await.unwrap();
        let path = seg.path.clone();
        assert!(path.exists());
        seg.delete().await.unwrap();
        assert!(!path.exists());
    }
}
