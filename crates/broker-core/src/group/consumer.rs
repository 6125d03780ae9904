use broker_config::ConsumerOptions;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

pub(super) fn now_unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// One member of a `ConsumerGroup`. Partition assignment is tracked here
/// purely as data; the server layer owns and drives the actual consume
/// loop, synchronizing with it through `stop`/`stopped`.
#[derive(Debug, Clone)]
pub struct Consumer {
    pub(super) id: String,
    pub(super) partitions: Vec<u32>,
    pub(super) options: ConsumerOptions,
    pub(super) last_heartbeat_unix_millis: u64,
    /// Set by `request_removal`, ahead of the consumer's physical removal
    /// from the group, so `member_partitions` can report "gone" in time
    /// for the push loop to notice and stop before the handshake's
    /// bounded wait elapses.
    pub(super) pending_removal: bool,
    /// Guards against a second push loop attaching to the same consumer
    /// id while one is already running.
    pub(super) started: bool,
    pub(super) current_correlation_id: Option<i32>,
    /// Cancelled to wake a blocked push loop immediately, either because
    /// the group rebalanced (a fresh token is armed right after) or
    /// because this consumer is being removed (`pending_removal` is set
    /// first, so the loop sees `None` on its next assignment check).
    pub(super) stop: CancellationToken,
    /// Notified once by the push loop after it has drained and exited,
    /// acknowledging a removal's stop signal.
    pub(super) stopped: Arc<Notify>,
}

impl Consumer {
    pub(super) fn new(id: String, options: ConsumerOptions) -> Self {
        Consumer {
            id,
            partitions: Vec::new(),
            options,
            last_heartbeat_unix_millis: now_unix_millis(),
            pending_removal: false,
            started: false,
            current_correlation_id: None,
            stop: CancellationToken::new(),
            stopped: Arc::new(Notify::new()),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn assigned_partitions(&self) -> &[u32] {
        &self.partitions
    }

    pub fn from_beginning(&self) -> bool {
        self.options.from_beginning
    }

    pub fn options(&self) -> ConsumerOptions {
        self.options
    }
}

/// Read-only view of a consumer handed out across the `ConsumerGroup`
/// lock for the `get_group` wire response.
#[derive(Debug, Clone)]
pub struct ConsumerSnapshot {
    pub id: String,
    pub assigned_partitions: Vec<u32>,
}
