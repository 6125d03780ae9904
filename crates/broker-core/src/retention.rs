use crate::broker::Broker;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::watch;

fn now_unix_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Runs the retention sweep once across every topic.
pub async fn run_retention_sweep(broker: &Broker) {
    tracing::info!("started retention check");
    let now = now_unix_secs();
    for topic in broker.all_topics().await {
        topic.run_retention_sweep(now).await;
    }
    tracing::info!("retention check done for all topics");
}

/// Spawns the periodic retention sweep on `log.retention.check.interval.ms`,
/// running one check immediately. Exits once `shutdown` fires, so the task
/// can be joined on graceful shutdown.
pub fn spawn_retention_sweeper(
    broker: Arc<Broker>,
    interval_ms: i64,
    mut shutdown: watch::Receiver<bool>,
) -> tokio::task::JoinHandle<()> {
    let interval = Duration::from_millis(interval_ms.max(0) as u64);
    tokio::spawn(async move {
        loop {
            run_retention_sweep(&broker).await;
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = shutdown.changed() => break,
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use broker_config::{BrokerOptions, TopicOptions};

    #[tokio::test]
    async fn sweep_deletes_expired_segments_but_keeps_the_last() {
        let dir = tempfile::tempdir().unwrap();
        let broker = Broker::new(BrokerOptions::default().with_base_path(dir.path().to_str().unwrap()))
            .await
            .unwrap();
        let topic = broker
            .create_topic(
                "events",
                TopicOptions::default()
                    .with_num_partitions(1)
                    .with_segment_bytes(30)
                    .with_retention_ms(0),
            )
            .await
            .unwrap();

        topic.produce(Vec::new(), b"v0".to_vec(), None).await.unwrap();
        topic.produce(Vec::new(), b"v1".to_vec(), None).await.unwrap();

        run_retention_sweep(&broker).await;

        let sizes = topic.partition_sizes().await;
        assert!(sizes[0] > 0, "the active segment must survive the sweep");
    }
}
