use crate::broker::Broker;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Sweeps every topic's groups once, evicting any consumer whose last
/// heartbeat is older than its own `session.timeout.ms` and rebalancing
/// groups that lost a member. All consumers of all groups are swept from a
/// single periodic task, which is equivalent to a per-consumer watchdog as
/// long as `check_interval` is well under any configured session timeout.
pub async fn run_heartbeat_sweep(broker: &Broker) {
    for topic in broker.all_topics().await {
        topic.expire_stale_consumers().await;
    }
}

/// Spawns the periodic heartbeat-expiry sweep, exiting once `shutdown`
/// fires (mirrors `retention::spawn_retention_sweeper`'s shutdown handling).
pub fn spawn_heartbeat_sweeper(
    broker: Arc<Broker>,
    check_interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = tokio::time::sleep(check_interval) => {
                    run_heartbeat_sweep(&broker).await;
                }
                _ = shutdown.changed() => break,
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use broker_config::{BrokerOptions, ConsumerOptions, TopicOptions};

    #[tokio::test]
    async fn sweep_evicts_consumer_past_session_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let broker = Broker::new(BrokerOptions::default().with_base_path(dir.path().to_str().unwrap()))
            .await
            .unwrap();
        let topic = broker
            .create_topic("events", TopicOptions::default().with_num_partitions(2))
            .await
            .unwrap();

        // A zero session timeout evicts the consumer on the very first
        // sweep, regardless of when it last heartbeat.
        topic
            .create_consumer("g1", "c1", ConsumerOptions::default().with_session_timeout_ms(0))
            .await
            .unwrap();

        run_heartbeat_sweep(&broker).await;

        assert!(topic.get_group_snapshot("g1").await.unwrap().0.is_empty());
    }
}
