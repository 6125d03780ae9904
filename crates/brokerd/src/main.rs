//! `brokerd` entry point: the `server` subcommand and the thin client
//! subcommands (`produce`, `consume`, `commit`, `topic`, `consumer`,
//! `group`). Installs logging, parses CLI args, and for `server` runs
//! under `#[tokio::main]` until `tokio::signal::ctrl_c` fires; the client
//! subcommands are one-shot request/response round trips, observable only
//! through their exit code and stdout.

mod cli;
mod client;
mod logging;

use broker_config::{BrokerOptions, ConsumerOptions, TopicOptions};
use broker_core::{heartbeat, retention, Broker};
use broker_protocol::{payload::*, Command};
use clap::Parser;
use client::BrokerConnection;
use cli::{Cli, ConsumerAction, GroupAction, TopicAction};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::install();
    let cli = Cli::parse();

    match cli.command {
        cli::Command::Server {
            base_path,
            config_file,
            port,
            retention_check_interval_ms,
            max_connections,
            idle_session_timeout,
            heartbeat_check_interval_ms,
        } => {
            run_server(
                base_path,
                config_file,
                port,
                retention_check_interval_ms,
                max_connections,
                idle_session_timeout,
                heartbeat_check_interval_ms,
            )
            .await
        }
        cli::Command::Produce { addr, topic, key, payload, timestamp, timeout_ms } => {
            run_produce(addr, topic, key, payload, timestamp, timeout_ms).await
        }
        cli::Command::Consume {
            addr,
            topic,
            group,
            id,
            from_beginning,
            session_timeout_ms,
            heartbeat_interval_ms,
            auto_commit_interval_ms,
            enable_auto_commit,
        } => {
            let options = ConsumerOptions {
                session_timeout_ms,
                heartbeat_interval_ms,
                auto_commit_interval_ms,
                enable_auto_commit,
                from_beginning,
            };
            run_consume(addr, topic, group, id, options).await
        }
        cli::Command::Commit { addr, topic, group, partition, offset } => {
            run_commit(addr, topic, group, partition, offset).await
        }
        cli::Command::Topic { action } => run_topic(action).await,
        cli::Command::Consumer { action } => run_consumer(action).await,
        cli::Command::Group { action } => run_group(action).await,
    }
}

async fn run_server(
    base_path: std::path::PathBuf,
    config_file: Option<std::path::PathBuf>,
    port: u16,
    retention_check_interval_ms: i64,
    max_connections: usize,
    idle_session_timeout: Duration,
    heartbeat_check_interval_ms: i64,
) -> anyhow::Result<()> {
    let mut options = BrokerOptions {
        base_path: base_path.to_string_lossy().into_owned(),
        log_retention_check_interval_ms: retention_check_interval_ms,
    };
    if let Some(path) = config_file {
        options = options.merged_with(&BrokerOptions::load_yaml(&path)?);
    }

    let broker = Arc::new(Broker::new(options.clone()).await?);
    let addr: std::net::SocketAddr = format!("0.0.0.0:{port}").parse()?;

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let cancel = CancellationToken::new();

    let retention_handle = retention::spawn_retention_sweeper(
        broker.clone(),
        options.log_retention_check_interval_ms,
        shutdown_rx.clone(),
    );
    let heartbeat_handle = heartbeat::spawn_heartbeat_sweeper(
        broker.clone(),
        Duration::from_millis(heartbeat_check_interval_ms.max(100) as u64),
        shutdown_rx,
    );

    let server_cancel = cancel.clone();
    let server_handle = tokio::spawn(broker_server::run(broker, addr, max_connections, idle_session_timeout, server_cancel));

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutdown requested, stopping broker");
    cancel.cancel();
    let _ = shutdown_tx.send(true);

    server_handle.await??;
    let _ = retention_handle.await;
    let _ = heartbeat_handle.await;
    Ok(())
}

async fn run_produce(
    addr: String,
    topic: String,
    key: String,
    payload: String,
    timestamp: Option<u64>,
    timeout_ms: u64,
) -> anyhow::Result<()> {
    let mut conn = BrokerConnection::connect(&addr).await?;
    let resp: ProduceResponse = conn
        .call(
            Command::Produce,
            &ProduceRequest {
                topic,
                messages: vec![ProduceMessage { key: key.into_bytes(), value: payload.into_bytes(), timestamp }],
                timeout_ms,
            },
        )
        .await?;

    if resp.error.error_code != 0 {
        anyhow::bail!(resp.error.error_message.unwrap_or_else(|| "produce failed".into()));
    }
    for offset in resp.offsets {
        println!("{offset}");
    }
    Ok(())
}

async fn run_consume(
    addr: String,
    topic: String,
    group: String,
    id: Option<String>,
    options: ConsumerOptions,
) -> anyhow::Result<()> {
    let id = id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    let mut conn = BrokerConnection::connect(&addr).await?;
    let req = ConsumeRequest {
        id: id.clone(),
        topic: topic.clone(),
        group: group.clone(),
        from_beginning: options.from_beginning,
        consumer_options: options,
    };

    let committed: Arc<tokio::sync::Mutex<std::collections::HashMap<u32, u64>>> =
        Arc::new(tokio::sync::Mutex::new(std::collections::HashMap::new()));
    let background = run_consumer_background_tasks(addr, topic, group, id, options, committed.clone()).await?;

    let result = conn
        .consume_stream(&req, |resp: ConsumeResponse| {
            if resp.error.error_code != 0 {
                anyhow::bail!(resp.error.error_message.unwrap_or_else(|| "consume failed".into()));
            }
            if let Some(message) = resp.message {
                if let Ok(mut committed) = committed.try_lock() {
                    committed.insert(message.partition, message.offset);
                }
                println!("{}", serde_json::to_string(&message)?);
            }
            Ok(true)
        })
        .await;

    background.abort();
    result
}

/// Spawns the periodic heartbeat (and, if enabled, auto-commit) task a
/// live consume session needs to stay a member of its group: the broker
/// evicts a consumer whose heartbeat goes stale past its own
/// `session.timeout.ms`, so a push-only stream with nothing driving this
/// would get silently dropped.
async fn run_consumer_background_tasks(
    addr: String,
    topic: String,
    group: String,
    consumer_id: String,
    options: ConsumerOptions,
    committed: Arc<tokio::sync::Mutex<std::collections::HashMap<u32, u64>>>,
) -> anyhow::Result<tokio::task::JoinHandle<()>> {
    let mut conn = BrokerConnection::connect(&addr).await?;
    let heartbeat_interval = Duration::from_millis(options.heartbeat_interval_ms.max(100) as u64);
    let auto_commit_interval = Duration::from_millis(options.auto_commit_interval_ms.max(100) as u64);
    let enable_auto_commit = options.enable_auto_commit;

    Ok(tokio::spawn(async move {
        let mut heartbeat_tick = tokio::time::interval(heartbeat_interval);
        let mut auto_commit_tick = tokio::time::interval(auto_commit_interval);
        loop {
            tokio::select! {
                _ = heartbeat_tick.tick() => {
                    let req = HeartbeatRequest { topic: topic.clone(), group: group.clone(), consumer_id: consumer_id.clone() };
                    if conn.call::<_, HeartbeatResponse>(Command::Heartbeat, &req).await.is_err() {
                        return;
                    }
                }
                _ = auto_commit_tick.tick(), if enable_auto_commit => {
                    let offsets: Vec<(u32, u64)> = committed.lock().await.iter().map(|(&p, &o)| (p, o)).collect();
                    for (partition, offset) in offsets {
                        let req = CommitOffsetRequest { topic: topic.clone(), group: group.clone(), partition, offset };
                        if conn.call::<_, CommitOffsetResponse>(Command::CommitOffset, &req).await.is_err() {
                            return;
                        }
                    }
                }
            }
        }
    }))
}

async fn run_commit(addr: String, topic: String, group: String, partition: u32, offset: u64) -> anyhow::Result<()> {
    let mut conn = BrokerConnection::connect(&addr).await?;
    let resp: CommitOffsetResponse = conn
        .call(Command::CommitOffset, &CommitOffsetRequest { topic, group, partition, offset })
        .await?;
    if resp.error.error_code != 0 {
        anyhow::bail!(resp.error.error_message.unwrap_or_else(|| "commit failed".into()));
    }
    Ok(())
}

async fn run_topic(action: TopicAction) -> anyhow::Result<()> {
    match action {
        TopicAction::Add { addr, name, num_partitions, retention_ms, retention_bytes, segment_bytes, max_message_bytes } => {
            let mut options = TopicOptions::default();
            if let Some(n) = num_partitions {
                options = options.with_num_partitions(n);
            }
            if let Some(ms) = retention_ms {
                options = options.with_retention_ms(ms);
            }
            if let Some(bytes) = retention_bytes {
                options = options.with_retention_bytes(bytes);
            }
            if let Some(bytes) = segment_bytes {
                options = options.with_segment_bytes(bytes);
            }
            if let Some(bytes) = max_message_bytes {
                options = options.with_max_message_bytes(bytes);
            }

            let mut conn = BrokerConnection::connect(&addr).await?;
            let resp: CreateTopicsResponse = conn
                .call(
                    Command::CreateTopics,
                    &CreateTopicsRequest {
                        topics: vec![CreateTopicSpec { name, configs: Some(options) }],
                        timeout_ms: 5000,
                    },
                )
                .await?;
            if resp.error.error_code != 0 {
                anyhow::bail!(resp.error.error_message.unwrap_or_else(|| "create topic failed".into()));
            }
            Ok(())
        }
        TopicAction::List { addr, name_filter } => {
            let mut conn = BrokerConnection::connect(&addr).await?;
            let resp: ListTopicsResponse = conn.call(Command::ListTopics, &ListTopicsRequest { name_filter }).await?;
            if resp.error.error_code != 0 {
                anyhow::bail!(resp.error.error_message.unwrap_or_else(|| "list topics failed".into()));
            }
            for topic in resp.topics {
                println!("{}\t{}", topic.name, topic.num_partitions);
            }
            Ok(())
        }
        TopicAction::Get { addr, name } => {
            let mut conn = BrokerConnection::connect(&addr).await?;
            let resp: GetTopicResponse = conn.call(Command::GetTopic, &GetTopicRequest { topic: name }).await?;
            if resp.error.error_code != 0 {
                anyhow::bail!(resp.error.error_message.unwrap_or_else(|| "get topic failed".into()));
            }
            println!("{}", serde_json::to_string_pretty(&resp.topic)?);
            Ok(())
        }
        TopicAction::Remove { addr, name } => {
            let mut conn = BrokerConnection::connect(&addr).await?;
            let resp: DeleteTopicResponse = conn.call(Command::DeleteTopic, &DeleteTopicRequest { topic: name }).await?;
            if resp.error.error_code != 0 {
                anyhow::bail!(resp.error.error_message.unwrap_or_else(|| "delete topic failed".into()));
            }
            Ok(())
        }
    }
}

async fn run_consumer(action: ConsumerAction) -> anyhow::Result<()> {
    match action {
        ConsumerAction::Delete { addr, topic, group, id } => {
            let mut conn = BrokerConnection::connect(&addr).await?;
            let resp: DeleteConsumerResponse = conn.call(Command::DeleteConsumer, &DeleteConsumerRequest { topic, group, id }).await?;
            if resp.error.error_code != 0 {
                anyhow::bail!(resp.error.error_message.unwrap_or_else(|| "delete consumer failed".into()));
            }
            Ok(())
        }
    }
}

async fn run_group(action: GroupAction) -> anyhow::Result<()> {
    match action {
        GroupAction::List { addr, topic } => {
            let mut conn = BrokerConnection::connect(&addr).await?;
            let resp: ListGroupsResponse = conn.call(Command::ListGroups, &ListGroupsRequest { topic }).await?;
            if resp.error.error_code != 0 {
                anyhow::bail!(resp.error.error_message.unwrap_or_else(|| "list groups failed".into()));
            }
            for group in resp.groups {
                println!("{group}");
            }
            Ok(())
        }
        GroupAction::Get { addr, topic, name } => {
            let mut conn = BrokerConnection::connect(&addr).await?;
            let resp: GetGroupResponse = conn.call(Command::GetGroup, &GetGroupRequest { topic, name }).await?;
            if resp.error.error_code != 0 {
                anyhow::bail!(resp.error.error_message.unwrap_or_else(|| "get group failed".into()));
            }
            println!("{}", serde_json::to_string_pretty(&(resp.consumers, resp.offsets))?);
            Ok(())
        }
    }
}
