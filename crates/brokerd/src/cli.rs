//! CLI surface: `#[derive(Parser)]` with `#[arg(long, env = "...")]` on
//! every flag so each option is independently settable by environment
//! variable. Subcommands are grouped into `clap::Subcommand` variants, one
//! per broker operation.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "brokerd", about = "A single-node, partitioned message broker", version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Starts the broker and TCP server and blocks until Ctrl+C.
    Server {
        /// Root directory the broker persists topics and segments under.
        #[arg(long, env = "BROKER_BASE_PATH", default_value = "./broker_data")]
        base_path: PathBuf,
        /// Optional YAML config file; flags override values it sets.
        #[arg(long, env = "BROKER_CONFIG_FILE")]
        config_file: Option<PathBuf>,
        #[arg(long, env = "BROKER_PORT", default_value = "9092")]
        port: u16,
        #[arg(long, env = "BROKER_RETENTION_CHECK_INTERVAL_MS", default_value = "300000")]
        retention_check_interval_ms: i64,
        #[arg(long, env = "BROKER_MAX_CONNECTIONS", default_value = "1024")]
        max_connections: usize,
        #[arg(long, env = "BROKER_IDLE_SESSION_TIMEOUT", value_parser = humantime::parse_duration, default_value = "10m")]
        idle_session_timeout: std::time::Duration,
        #[arg(long, env = "BROKER_HEARTBEAT_CHECK_INTERVAL_MS", default_value = "1000")]
        heartbeat_check_interval_ms: i64,
    },
    /// Sends one message and prints the assigned offset.
    Produce {
        #[arg(long, env = "BROKER_ADDR", default_value = "127.0.0.1:9092")]
        addr: String,
        #[arg(long)]
        topic: String,
        #[arg(long, default_value = "")]
        key: String,
        #[arg(long)]
        payload: String,
        /// Epoch-seconds timestamp to attach; defaults to the broker's own
        /// clock when omitted.
        #[arg(long)]
        timestamp: Option<u64>,
        #[arg(long, default_value = "5000")]
        timeout_ms: u64,
    },
    /// Joins a consumer group and prints delivered records as
    /// newline-delimited JSON until interrupted.
    Consume {
        #[arg(long, env = "BROKER_ADDR", default_value = "127.0.0.1:9092")]
        addr: String,
        #[arg(long)]
        topic: String,
        #[arg(long)]
        group: String,
        #[arg(long)]
        id: Option<String>,
        #[arg(long)]
        from_beginning: bool,
        #[arg(long, default_value = "10000")]
        session_timeout_ms: i64,
        #[arg(long, default_value = "3000")]
        heartbeat_interval_ms: i64,
        #[arg(long, default_value = "5000")]
        auto_commit_interval_ms: i64,
        #[arg(long, action = clap::ArgAction::Set, default_value_t = true)]
        enable_auto_commit: bool,
    },
    /// Commits a consumer group's offset for one partition.
    Commit {
        #[arg(long, env = "BROKER_ADDR", default_value = "127.0.0.1:9092")]
        addr: String,
        #[arg(long)]
        topic: String,
        #[arg(long)]
        group: String,
        #[arg(long)]
        partition: u32,
        #[arg(long)]
        offset: u64,
    },
    /// Topic administration.
    Topic {
        #[command(subcommand)]
        action: TopicAction,
    },
    /// Consumer administration.
    Consumer {
        #[command(subcommand)]
        action: ConsumerAction,
    },
    /// Consumer group inspection.
    Group {
        #[command(subcommand)]
        action: GroupAction,
    },
}

#[derive(Debug, Subcommand)]
pub enum TopicAction {
    Add {
        #[arg(long, env = "BROKER_ADDR", default_value = "127.0.0.1:9092")]
        addr: String,
        #[arg(long)]
        name: String,
        #[arg(long)]
        num_partitions: Option<u32>,
        #[arg(long)]
        retention_ms: Option<i64>,
        #[arg(long)]
        retention_bytes: Option<i64>,
        #[arg(long)]
        segment_bytes: Option<i64>,
        #[arg(long)]
        max_message_bytes: Option<i64>,
    },
    List {
        #[arg(long, env = "BROKER_ADDR", default_value = "127.0.0.1:9092")]
        addr: String,
        /// Only list topics whose name contains this substring.
        #[arg(long)]
        name_filter: Option<String>,
    },
    Get {
        #[arg(long, env = "BROKER_ADDR", default_value = "127.0.0.1:9092")]
        addr: String,
        #[arg(long)]
        name: String,
    },
    Remove {
        #[arg(long, env = "BROKER_ADDR", default_value = "127.0.0.1:9092")]
        addr: String,
        #[arg(long)]
        name: String,
    },
}

#[derive(Debug, Subcommand)]
pub enum ConsumerAction {
    Delete {
        #[arg(long, env = "BROKER_ADDR", default_value = "127.0.0.1:9092")]
        addr: String,
        #[arg(long)]
        topic: String,
        #[arg(long)]
        group: String,
        #[arg(long)]
        id: String,
    },
}

#[derive(Debug, Subcommand)]
pub enum GroupAction {
    List {
        #[arg(long, env = "BROKER_ADDR", default_value = "127.0.0.1:9092")]
        addr: String,
        #[arg(long)]
        topic: String,
    },
    Get {
        #[arg(long, env = "BROKER_ADDR", default_value = "127.0.0.1:9092")]
        addr: String,
        #[arg(long)]
        topic: String,
        #[arg(long)]
        name: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn server_subcommand_applies_documented_defaults() {
        let cli = Cli::parse_from(["brokerd", "server", "--base-path", "/tmp/data"]);
        let Command::Server { port, max_connections, heartbeat_check_interval_ms, .. } = cli.command else {
            panic!("expected Server subcommand");
        };
        assert_eq!(port, 9092);
        assert_eq!(max_connections, 1024);
        assert_eq!(heartbeat_check_interval_ms, 1000);
    }

    #[test]
    fn produce_subcommand_requires_topic_and_payload() {
        assert!(Cli::try_parse_from(["brokerd", "produce"]).is_err());
        let cli = Cli::try_parse_from(["brokerd", "produce", "--topic", "t", "--payload", "v"]).unwrap();
        let Command::Produce { topic, payload, .. } = cli.command else {
            panic!("expected Produce subcommand");
        };
        assert_eq!(topic, "t");
        assert_eq!(payload, "v");
    }
}
