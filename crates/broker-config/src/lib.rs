//! Configuration types for the broker: `BrokerOptions` (YAML-loadable),
//! `TopicOptions` (persisted as `options.json` per topic) and
//! `ConsumerOptions` (carried in `create_consumer`/`consume` requests).
//!
//! Field names use the dotted keys verbatim since `TopicOptions` round-trips
//! through `options.json` on disk.

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write {path}: {source}")]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse {path} as JSON: {source}")]
    Json {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to parse {path} as YAML: {source}")]
    Yaml {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CleanupPolicy {
    Delete,
    /// Reserved; log compaction is not implemented.
    Compact,
}

impl Default for CleanupPolicy {
    fn default() -> Self {
        CleanupPolicy::Delete
    }
}

/// Per-topic options, persisted verbatim as `<base_path>/<topic>/options.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopicOptions {
    #[serde(rename = "num.partitions")]
    pub num_partitions: u32,
    #[serde(rename = "cleanup.policy")]
    pub cleanup_policy: CleanupPolicy,
    #[serde(rename = "retention.ms")]
    pub retention_ms: i64,
    #[serde(rename = "retention.bytes")]
    pub retention_bytes: i64,
    #[serde(rename = "segment.bytes")]
    pub segment_bytes: i64,
    #[serde(rename = "max.message.bytes")]
    pub max_message_bytes: i64,
}

impl Default for TopicOptions {
    fn default() -> Self {
        TopicOptions {
            num_partitions: 1,
            cleanup_policy: CleanupPolicy::Delete,
            retention_ms: 604_800_000, // 7 days
            retention_bytes: -1,       // unlimited
            segment_bytes: 1_073_741_824, // 1 GiB
            max_message_bytes: 1_048_576,  // 1 MiB
        }
    }
}

impl TopicOptions {
    pub fn with_num_partitions(mut self, n: u32) -> Self {
        self.num_partitions = n;
        self
    }

    pub fn with_cleanup_policy(mut self, p: CleanupPolicy) -> Self {
        self.cleanup_policy = p;
        self
    }

    pub fn with_retention_ms(mut self, ms: i64) -> Self {
        self.retention_ms = ms;
        self
    }

    pub fn with_retention_bytes(mut self, bytes: i64) -> Self {
        self.retention_bytes = bytes;
        self
    }

    pub fn with_segment_bytes(mut self, bytes: i64) -> Self {
        self.segment_bytes = bytes;
        self
    }

    pub fn with_max_message_bytes(mut self, bytes: i64) -> Self {
        self.max_message_bytes = bytes;
        self
    }

    /// Fills any zero-valued field of `self` from `base`.
    pub fn merged_with(mut self, base: &TopicOptions) -> Self {
        if self.num_partitions == 0 {
            self.num_partitions = base.num_partitions;
        }
        if self.retention_ms == 0 {
            self.retention_ms = base.retention_ms;
        }
        if self.retention_bytes == 0 {
            self.retention_bytes = base.retention_bytes;
        }
        if self.segment_bytes == 0 {
            self.segment_bytes = base.segment_bytes;
        }
        if self.max_message_bytes == 0 {
            self.max_message_bytes = base.max_message_bytes;
        }
        self
    }

    pub fn load(path: &Path) -> Result<TopicOptions, ConfigError> {
        let bytes = std::fs::read(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        serde_json::from_slice(&bytes).map_err(|source| ConfigError::Json {
            path: path.display().to_string(),
            source,
        })
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let bytes = serde_json::to_vec_pretty(self).expect("TopicOptions always serializes");
        std::fs::write(path, bytes).map_err(|source| ConfigError::Write {
            path: path.display().to_string(),
            source,
        })
    }
}

/// Root broker options, YAML-loadable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BrokerOptions {
    #[serde(rename = "base.path")]
    pub base_path: String,
    #[serde(rename = "log.retention.check.interval.ms")]
    pub log_retention_check_interval_ms: i64,
}

impl Default for BrokerOptions {
    fn default() -> Self {
        BrokerOptions {
            base_path: "./broker_data".to_string(),
            log_retention_check_interval_ms: 300_000, // 5 minutes
        }
    }
}

impl BrokerOptions {
    pub fn with_base_path(mut self, path: impl Into<String>) -> Self {
        self.base_path = path.into();
        self
    }

    pub fn with_log_retention_check_interval_ms(mut self, ms: i64) -> Self {
        self.log_retention_check_interval_ms = ms;
        self
    }

    pub fn merged_with(mut self, base: &BrokerOptions) -> Self {
        if self.base_path.is_empty() {
            self.base_path = base.base_path.clone();
        }
        if self.log_retention_check_interval_ms == 0 {
            self.log_retention_check_interval_ms = base.log_retention_check_interval_ms;
        }
        self
    }

    pub fn load_yaml(path: &Path) -> Result<BrokerOptions, ConfigError> {
        let bytes = std::fs::read(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let opts: BrokerOptions =
            serde_yaml::from_slice(&bytes).map_err(|source| ConfigError::Yaml {
                path: path.display().to_string(),
                source,
            })?;
        Ok(opts.merged_with(&BrokerOptions::default()))
    }
}

/// Per-consumer options, carried in `create_consumer`/`consume` requests.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConsumerOptions {
    #[serde(rename = "session.timeout.ms")]
    pub session_timeout_ms: i64,
    #[serde(rename = "heartbeat.interval.ms")]
    pub heartbeat_interval_ms: i64,
    #[serde(rename = "auto.commit.interval.ms")]
    pub auto_commit_interval_ms: i64,
    #[serde(rename = "enable.auto.commit")]
    pub enable_auto_commit: bool,
    pub from_beginning: bool,
}

impl Default for ConsumerOptions {
    fn default() -> Self {
        ConsumerOptions {
            session_timeout_ms: 10_000,
            heartbeat_interval_ms: 3_000,
            auto_commit_interval_ms: 5_000,
            enable_auto_commit: true,
            from_beginning: false,
        }
    }
}

impl ConsumerOptions {
    pub fn with_session_timeout_ms(mut self, ms: i64) -> Self {
        self.session_timeout_ms = ms;
        self
    }

    pub fn with_heartbeat_interval_ms(mut self, ms: i64) -> Self {
        self.heartbeat_interval_ms = ms;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn topic_options_json_round_trips_with_dotted_keys() {
        let opts = TopicOptions::default();
        let json = serde_json::to_string(&opts).unwrap();
        assert!(json.contains("\"num.partitions\""));
        assert!(json.contains("\"segment.bytes\""));

        let back: TopicOptions = serde_json::from_str(&json).unwrap();
        assert_eq!(opts, back);
    }

    #[test]
    fn topic_options_save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("options.json");
        let opts = TopicOptions::default().with_num_partitions(4);
        opts.save(&path).unwrap();

        let loaded = TopicOptions::load(&path).unwrap();
        assert_eq!(loaded, opts);
    }

    #[test]
    fn merge_fills_only_zero_fields() {
        let base = TopicOptions::default();
        let overlay = TopicOptions {
            num_partitions: 8,
            cleanup_policy: CleanupPolicy::Delete,
            retention_ms: 0,
            retention_bytes: 0,
            segment_bytes: 0,
            max_message_bytes: 0,
        };
        let merged = overlay.merged_with(&base);
        assert_eq!(merged.num_partitions, 8);
        assert_eq!(merged.retention_ms, base.retention_ms);
        assert_eq!(merged.segment_bytes, base.segment_bytes);
    }

    #[test]
    fn broker_options_yaml_loads_and_merges_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broker.yaml");
        std::fs::write(&path, "base.path: /tmp/mybroker\n").unwrap();

        let opts = BrokerOptions::load_yaml(&path).unwrap();
        assert_eq!(opts.base_path, "/tmp/mybroker");
        assert_eq!(
            opts.log_retention_check_interval_ms,
            BrokerOptions::default().log_retention_check_interval_ms
        );
    }
}
