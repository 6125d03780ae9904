use crate::error::CoreError;
use crate::topic::Topic;
use broker_config::{BrokerOptions, TopicOptions};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Root of the broker's in-memory state: the topic registry, guarded by a
/// single `RwLock`. Each topic then manages its own partition-level
/// locking beneath this.
pub struct Broker {
    options: BrokerOptions,
    topics: RwLock<BTreeMap<String, Arc<Topic>>>,
}

impl Broker {
    /// Creates the broker's base directory if missing and loads every
    /// topic found beneath it.
    pub async fn new(options: BrokerOptions) -> Result<Broker, CoreError> {
        let base_path = PathBuf::from(&options.base_path);
        std::fs::create_dir_all(&base_path)?;

        let mut topic_names = Vec::new();
        for entry in std::fs::read_dir(&base_path)? {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                topic_names.push(entry.file_name().to_string_lossy().into_owned());
            }
        }

        let mut topics = BTreeMap::new();
        for name in topic_names {
            let topic = Topic::load(&base_path, &name).await?;
            topics.insert(name, Arc::new(topic));
        }

        Ok(Broker {
            options,
            topics: RwLock::new(topics),
        })
    }

    pub fn options(&self) -> &BrokerOptions {
        &self.options
    }

    fn base_path(&self) -> PathBuf {
        PathBuf::from(&self.options.base_path)
    }

    pub async fn create_topic(&self, name: &str, options: TopicOptions) -> Result<Arc<Topic>, CoreError> {
        let mut topics = self.topics.write().await;
        if topics.contains_key(name) {
            return Err(CoreError::TopicAlreadyExists);
        }
        let topic = Arc::new(Topic::create(&self.base_path(), name, options).await?);
        topics.insert(name.to_string(), topic.clone());
        Ok(topic)
    }

    pub async fn get_topic(&self, name: &str) -> Result<Arc<Topic>, CoreError> {
        self.topics
            .read()
            .await
            .get(name)
            .cloned()
            .ok_or(CoreError::TopicNotFound)
    }

    pub async fn list_topics(&self) -> Vec<(String, u32)> {
        self.topics
            .read()
            .await
            .values()
            .map(|t| (t.name().to_string(), t.num_partitions()))
            .collect()
    }

    pub async fn delete_topic(&self, name: &str) -> Result<(), CoreError> {
        let mut topics = self.topics.write().await;
        let _topic = topics.remove(name).ok_or(CoreError::TopicNotFound)?;
        std::fs::remove_dir_all(self.base_path().join(name))?;
        Ok(())
    }

    pub async fn all_topics(&self) -> Vec<Arc<Topic>> {
        self.topics.read().await.values().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_get_and_delete_topic() {
        let dir = tempfile::tempdir().unwrap();
        let broker = Broker::new(BrokerOptions::default().with_base_path(dir.path().to_str().unwrap()))
            .await
            .unwrap();

        broker.create_topic("events", TopicOptions::default()).await.unwrap();
        assert!(broker.get_topic("events").await.is_ok());
        assert_eq!(broker.list_topics().await.len(), 1);

        broker.delete_topic("events").await.unwrap();
        assert!(matches!(
            broker.get_topic("events").await.unwrap_err(),
            CoreError::TopicNotFound
        ));
    }

    #[tokio::test]
    async fn restart_reloads_existing_topics() {
        let dir = tempfile::tempdir().unwrap();
        {
            let broker = Broker::new(BrokerOptions::default().with_base_path(dir.path().to_str().unwrap()))
                .await
                .unwrap();
            broker.create_topic("events", TopicOptions::default()).await.unwrap();
        }

        let reloaded = Broker::new(BrokerOptions::default().with_base_path(dir.path().to_str().unwrap()))
            .await
            .unwrap();
        assert!(reloaded.get_topic("events").await.is_ok());
    }
}
