//! Routes a decoded `Command` to `broker-core` calls and encodes the
//! result back onto the wire.

use broker_config::TopicOptions;
use broker_core::Broker;
use broker_protocol::{Command, WireError, frame::encode_response, payload::*, RequestHeader};
use bytes::Bytes;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

fn ok_response<T: serde::Serialize>(correlation_id: i32, payload: &T) -> Bytes {
    let body = serde_json::to_vec(payload).expect("response always serializes");
    encode_response(correlation_id, &body).freeze()
}

async fn send(tx: &mpsc::Sender<Bytes>, frame: Bytes) {
    if tx.send(frame).await.is_err() {
        tracing::debug!("response channel closed, dropping frame");
    }
}

/// Handles one decoded request. For `Consume`, spawns a long-lived push
/// task (tracked in `streaming_tasks` so the session can abort it on
/// disconnect) instead of sending a single response.
pub async fn dispatch(
    header: RequestHeader,
    payload: Bytes,
    broker: Arc<Broker>,
    tx: mpsc::Sender<Bytes>,
    streaming_tasks: &mut Vec<JoinHandle<()>>,
) {
    let correlation_id = header.correlation_id;

    macro_rules! decode_or_bail {
        ($ty:ty) => {
            match serde_json::from_slice::<$ty>(&payload) {
                Ok(v) => v,
                Err(e) => {
                    let err = WireError::from_code(broker_protocol::BrokerErrorCode::Internal, e.to_string());
                    send(&tx, ok_response(correlation_id, &err)).await;
                    return;
                }
            }
        };
    }

    match header.cmd {
        Command::Produce => {
            let req: ProduceRequest = decode_or_bail!(ProduceRequest);
            let resp = produce(&broker, req).await;
            send(&tx, ok_response(correlation_id, &resp)).await;
        }
        Command::Consume => {
            let req: ConsumeRequest = decode_or_bail!(ConsumeRequest);
            let handle = tokio::spawn(consume_loop(broker, req, correlation_id, tx));
            streaming_tasks.push(handle);
        }
        Command::CreateTopics => {
            let req: CreateTopicsRequest = decode_or_bail!(CreateTopicsRequest);
            let resp = create_topics(&broker, req).await;
            send(&tx, ok_response(correlation_id, &resp)).await;
        }
        Command::DeleteTopic => {
            let req: DeleteTopicRequest = decode_or_bail!(DeleteTopicRequest);
            let resp = match broker.delete_topic(&req.topic).await {
                Ok(()) => DeleteTopicResponse { error: WireError::ok() },
                Err(e) => DeleteTopicResponse {
                    error: WireError::from_code(e.code(), e.to_string()),
                },
            };
            send(&tx, ok_response(correlation_id, &resp)).await;
        }
        Command::ListTopics => {
            let req: ListTopicsRequest = decode_or_bail!(ListTopicsRequest);
            let topics = broker.list_topics().await;
            let resp = ListTopicsResponse {
                error: WireError::ok(),
                topics: topics
                    .into_iter()
                    .filter(|(name, _)| match &req.name_filter {
                        Some(filter) => name.contains(filter.as_str()),
                        None => true,
                    })
                    .map(|(name, num_partitions)| TopicSummary { name, num_partitions })
                    .collect(),
            };
            send(&tx, ok_response(correlation_id, &resp)).await;
        }
        Command::GetTopic => {
            let req: GetTopicRequest = decode_or_bail!(GetTopicRequest);
            let resp = get_topic(&broker, req).await;
            send(&tx, ok_response(correlation_id, &resp)).await;
        }
        Command::CreateConsumer => {
            let req: CreateConsumerRequest = decode_or_bail!(CreateConsumerRequest);
            let resp = create_consumer(&broker, req).await;
            send(&tx, ok_response(correlation_id, &resp)).await;
        }
        Command::DeleteConsumer => {
            let req: DeleteConsumerRequest = decode_or_bail!(DeleteConsumerRequest);
            let resp = delete_consumer(&broker, req).await;
            send(&tx, ok_response(correlation_id, &resp)).await;
        }
        Command::Heartbeat => {
            let req: HeartbeatRequest = decode_or_bail!(HeartbeatRequest);
            let resp = heartbeat(&broker, req).await;
            send(&tx, ok_response(correlation_id, &resp)).await;
        }
        Command::CommitOffset => {
            let req: CommitOffsetRequest = decode_or_bail!(CommitOffsetRequest);
            let resp = commit_offset(&broker, req).await;
            send(&tx, ok_response(correlation_id, &resp)).await;
        }
        Command::ListGroups => {
            let req: ListGroupsRequest = decode_or_bail!(ListGroupsRequest);
            let resp = list_groups(&broker, req).await;
            send(&tx, ok_response(correlation_id, &resp)).await;
        }
        Command::GetGroup => {
            let req: GetGroupRequest = decode_or_bail!(GetGroupRequest);
            let resp = get_group(&broker, req).await;
            send(&tx, ok_response(correlation_id, &resp)).await;
        }
    }
}

async fn produce(broker: &Broker, req: ProduceRequest) -> ProduceResponse {
    let topic = match broker.get_topic(&req.topic).await {
        Ok(t) => t,
        Err(e) => {
            return ProduceResponse {
                error: WireError::from_code(e.code(), e.to_string()),
                offsets: Vec::new(),
            }
        }
    };

    let mut offsets = Vec::with_capacity(req.messages.len());
    for message in req.messages {
        match topic.produce(message.key, message.value, message.timestamp).await {
            Ok((_partition, offset)) => offsets.push(offset),
            Err(e) => {
                return ProduceResponse {
                    error: WireError::from_code(e.code(), e.to_string()),
                    offsets,
                }
            }
        }
    }

    ProduceResponse { error: WireError::ok(), offsets }
}

/// Resolves the offset a consume loop should next read from a newly
/// (re)assigned partition: the committed offset plus one if a commit
/// exists; otherwise the partition's base (`from_beginning`) or its
/// current `next_offset`.
async fn start_offset(topic: &broker_core::Topic, group: &str, partition: u32, from_beginning: bool) -> u64 {
    if let Some(committed) = topic.committed_offset(group, partition).await {
        return committed + 1;
    }
    if from_beginning {
        0
    } else {
        topic.partition_next_offset(partition).await.unwrap_or(0)
    }
}

/// How often the loop re-polls group membership while idle, bounding how
/// long it can take to notice a rebalance or its own removal when no
/// watched partition's wake signal covers the change. A rebalance is a
/// barrier, so every member must notice a reassignment promptly.
const ASSIGNMENT_POLL_INTERVAL: std::time::Duration = std::time::Duration::from_millis(500);

/// Pushes records from every partition assigned to this consumer as they
/// become available, long-polling on each partition's produced-offset
/// watch rather than busy-polling. Re-checks its assignment
/// whenever it wakes, so it picks up a rebalance's new partition set and
/// stops once the coordinator has removed it from the group.
async fn consume_loop(broker: Arc<Broker>, req: ConsumeRequest, correlation_id: i32, tx: mpsc::Sender<Bytes>) {
    let topic = match broker.get_topic(&req.topic).await {
        Ok(t) => t,
        Err(e) => {
            let resp = ConsumeResponse {
                error: WireError::from_code(e.code(), e.to_string()),
                message: None,
            };
            send(&tx, ok_response(correlation_id, &resp)).await;
            return;
        }
    };

    let mut options = req.consumer_options;
    options.from_beginning = req.from_beginning;

    let assigned = match topic.create_consumer(&req.group, &req.id, options).await {
        Ok(p) => p,
        Err(e) => {
            let resp = ConsumeResponse {
                error: WireError::from_code(e.code(), e.to_string()),
                message: None,
            };
            send(&tx, ok_response(correlation_id, &resp)).await;
            return;
        }
    };

    if let Err(e) = topic.mark_consumer_started(&req.group, &req.id, correlation_id).await {
        let resp = ConsumeResponse {
            error: WireError::from_code(e.code(), e.to_string()),
            message: None,
        };
        send(&tx, ok_response(correlation_id, &resp)).await;
        return;
    }

    push_records(&topic, &req, correlation_id, &tx, assigned).await;
    topic.ack_consumer_stopped(&req.group, &req.id).await;
}

/// Pushes records from every partition assigned to this consumer as they
/// become available, long-polling on each partition's produced-offset
/// watch rather than busy-polling. Re-checks its assignment whenever it
/// wakes, so it picks up a rebalance's new partition set and stops once
/// the coordinator has removed it from the group.
async fn push_records(
    topic: &broker_core::Topic,
    req: &ConsumeRequest,
    correlation_id: i32,
    tx: &mpsc::Sender<Bytes>,
    mut assigned: Vec<u32>,
) {
    let mut next_offsets = std::collections::HashMap::new();
    for &partition in &assigned {
        let start = start_offset(topic, &req.group, partition, req.from_beginning).await;
        next_offsets.insert(partition, start);
    }

    loop {
        match topic.consumer_assignment(&req.group, &req.id).await {
            None => return,
            Some(current) => {
                if current != assigned {
                    for &partition in &current {
                        if !next_offsets.contains_key(&partition) {
                            let start = start_offset(topic, &req.group, partition, req.from_beginning).await;
                            next_offsets.insert(partition, start);
                        }
                    }
                    next_offsets.retain(|p, _| current.contains(p));
                    assigned = current;
                }
            }
        }

        let mut made_progress = false;
        for &partition in &assigned {
            let offset = *next_offsets.get(&partition).unwrap_or(&0);
            match topic.consume(partition, offset).await {
                Ok(record) => {
                    made_progress = true;
                    let resp = ConsumeResponse {
                        error: WireError::ok(),
                        message: Some(ConsumeMessage {
                            partition,
                            offset: record.offset,
                            key: record.key,
                            payload: record.payload,
                            timestamp: record.timestamp,
                        }),
                    };
                    // `record.offset` may be ahead of the requested `offset`
                    // if retention clamped it forward past deleted segments.
                    next_offsets.insert(partition, record.offset + 1);
                    if tx.send(ok_response(correlation_id, &resp)).await.is_err() {
                        return;
                    }
                }
                Err(e) if e.is_not_yet_available() => continue,
                Err(e) => {
                    let resp = ConsumeResponse {
                        error: WireError::from_code(e.code(), e.to_string()),
                        message: None,
                    };
                    send(&tx, ok_response(correlation_id, &resp)).await;
                    return;
                }
            }
        }

        if !made_progress {
            let mut watches = Vec::with_capacity(assigned.len());
            for &partition in &assigned {
                if let Some(w) = topic.watch_partition(partition).await {
                    watches.push(w);
                }
            }

            let wait_for_wake = async {
                if watches.is_empty() {
                    std::future::pending::<()>().await;
                } else {
                    let futs = watches.iter_mut().map(|w| Box::pin(w.changed()));
                    let _ = futures::future::select_all(futs).await;
                }
            };

            let stop_token = topic.consumer_stop_token(&req.group, &req.id).await;
            let wait_for_stop = async {
                match &stop_token {
                    Some(token) => token.cancelled().await,
                    None => std::future::pending::<()>().await,
                }
            };

            tokio::select! {
                _ = wait_for_wake => {}
                _ = wait_for_stop => {}
                _ = tokio::time::sleep(ASSIGNMENT_POLL_INTERVAL) => {}
            }
        }
    }
}

async fn create_topics(broker: &Broker, req: CreateTopicsRequest) -> CreateTopicsResponse {
    let mut created = Vec::with_capacity(req.topics.len());
    for spec in req.topics {
        let options = spec.configs.unwrap_or_default().merged_with(&TopicOptions::default());
        match broker.create_topic(&spec.name, options).await {
            Ok(_) => created.push(spec.name),
            Err(e) => {
                return CreateTopicsResponse {
                    error: WireError::from_code(e.code(), e.to_string()),
                    created,
                }
            }
        }
    }
    CreateTopicsResponse { error: WireError::ok(), created }
}

async fn get_topic(broker: &Broker, req: GetTopicRequest) -> GetTopicResponse {
    match broker.get_topic(&req.topic).await {
        Ok(topic) => GetTopicResponse {
            error: WireError::ok(),
            topic: Some(TopicDetail {
                name: topic.name().to_string(),
                options: topic.options().clone(),
                partition_sizes: topic.partition_sizes().await,
                groups: topic.groups().await,
            }),
        },
        Err(e) => GetTopicResponse {
            error: WireError::from_code(e.code(), e.to_string()),
            topic: None,
        },
    }
}

async fn create_consumer(broker: &Broker, req: CreateConsumerRequest) -> CreateConsumerResponse {
    let id = if req.id.is_empty() {
        uuid::Uuid::new_v4().to_string()
    } else {
        req.id
    };

    let topic = match broker.get_topic(&req.topic).await {
        Ok(t) => t,
        Err(e) => {
            return CreateConsumerResponse {
                error: WireError::from_code(e.code(), e.to_string()),
                id,
                assigned_partitions: Vec::new(),
            }
        }
    };

    match topic.create_consumer(&req.group, &id, req.options).await {
        Ok(assigned_partitions) => CreateConsumerResponse {
            error: WireError::ok(),
            id,
            assigned_partitions,
        },
        Err(e) => CreateConsumerResponse {
            error: WireError::from_code(e.code(), e.to_string()),
            id,
            assigned_partitions: Vec::new(),
        },
    }
}

async fn delete_consumer(broker: &Broker, req: DeleteConsumerRequest) -> DeleteConsumerResponse {
    let topic = match broker.get_topic(&req.topic).await {
        Ok(t) => t,
        Err(e) => return DeleteConsumerResponse { error: WireError::from_code(e.code(), e.to_string()) },
    };
    match topic.remove_consumer(&req.group, &req.id).await {
        Ok(()) => DeleteConsumerResponse { error: WireError::ok() },
        Err(e) => DeleteConsumerResponse { error: WireError::from_code(e.code(), e.to_string()) },
    }
}

async fn heartbeat(broker: &Broker, req: HeartbeatRequest) -> HeartbeatResponse {
    let topic = match broker.get_topic(&req.topic).await {
        Ok(t) => t,
        Err(e) => return HeartbeatResponse { error: WireError::from_code(e.code(), e.to_string()) },
    };
    match topic.heartbeat(&req.group, &req.consumer_id).await {
        Ok(()) => HeartbeatResponse { error: WireError::ok() },
        Err(e) => HeartbeatResponse { error: WireError::from_code(e.code(), e.to_string()) },
    }
}

async fn commit_offset(broker: &Broker, req: CommitOffsetRequest) -> CommitOffsetResponse {
    let topic = match broker.get_topic(&req.topic).await {
        Ok(t) => t,
        Err(e) => return CommitOffsetResponse { error: WireError::from_code(e.code(), e.to_string()) },
    };
    match topic.commit_offset(&req.group, req.partition, req.offset).await {
        Ok(()) => CommitOffsetResponse { error: WireError::ok() },
        Err(e) => CommitOffsetResponse { error: WireError::from_code(e.code(), e.to_string()) },
    }
}

async fn list_groups(broker: &Broker, req: ListGroupsRequest) -> ListGroupsResponse {
    match broker.get_topic(&req.topic).await {
        Ok(topic) => ListGroupsResponse { error: WireError::ok(), groups: topic.groups().await },
        Err(e) => ListGroupsResponse { error: WireError::from_code(e.code(), e.to_string()), groups: Vec::new() },
    }
}

async fn get_group(broker: &Broker, req: GetGroupRequest) -> GetGroupResponse {
    let topic = match broker.get_topic(&req.topic).await {
        Ok(t) => t,
        Err(e) => {
            return GetGroupResponse {
                error: WireError::from_code(e.code(), e.to_string()),
                consumers: Vec::new(),
                offsets: Default::default(),
            }
        }
    };

    match topic.get_group_snapshot(&req.name).await {
        Some((consumers, offsets)) => GetGroupResponse {
            error: WireError::ok(),
            consumers: consumers
                .into_iter()
                .map(|c| GroupMemberDetail { id: c.id, assigned_partitions: c.assigned_partitions })
                .collect(),
            offsets,
        },
        None => GetGroupResponse {
            error: WireError::from_code(broker_protocol::BrokerErrorCode::ConsumerGroupNotFound, "group not found"),
            consumers: Vec::new(),
            offsets: Default::default(),
        },
    }
}
