use broker_config::{BrokerOptions, TopicOptions};
use broker_core::Broker;
use broker_protocol::{
    command::Command, encode_request, frame::decode_response, payload::*, RequestHeader,
};
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use pretty_assertions::assert_eq;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_util::codec::{FramedRead, FramedWrite, LengthDelimitedCodec};
use tokio_util::sync::CancellationToken;

fn codec() -> LengthDelimitedCodec {
    LengthDelimitedCodec::builder()
        .big_endian()
        .length_field_length(4)
        .new_codec()
}

async fn start_broker() -> (Arc<Broker>, std::net::SocketAddr, CancellationToken, tokio::task::JoinHandle<()>) {
    let dir = tempfile::tempdir().unwrap();
    let broker = Arc::new(
        Broker::new(BrokerOptions::default().with_base_path(dir.path().to_str().unwrap()))
            .await
            .unwrap(),
    );
    std::mem::forget(dir); // keep the temp dir alive for the test's duration

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let cancel = CancellationToken::new();
    let server_broker = broker.clone();
    let server_cancel = cancel.clone();
    let handle = tokio::spawn(async move {
        let _ = broker_server::run(server_broker, addr, 10, Duration::from_secs(5), server_cancel).await;
    });

    // give the listener a moment to bind before clients connect
    tokio::time::sleep(Duration::from_millis(50)).await;

    (broker, addr, cancel, handle)
}

async fn round_trip(
    stream: &mut (impl tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin),
    cmd: Command,
    correlation_id: i32,
    payload: &impl serde::Serialize,
) -> Bytes {
    let (r, w) = tokio::io::split(stream);
    let mut reader = FramedRead::new(r, codec());
    let mut writer = FramedWrite::new(w, codec());

    let header = RequestHeader { cmd, api_version: 0, correlation_id };
    let body = serde_json::to_vec(payload).unwrap();
    let frame = encode_request(header, &body).freeze();
    writer.send(frame).await.unwrap();

    let resp = reader.next().await.unwrap().unwrap().freeze();
    let (got_correlation, payload) = decode_response(resp).unwrap();
    assert_eq!(got_correlation, correlation_id);
    payload
}

#[tokio::test]
async fn produce_then_consume_over_the_wire() {
    let (_broker, addr, cancel, _handle) = start_broker().await;
    let mut stream = TcpStream::connect(addr).await.unwrap();

    let create_resp = round_trip(
        &mut stream,
        Command::CreateTopics,
        1,
        &CreateTopicsRequest {
            topics: vec![CreateTopicSpec {
                name: "events".into(),
                configs: Some(TopicOptions::default().with_num_partitions(1)),
            }],
            timeout_ms: 1000,
        },
    )
    .await;
    let create_resp: CreateTopicsResponse = serde_json::from_slice(&create_resp).unwrap();
    assert_eq!(create_resp.error.error_code, 0);

    let produce_resp = round_trip(
        &mut stream,
        Command::Produce,
        2,
        &ProduceRequest {
            topic: "events".into(),
            messages: vec![ProduceMessage { key: Vec::new(), value: b"hello".to_vec(), timestamp: None }],
            timeout_ms: 1000,
        },
    )
    .await;
    let produce_resp: ProduceResponse = serde_json::from_slice(&produce_resp).unwrap();
    assert_eq!(produce_resp.error.error_code, 0);
    assert_eq!(produce_resp.offsets, vec![0]);

    cancel.cancel();
}

#[tokio::test]
async fn produce_to_missing_topic_reports_topic_not_found() {
    let (_broker, addr, cancel, _handle) = start_broker().await;
    let mut stream = TcpStream::connect(addr).await.unwrap();

    let resp = round_trip(
        &mut stream,
        Command::Produce,
        1,
        &ProduceRequest {
            topic: "does-not-exist".into(),
            messages: vec![ProduceMessage { key: Vec::new(), value: b"x".to_vec(), timestamp: None }],
            timeout_ms: 1000,
        },
    )
    .await;
    let resp: ProduceResponse = serde_json::from_slice(&resp).unwrap();
    assert_ne!(resp.error.error_code, 0);
    assert!(resp.error.error_message.unwrap().contains("topic.not.found"));

    cancel.cancel();
}
