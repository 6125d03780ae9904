//! Per-connection reader/writer/dispatch tasks: a `tokio::select!` over
//! frame-read, idle-timeout, and cancellation, with `FramedRead` +
//! `LengthDelimitedCodec` framing and a per-connection child
//! `CancellationToken`.

use crate::dispatch::dispatch;
use broker_core::Broker;
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio_util::codec::{FramedRead, FramedWrite, LengthDelimitedCodec};
use tokio_util::sync::CancellationToken;

/// Outstanding responses a connection may queue before the writer task
/// applies backpressure to producers of that data, the consume push loop
/// in particular.
const RESPONSE_QUEUE_DEPTH: usize = 100;

fn codec() -> LengthDelimitedCodec {
    LengthDelimitedCodec::builder()
        .big_endian()
        .length_field_length(4)
        .max_frame_length(broker_protocol::frame::MAX_FRAME_LEN)
        .new_codec()
}

/// Drives one client connection until it disconnects, times out, or `stop`
/// is cancelled.
#[tracing::instrument(level = "info", skip(broker, socket, stop), fields(?addr))]
pub async fn serve<S>(
    broker: Arc<Broker>,
    socket: S,
    addr: SocketAddr,
    idle_timeout: Duration,
    stop: CancellationToken,
) -> anyhow::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    tracing::info!("accepted client connection");

    let (r, w) = tokio::io::split(socket);
    let mut reader = FramedRead::new(r, codec());
    let mut writer = FramedWrite::new(w, codec());

    let (tx, mut rx) = mpsc::channel::<Bytes>(RESPONSE_QUEUE_DEPTH);
    let writer_task = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            if writer.send(frame).await.is_err() {
                break;
            }
        }
        let _ = writer.into_inner().shutdown().await;
    });

    let mut streaming_tasks = Vec::new();

    let result = async {
        loop {
            tokio::select! {
                frame = reader.next() => {
                    let Some(frame) = frame else { return Ok(()) };
                    let frame = frame?.freeze();

                    let (header, payload) = broker_protocol::decode_request(frame)?;
                    dispatch(header, payload, broker.clone(), tx.clone(), &mut streaming_tasks).await;
                }
                _ = tokio::time::sleep(idle_timeout) => {
                    anyhow::bail!("timeout waiting for next session request")
                }
                _ = stop.cancelled() => {
                    anyhow::bail!("signalled to stop")
                }
            }
        }
    }
    .await;

    for task in streaming_tasks {
        task.abort();
    }
    drop(tx);
    let _ = writer_task.await;

    result
}
