//! A deliberately thin connection to a running broker, used only by
//! `brokerd`'s non-`server` subcommands: a plain request/response round
//! trip, not a full ergonomic client library.

use anyhow::Context;
use broker_protocol::{decode_response, encode_request, Command, RequestHeader};
use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

pub struct BrokerConnection {
    stream: TcpStream,
    next_correlation_id: i32,
}

impl BrokerConnection {
    pub async fn connect(addr: &str) -> anyhow::Result<BrokerConnection> {
        let stream = TcpStream::connect(addr)
            .await
            .with_context(|| format!("failed to connect to {addr}"))?;
        stream.set_nodelay(true)?;
        Ok(BrokerConnection { stream, next_correlation_id: 1 })
    }

    /// Sends one request and waits for its matching response over the
    /// length-delimited framing. Not safe to call concurrently or to use
    /// for the streaming `consume` command; see `consume_stream`.
    pub async fn call<Req: serde::Serialize, Resp: serde::de::DeserializeOwned>(
        &mut self,
        cmd: Command,
        req: &Req,
    ) -> anyhow::Result<Resp> {
        self.send_request(cmd, req).await?;
        let frame = self.read_frame().await?;
        let (_correlation_id, payload) = decode_response(frame)?;
        Ok(serde_json::from_slice(&payload)?)
    }

    async fn send_request<Req: serde::Serialize>(&mut self, cmd: Command, req: &Req) -> anyhow::Result<i32> {
        let correlation_id = self.next_correlation_id;
        self.next_correlation_id += 1;

        let header = RequestHeader { cmd, api_version: 0, correlation_id };
        let body = serde_json::to_vec(req)?;
        let frame = encode_request(header, &body);

        self.stream.write_u32(frame.len() as u32).await?;
        self.stream.write_all(&frame).await?;
        Ok(correlation_id)
    }

    async fn read_frame(&mut self) -> anyhow::Result<Bytes> {
        let len = self.stream.read_u32().await.context("connection closed by broker")?;
        let mut buf = vec![0u8; len as usize];
        self.stream.read_exact(&mut buf).await?;
        Ok(Bytes::from(buf))
    }

    /// Issues `consume` once and then reads a stream of push responses,
    /// calling `on_message` for each until the stream ends or `on_message`
    /// returns `Ok(false)`.
    pub async fn consume_stream<Req: serde::Serialize, Resp: serde::de::DeserializeOwned>(
        &mut self,
        req: &Req,
        mut on_message: impl FnMut(Resp) -> anyhow::Result<bool>,
    ) -> anyhow::Result<()> {
        self.send_request(Command::Consume, req).await?;
        loop {
            let frame = self.read_frame().await?;
            let (_correlation_id, payload) = decode_response(frame)?;
            let resp: Resp = serde_json::from_slice(&payload)?;
            if !on_message(resp)? {
                return Ok(());
            }
        }
    }
}
