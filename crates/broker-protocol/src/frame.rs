use crate::command::Command;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

/// Maximum single frame size accepted from a peer. Generous enough for any
/// reasonable produce batch while still bounding a misbehaving client.
pub const MAX_FRAME_LEN: usize = 64 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("frame too short to contain a request header")]
    Truncated,
    #[error("unrecognized command code {0}")]
    UnknownCommand(i16),
}

/// Decoded header of a request frame, whose wire format is:
/// `[ total_len u32 | cmd i16 | api_version i16 | correlation_id i32 | payload ]`.
///
/// `total_len` is stripped by the length-delimited transport codec before
/// this type ever sees the bytes; what's decoded here is everything after it.
#[derive(Debug, Clone, Copy)]
pub struct RequestHeader {
    pub cmd: Command,
    pub api_version: i16,
    pub correlation_id: i32,
}

/// Splits a decoded length-delimited frame into its header and JSON payload.
pub fn decode_request(mut body: Bytes) -> Result<(RequestHeader, Bytes), FrameError> {
    if body.len() < 8 {
        return Err(FrameError::Truncated);
    }
    let cmd_code = body.get_i16();
    let api_version = body.get_i16();
    let correlation_id = body.get_i32();
    let cmd = Command::from_code(cmd_code).ok_or(FrameError::UnknownCommand(cmd_code))?;

    Ok((
        RequestHeader {
            cmd,
            api_version,
            correlation_id,
        },
        body,
    ))
}

/// Encodes a request frame body (header + JSON payload), for use by clients.
/// Does not include the `total_len` prefix; the caller's transport codec adds it.
pub fn encode_request(header: RequestHeader, payload: &[u8]) -> BytesMut {
    let mut buf = BytesMut::with_capacity(8 + payload.len());
    buf.put_i16(header.cmd.code());
    buf.put_i16(header.api_version);
    buf.put_i32(header.correlation_id);
    buf.put_slice(payload);
    buf
}

/// Encodes a response frame body: `[ correlation_id i32 | payload ]`.
/// Does not include the `total_len` prefix; the transport codec adds it.
pub fn encode_response(correlation_id: i32, payload: &[u8]) -> BytesMut {
    let mut buf = BytesMut::with_capacity(4 + payload.len());
    buf.put_i32(correlation_id);
    buf.put_slice(payload);
    buf
}

/// Splits a decoded response frame body into its correlation id and payload.
pub fn decode_response(mut body: Bytes) -> Result<(i32, Bytes), FrameError> {
    if body.len() < 4 {
        return Err(FrameError::Truncated);
    }
    let correlation_id = body.get_i32();
    Ok((correlation_id, body))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_round_trips() {
        let header = RequestHeader {
            cmd: Command::Produce,
            api_version: 0,
            correlation_id: 7,
        };
        let encoded = encode_request(header, b"{}");
        let (decoded, payload) = decode_request(encoded.freeze()).unwrap();
        assert_eq!(decoded.cmd, Command::Produce);
        assert_eq!(decoded.correlation_id, 7);
        assert_eq!(&payload[..], b"{}");
    }

    #[test]
    fn response_round_trips() {
        let encoded = encode_response(11, b"{\"ok\":true}");
        let (correlation_id, payload) = decode_response(encoded.freeze()).unwrap();
        assert_eq!(correlation_id, 11);
        assert_eq!(&payload[..], b"{\"ok\":true}");
    }

    #[test]
    fn unknown_command_is_rejected() {
        let mut buf = BytesMut::new();
        buf.put_i16(999);
        buf.put_i16(0);
        buf.put_i32(1);
        assert!(matches!(
            decode_request(buf.freeze()),
            Err(FrameError::UnknownCommand(999))
        ));
    }
}
