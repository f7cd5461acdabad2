//! Length-prefixed codec for TCP framing
//!
//! All messages are framed as:
//! ```text
//! [ 4 bytes: length (u32, big-endian) ][ N bytes: protobuf message ]
//! ```
//!
//! This ensures message boundaries are preserved over TCP streams.
//! Command output is never truncated, so the frame limit is generous and
//! only guards against garbage length prefixes.

use std::marker::PhantomData;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use prost::Message;
use thiserror::Error;

/// Maximum frame payload size (256 MB)
pub const MAX_FRAME_SIZE: u32 = 256 * 1024 * 1024;

/// Errors that can occur during encoding/decoding
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Message too large: {len} bytes (max: {max})")]
    MessageTooLarge { len: usize, max: u32 },

    #[error("Invalid message length prefix: {0}")]
    InvalidLength(u32),

    #[error("Protobuf decode error: {0}")]
    DecodeError(#[from] prost::DecodeError),

    #[error("Protobuf encode error: {0}")]
    EncodeError(#[from] prost::EncodeError),
}

/// Encode a message into a length-prefixed byte buffer
pub fn encode<M: Message>(message: &M) -> Result<Bytes, CodecError> {
    let mut buf = BytesMut::new();
    encode_into(message, &mut buf)?;
    Ok(buf.freeze())
}

/// Encode a message, refusing payloads larger than `max_len` bytes
pub fn encode_with_limit<M: Message>(message: &M, max_len: u32) -> Result<Bytes, CodecError> {
    let mut buf = BytesMut::new();
    encode_limited(message, &mut buf, max_len)?;
    Ok(buf.freeze())
}

/// Encode a message directly into a provided buffer
pub fn encode_into<M: Message>(message: &M, buf: &mut BytesMut) -> Result<(), CodecError> {
    encode_limited(message, buf, MAX_FRAME_SIZE)
}

fn encode_limited<M: Message>(
    message: &M,
    buf: &mut BytesMut,
    max_len: u32,
) -> Result<(), CodecError> {
    let msg_len = message.encoded_len();

    if msg_len > max_len as usize {
        return Err(CodecError::MessageTooLarge {
            len: msg_len,
            max: max_len,
        });
    }

    buf.reserve(4 + msg_len);
    buf.put_u32(msg_len as u32);
    message.encode(buf)?;

    Ok(())
}

/// Try to decode a length-prefixed message from a buffer
///
/// Returns:
/// - `Ok(Some(message))` if a complete message was decoded
/// - `Ok(None)` if more data is needed
/// - `Err(...)` if the data is invalid
pub fn decode<M: Message + Default>(buf: &mut BytesMut) -> Result<Option<M>, CodecError> {
    if buf.len() < 4 {
        return Ok(None);
    }

    // Peek at the length prefix without consuming
    let msg_len = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]);

    if msg_len > MAX_FRAME_SIZE {
        return Err(CodecError::InvalidLength(msg_len));
    }

    let total_len = 4 + msg_len as usize;
    if buf.len() < total_len {
        return Ok(None);
    }

    buf.advance(4);
    let msg_bytes = buf.split_to(msg_len as usize);

    Ok(Some(M::decode(msg_bytes)?))
}

/// Decoder state machine for streaming decoding of one message type
#[derive(Debug)]
pub struct FrameDecoder<M> {
    /// Partial frame data being accumulated
    buffer: BytesMut,
    _message: PhantomData<fn() -> M>,
}

impl<M: Message + Default> FrameDecoder<M> {
    /// Create a new frame decoder
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(4096),
            _message: PhantomData,
        }
    }

    /// Add data to the decoder buffer
    pub fn extend(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Try to decode the next frame from the buffer
    ///
    /// Call this repeatedly until it returns `Ok(None)` to drain all complete frames
    pub fn decode_next(&mut self) -> Result<Option<M>, CodecError> {
        decode(&mut self.buffer)
    }

    /// Number of buffered bytes not yet decoded
    pub fn buffer_len(&self) -> usize {
        self.buffer.len()
    }
}

impl<M: Message + Default> Default for FrameDecoder<M> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{CallHeader, CallReply, CallRequest, ErrorKind, Request, Response, CALL_METHOD};

    fn create_test_call() -> CallRequest {
        CallRequest::call(1, Request::new("echo").with_arg("name", "world"))
    }

    #[test]
    fn test_encode_decode_call() {
        let original = create_test_call();

        let encoded = encode(&original).expect("encode failed");

        let len_prefix = u32::from_be_bytes([encoded[0], encoded[1], encoded[2], encoded[3]]);
        assert_eq!(len_prefix as usize, encoded.len() - 4);

        let mut buf = BytesMut::from(&encoded[..]);
        let decoded: CallRequest = decode(&mut buf).expect("decode failed").expect("no message");

        assert_eq!(decoded, original);
        assert!(buf.is_empty(), "buffer should be empty after decode");
    }

    #[test]
    fn test_reply_preserves_empty_output_and_exit_code() {
        let reply = CallReply::response(
            CallHeader::new(CALL_METHOD, 9),
            Response {
                exit_code: 7,
                stdout: String::new(),
                stderr: String::new(),
            },
        );

        let encoded = encode(&reply).expect("encode failed");
        let mut buf = BytesMut::from(&encoded[..]);
        let decoded: CallReply = decode(&mut buf).expect("decode failed").expect("no message");

        assert_eq!(decoded, reply);
    }

    #[test]
    fn test_partial_decode() {
        let encoded = encode(&create_test_call()).expect("encode failed");

        let mut buf = BytesMut::from(&encoded[..5]);
        let result: Option<CallRequest> =
            decode(&mut buf).expect("decode should not fail on partial data");
        assert!(result.is_none(), "should return None for partial data");

        // Buffer should be unchanged (data not consumed)
        assert_eq!(buf.len(), 5);
    }

    #[test]
    fn test_frame_decoder() {
        let call = create_test_call();
        let encoded = encode(&call).expect("encode failed");

        let mut decoder = FrameDecoder::<CallRequest>::new();

        decoder.extend(&encoded[..5]);
        assert!(decoder.decode_next().expect("decode error").is_none());

        decoder.extend(&encoded[5..]);
        let decoded = decoder
            .decode_next()
            .expect("decode error")
            .expect("should have message");

        assert_eq!(decoded, call);
        assert_eq!(decoder.buffer_len(), 0);
    }

    #[test]
    fn test_multiple_frames() {
        let first = CallReply::error(CallHeader::new(CALL_METHOD, 1), ErrorKind::UnknownMethod, "x");
        let second = CallReply::response(CallHeader::new(CALL_METHOD, 2), Response::default());

        let mut buf = BytesMut::new();
        encode_into(&first, &mut buf).expect("encode failed");
        encode_into(&second, &mut buf).expect("encode failed");

        let mut decoder = FrameDecoder::<CallReply>::new();
        decoder.extend(&buf);

        assert_eq!(decoder.decode_next().expect("decode error"), Some(first));
        assert_eq!(decoder.decode_next().expect("decode error"), Some(second));
        assert!(decoder.decode_next().expect("decode error").is_none());
    }

    #[test]
    fn test_message_too_large() {
        let mut buf = BytesMut::new();
        buf.put_u32(MAX_FRAME_SIZE + 1);
        buf.put_bytes(0, 100);

        let result = decode::<CallRequest>(&mut buf);
        assert!(matches!(result, Err(CodecError::InvalidLength(_))));
    }

    #[test]
    fn test_encode_respects_limit() {
        let reply = CallReply::response(
            CallHeader::new(CALL_METHOD, 3),
            Response {
                exit_code: 0,
                stdout: "x".repeat(200),
                stderr: String::new(),
            },
        );

        let result = encode_with_limit(&reply, 64);
        assert!(matches!(
            result,
            Err(CodecError::MessageTooLarge { len, max: 64 }) if len > 200
        ));

        let encoded = encode_with_limit(&reply, 1024).expect("encode failed");
        assert_eq!(encoded, encode(&reply).expect("encode failed"));
    }
}
