//! Wire format for the tunnel: a text (JSON) frame kind and a binary
//! (UUID-prefixed) frame kind, both carried over a message-framed transport.
//!
//! Binary frame layout:
//! ```text
//! | request_id (36B ASCII UUID) | payload (NB) |
//! ```
//! A zero-length payload marks end-of-stream for that request.

use bytes::{Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Length of the canonical hyphenated UUID string prefix on binary frames.
pub const REQUEST_ID_LEN: usize = 36;

/// A decoded text frame: `{ "id": ..., "type": ..., "payload": ... }`.
#[derive(Debug, Clone, Deserialize)]
pub struct TextMessage {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub payload: serde_json::Value,
}

/// An outgoing text frame, built before serialisation.
#[derive(Debug, Serialize)]
pub struct OutgoingText<'a, T: Serialize> {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub kind: &'a str,
    pub payload: T,
}

/// A decoded binary chunk.
#[derive(Debug, Clone)]
pub struct BinaryChunk {
    pub request_id: Uuid,
    pub payload: Bytes,
}

impl BinaryChunk {
    pub fn is_end_of_stream(&self) -> bool {
        self.payload.is_empty()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("binary frame too short: expected at least {REQUEST_ID_LEN} bytes, got {0}")]
    BinaryTooShort(usize),
    #[error("binary frame has non-UUID request id prefix: {0}")]
    InvalidRequestId(#[source] uuid::Error),
    #[error("binary frame request id prefix is not valid UTF-8")]
    InvalidRequestIdEncoding,
    #[error("malformed JSON text frame: {0}")]
    InvalidJson(#[source] serde_json::Error),
}

/// Encode a text frame with an explicit id and type tag.
pub fn encode_text<T: Serialize>(id: Uuid, kind: &str, payload: &T) -> Result<String, ProtocolError> {
    serde_json::to_string(&OutgoingText {
        id,
        kind,
        payload,
    })
    .map_err(ProtocolError::InvalidJson)
}

/// Encode the lone handshake frame, which (by design, preceding
/// authentication) omits `id` and `type`.
pub fn encode_handshake(token: &str) -> String {
    serde_json::json!({ "token": token }).to_string()
}

/// Decode a text frame body into a [`TextMessage`].
pub fn decode_text(raw: &str) -> Result<TextMessage, ProtocolError> {
    serde_json::from_str(raw).map_err(ProtocolError::InvalidJson)
}

/// Encode a binary chunk: UUID prefix followed by payload bytes.
/// An empty `payload` produces the end-of-stream marker frame.
pub fn encode_binary(request_id: Uuid, payload: &[u8]) -> Bytes {
    let id_str = request_id.hyphenated().to_string();
    debug_assert_eq!(id_str.len(), REQUEST_ID_LEN);
    let mut buf = BytesMut::with_capacity(REQUEST_ID_LEN + payload.len());
    buf.extend_from_slice(id_str.as_bytes());
    buf.extend_from_slice(payload);
    buf.freeze()
}

/// Decode a binary frame into a [`BinaryChunk`].
pub fn decode_binary(mut data: Bytes) -> Result<BinaryChunk, ProtocolError> {
    if data.len() < REQUEST_ID_LEN {
        return Err(ProtocolError::BinaryTooShort(data.len()));
    }
    let id_bytes = data.split_to(REQUEST_ID_LEN);
    let id_str = std::str::from_utf8(&id_bytes).map_err(|_| ProtocolError::InvalidRequestIdEncoding)?;
    let request_id = id_str.parse::<Uuid>().map_err(ProtocolError::InvalidRequestId)?;
    Ok(BinaryChunk {
        request_id,
        payload: data,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_binary_frame() {
        let id = Uuid::new_v4();
        let encoded = encode_binary(id, b"hello");
        let decoded = decode_binary(encoded).unwrap();
        assert_eq!(decoded.request_id, id);
        assert_eq!(&decoded.payload[..], b"hello");
        assert!(!decoded.is_end_of_stream());
    }

    #[test]
    fn empty_payload_is_end_of_stream() {
        let id = Uuid::new_v4();
        let encoded = encode_binary(id, b"");
        let decoded = decode_binary(encoded).unwrap();
        assert!(decoded.is_end_of_stream());
    }

    #[test]
    fn rejects_short_binary_frame() {
        let err = decode_binary(Bytes::from_static(b"too-short")).unwrap_err();
        assert!(matches!(err, ProtocolError::BinaryTooShort(9)));
    }

    #[test]
    fn rejects_non_uuid_prefix() {
        let bogus = "x".repeat(REQUEST_ID_LEN);
        let err = decode_binary(Bytes::from(bogus.into_bytes())).unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidRequestId(_)));
    }

    #[test]
    fn round_trips_text_frame() {
        let id = Uuid::new_v4();
        let json = encode_text(id, "LIST_VIDEOS", &serde_json::json!({"camera_id": "cam1"})).unwrap();
        let msg = decode_text(&json).unwrap();
        assert_eq!(msg.id, id);
        assert_eq!(msg.kind, "LIST_VIDEOS");
        assert_eq!(msg.payload["camera_id"], "cam1");
    }
}
