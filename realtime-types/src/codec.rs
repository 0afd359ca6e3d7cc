//! JSON text-frame codec for the websocket wire protocol.
//!
//! One [`crate::InboundEnvelope`] or [`crate::OutboundEnvelope`] per frame.
//! Decoding enforces the configured `maxMessageSize` at the frame boundary;
//! everything past that is a hard failure the caller must treat as
//! [`close_codes::POLICY_VIOLATION`] (oversize).

use crate::InboundEnvelope;
use crate::OutboundEnvelope;

/// The default `maxMessageSize`, in bytes, applied when a deployment does not
/// override it (see `realtime-core`'s `RuntimeConfig`).
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 4096;

/// Standard WebSocket close codes used by the core.
pub mod close_codes {
    /// Graceful, expected closure.
    pub const NORMAL: u16 = 1000;
    /// The peer is going away (navigating off, shutting down).
    pub const GOING_AWAY: u16 = 1001;
    /// A policy was violated; includes oversize frames.
    pub const POLICY_VIOLATION: u16 = 1008;
    /// An unexpected internal error terminated the connection.
    pub const INTERNAL_ERROR: u16 = 1011;
}

/// Errors that can occur while decoding an inbound frame.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    /// The frame was larger than the configured `maxMessageSize`.
    #[error("frame of {actual} bytes exceeds the {limit} byte limit")]
    SizeExceeded {
        /// The configured limit.
        limit: usize,
        /// The actual frame size.
        actual: usize,
    },
    /// The frame was not a well-formed [`InboundEnvelope`].
    #[error("malformed envelope: {0}")]
    Malformed(#[from] serde_json::Error),
    /// The envelope's `type` tag was present but empty.
    #[error("message type must be a non-empty string")]
    EmptyType {
        /// The pid parsed from the envelope, if the client sent one.
        pid: Option<String>,
    },
}

/// Decodes one inbound frame, enforcing `max_message_size` first.
///
/// An unknown `type` tag is accepted here; routing it to the host's
/// `processClientMessage` callback is `realtime-core`'s responsibility.
pub fn decode_inbound(bytes: &[u8], max_message_size: usize) -> Result<InboundEnvelope, DecodeError> {
    if bytes.len() > max_message_size {
        return Err(DecodeError::SizeExceeded {
            limit: max_message_size,
            actual: bytes.len(),
        });
    }
    let envelope: InboundEnvelope = serde_json::from_slice(bytes)?;
    if envelope.kind.is_empty() {
        return Err(DecodeError::EmptyType { pid: envelope.pid });
    }
    Ok(envelope)
}

/// Encodes an outbound envelope as a JSON text frame.
///
/// # Panics
/// Never: [`OutboundEnvelope`] always serializes (its payload is an
/// arbitrary but already-constructed `serde_json::Value`).
pub fn encode_outbound(envelope: &OutboundEnvelope) -> String {
    serde_json::to_string(envelope).expect("OutboundEnvelope always serializes")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::inbound;

    #[test]
    fn rejects_oversize_frame() {
        let payload = serde_json::json!({"type": inbound::DATA_REQUEST, "payload": "x".repeat(100)});
        let bytes = serde_json::to_vec(&payload).unwrap();
        let err = decode_inbound(&bytes, 8).unwrap_err();
        assert!(matches!(err, DecodeError::SizeExceeded { limit: 8, .. }));
    }

    #[test]
    fn accepts_frame_at_exact_limit() {
        let bytes = serde_json::to_vec(&serde_json::json!({"type": "x"})).unwrap();
        let limit = bytes.len();
        assert!(decode_inbound(&bytes, limit).is_ok());
        assert!(decode_inbound(&bytes, limit - 1).is_err());
    }

    #[test]
    fn rejects_empty_type() {
        let bytes = serde_json::to_vec(&serde_json::json!({"type": ""})).unwrap();
        let err = decode_inbound(&bytes, DEFAULT_MAX_MESSAGE_SIZE).unwrap_err();
        assert!(matches!(err, DecodeError::EmptyType { pid: None }));
    }

    #[test]
    fn empty_type_carries_recovered_pid() {
        let bytes = serde_json::to_vec(&serde_json::json!({"pid": "a-1", "type": ""})).unwrap();
        let err = decode_inbound(&bytes, DEFAULT_MAX_MESSAGE_SIZE).unwrap_err();
        assert!(matches!(err, DecodeError::EmptyType { pid: Some(pid) } if pid == "a-1"));
    }

    #[test]
    fn unknown_type_tag_is_accepted() {
        let bytes = serde_json::to_vec(&serde_json::json!({"type": "custom_host_tag"})).unwrap();
        let decoded = decode_inbound(&bytes, DEFAULT_MAX_MESSAGE_SIZE).unwrap();
        assert_eq!(decoded.kind, "custom_host_tag");
    }

    #[test]
    fn round_trips_through_encode_decode() {
        let original = OutboundEnvelope::server_ack("a-1", "processed", None);
        let text = encode_outbound(&original);
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["type"], "server_ack");
    }
}
