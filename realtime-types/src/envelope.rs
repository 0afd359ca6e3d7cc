//! Inbound and outbound message envelopes exchanged over the websocket.
//!
//! Both envelope shapes are intentionally small and closed: the `type` tag
//! selects behavior the core understands (acks, responses, presence), while
//! everything else travels inside `payload` for the host application to
//! interpret. See [`inbound`] and [`outbound`] for the recognized tags.

use serde::{Deserialize, Serialize};

use crate::UserId;

/// Type tags recognized on the inbound (client -> server) side.
pub mod inbound {
    /// A generic application request, routed to the host by `processClientMessage`.
    pub const DATA_REQUEST: &str = "data_request";
    /// A client reporting a presence change (e.g. "away", "typing").
    pub const PRESENCE_UPDATE: &str = "presence_update";
    /// Acknowledges a previously sent server message; consumed by the core.
    pub const CLIENT_ACK: &str = "client_ack";
    /// A reply to a [`crate::envelope::outbound::GENERIC_REQUEST`]; consumed by the core
    /// when its `pid` matches a pending request.
    pub const GENERIC_RESPONSE: &str = "generic_response";
    /// A client-initiated request that expects a [`crate::envelope::outbound::GENERIC_RESPONSE`].
    pub const GENERIC_REQUEST: &str = "generic_request";
}

/// Type tags recognized on the outbound (server -> client) side.
pub mod outbound {
    /// A generic application event pushed to a user.
    pub const DATA_EVENT: &str = "data_event";
    /// A presence change broadcast to interested peers.
    pub const PRESENCE_EVENT: &str = "presence_event";
    /// Acknowledges receipt/processing of a client message.
    pub const SERVER_ACK: &str = "server_ack";
    /// A server-initiated request awaiting a [`crate::envelope::inbound::GENERIC_RESPONSE`].
    pub const GENERIC_REQUEST: &str = "generic_request";
    /// A response to a client's [`crate::envelope::inbound::GENERIC_REQUEST`].
    pub const GENERIC_RESPONSE: &str = "generic_response";
    /// Reports a recoverable failure tied to an originating `pid`.
    pub const ERROR_NOTIFICATION: &str = "error_notification";
}

/// A message received from a client.
///
/// Decoded by [`crate::codec::decode_inbound`]. A missing `pid` is legal;
/// only handlers that need a correlatable reply must mint one via
/// [`crate::Callbacks::generate_pid`]... see `realtime-core` for the callback
/// surface that consumes this type.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InboundEnvelope {
    /// Pending-identifier used to correlate an ack or response with this message.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub pid: Option<String>,
    /// The closed-set type tag. Unknown tags are accepted and handed to the host.
    #[serde(rename = "type")]
    pub kind: String,
    /// The peer this message addresses, if it is a targeted send.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub target_user_id: Option<UserId>,
    /// Free-form, host-defined payload.
    #[serde(default = "default_payload")]
    pub payload: serde_json::Value,
}

/// A message sent to a client.
///
/// Produced by [`crate::codec::encode_outbound`].
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboundEnvelope {
    /// Pending-identifier; echoes the originating request's `pid` for acks/responses.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub pid: Option<String>,
    /// The closed-set type tag.
    #[serde(rename = "type")]
    pub kind: String,
    /// The originator of this message. `None`/[`UserId::SYSTEM`] means "system".
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub from_user_id: Option<UserId>,
    /// Free-form, host-defined payload.
    #[serde(default = "default_payload")]
    pub payload: serde_json::Value,
    /// Present on [`outbound::ERROR_NOTIFICATION`] messages (and optionally elsewhere).
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub error: Option<ErrorDescriptor>,
}

fn default_payload() -> serde_json::Value {
    serde_json::Value::Null
}

/// A stable, user-visible error descriptor attached to outbound envelopes.
///
/// `code` reuses HTTP status semantics (400, 401, 403, 404, 409, 500, 501) per
/// [`crate::error_codes`].
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorDescriptor {
    /// The `pid` of the message that caused this error, if any.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub original_pid: Option<String>,
    /// Stable numeric code.
    pub code: u16,
    /// Short, human-readable message.
    pub message: String,
}

/// The payload of a [`inbound::CLIENT_ACK`] or [`outbound::SERVER_ACK`] envelope.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AckPayload {
    /// The `pid` of the message being acknowledged.
    pub acknowledged_pid: String,
    /// A short status token ("received", "processed", "pong", "error", ...).
    pub status: String,
    /// An optional error message when `status` indicates failure.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub error: Option<String>,
}

impl OutboundEnvelope {
    /// Builds a `server_ack` envelope acknowledging `original_pid`.
    pub fn server_ack(
        original_pid: impl Into<String>,
        status: impl Into<String>,
        error: Option<String>,
    ) -> Self {
        let ack = AckPayload {
            acknowledged_pid: original_pid.into(),
            status: status.into(),
            error,
        };
        Self {
            pid: None,
            kind: outbound::SERVER_ACK.to_owned(),
            from_user_id: None,
            payload: serde_json::to_value(ack).expect("AckPayload always serializes"),
            error: None,
        }
    }

    /// Builds an `error_notification` envelope referencing `original_pid`.
    pub fn error_notification(original_pid: Option<String>, code: u16, message: impl Into<String>) -> Self {
        Self {
            pid: None,
            kind: outbound::ERROR_NOTIFICATION.to_owned(),
            from_user_id: None,
            payload: serde_json::Value::Null,
            error: Some(ErrorDescriptor {
                original_pid,
                code,
                message: message.into(),
            }),
        }
    }
}
