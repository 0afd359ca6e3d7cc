//! The per-connection state machine and close reasons.

use realtime_types::codec::close_codes;

/// A connection's lifecycle state.
///
/// `Opening -> Open -> Draining -> Closed`. `Closed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Upgrade in progress; authentication and `on_connect` have not yet completed.
    Opening,
    /// Normal operation: read and write loops are running.
    Open,
    /// Shutting down: loops are exiting, `on_disconnect` is about to run (or has).
    Draining,
    /// Terminal. Registry removal has completed.
    Closed,
}

/// Why a connection moved out of `Open`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// The peer sent a close frame or dropped the socket.
    ClientClosed,
    /// Decoding the inbound stream failed (not a size violation).
    ReadError(String),
    /// A single frame write exceeded `writeWait`.
    WriteTimeout,
    /// No pong arrived within `pongWait`.
    PongTimeout,
    /// An inbound frame exceeded `maxMessageSize`.
    SizeExceeded {
        /// The configured limit.
        limit: usize,
        /// The actual frame size.
        actual: usize,
    },
    /// The `on_message` (or `on_connect`) callback panicked.
    HandlerPanic,
    /// `Connection::close` was called directly (e.g. by a handler).
    ServerClosed(String),
    /// The connection manager initiated a shutdown.
    Shutdown,
}

impl CloseReason {
    /// The WebSocket close code this reason maps to.
    pub fn close_code(&self) -> u16 {
        match self {
            CloseReason::ClientClosed => close_codes::NORMAL,
            CloseReason::ReadError(_) => close_codes::INTERNAL_ERROR,
            CloseReason::WriteTimeout => close_codes::INTERNAL_ERROR,
            CloseReason::PongTimeout => close_codes::POLICY_VIOLATION,
            CloseReason::SizeExceeded { .. } => close_codes::POLICY_VIOLATION,
            CloseReason::HandlerPanic => close_codes::INTERNAL_ERROR,
            CloseReason::ServerClosed(_) => close_codes::NORMAL,
            CloseReason::Shutdown => close_codes::GOING_AWAY,
        }
    }

    /// A short, wire-safe reason string for the close frame.
    pub fn wire_reason(&self) -> String {
        match self {
            CloseReason::ClientClosed => "client closed".to_owned(),
            CloseReason::ReadError(err) => format!("read error: {err}"),
            CloseReason::WriteTimeout => "write timeout".to_owned(),
            CloseReason::PongTimeout => "pong timeout".to_owned(),
            CloseReason::SizeExceeded { limit, actual } => {
                format!("frame of {actual} bytes exceeds limit of {limit} bytes")
            }
            CloseReason::HandlerPanic => "internal error".to_owned(),
            CloseReason::ServerClosed(reason) => reason.clone(),
            CloseReason::Shutdown => "server shutting down".to_owned(),
        }
    }
}

impl std::fmt::Display for CloseReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.wire_reason())
    }
}
