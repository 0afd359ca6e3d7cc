//! Error kinds surfaced across the connection core's public API.
//!
//! See `§7 Error Handling Design`-equivalent behavior: most of these are
//! typed so callers can decide policy (log, close, retry) rather than the
//! core silently choosing for them.

/// Returned by [`crate::Connection::send_message`] and its convenience
/// wrappers when the outbound queue has no capacity.
///
/// The connection is *not* closed on a single slow-consumer failure; policy
/// is left to the caller.
#[derive(Debug, Clone, Copy, thiserror::Error)]
#[error("send queue is full (slow consumer)")]
pub struct SlowConsumer;

/// Returned by [`crate::Connection::send_message`] and its convenience wrappers.
#[derive(Debug, thiserror::Error)]
pub enum SendError {
    /// The outbound queue had no capacity; the caller decides whether to
    /// retry, log, or escalate.
    #[error(transparent)]
    SlowConsumer(#[from] SlowConsumer),
    /// The connection has already closed; nothing was enqueued.
    #[error("connection is closed")]
    Closed,
}

/// Returned by [`crate::Connection::send_request`].
#[derive(Debug, thiserror::Error)]
pub enum RequestError {
    /// No capacity to enqueue the outbound request.
    #[error(transparent)]
    Send(#[from] SendError),
    /// `requestTimeout` elapsed before a matching `generic_response` arrived.
    #[error("request timed out waiting for a response")]
    Timeout,
    /// The connection closed while the request was pending.
    #[error("connection closed while awaiting response")]
    Cancelled,
}

/// Returned by [`crate::Callbacks`] hooks (`on_connect`, `on_message`).
///
/// An `on_connect` error aborts the session immediately. An `on_message`
/// error is logged; the connection is not closed on its account (the
/// handler is expected to have already sent an `error_notification` when
/// appropriate).
#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct HandlerError(pub String);

impl HandlerError {
    /// Wraps any displayable error as a [`HandlerError`].
    pub fn new(err: impl std::fmt::Display) -> Self {
        Self(err.to_string())
    }
}
