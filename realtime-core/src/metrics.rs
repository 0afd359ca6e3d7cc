//! Metrics definitions for the connection core.
//!
//! This module defines all metrics keys emitted by the runtime and provides
//! a helper, [`describe_metrics`], to set metadata for each metric using the
//! `metrics` crate. Host applications should call this once during startup,
//! before installing a metrics exporter.

/// Number of currently open connections (summed across all users).
pub const METRICS_ID_CONNECTIONS_OPEN: &str = "realtime.core.connections.open";
/// Number of distinct users with at least one open connection.
pub const METRICS_ID_USERS_ONLINE: &str = "realtime.core.users.online";
/// Number of connections closed due to a pong-wait timeout.
pub const METRICS_ID_CONNECTIONS_PONG_TIMEOUT: &str = "realtime.core.connections.pong_timeout";
/// Number of connections closed due to a write timeout.
pub const METRICS_ID_CONNECTIONS_WRITE_TIMEOUT: &str = "realtime.core.connections.write_timeout";
/// Number of connections closed due to an oversize inbound frame.
pub const METRICS_ID_CONNECTIONS_SIZE_EXCEEDED: &str = "realtime.core.connections.size_exceeded";
/// Number of connections closed due to a panic in the on-message callback.
pub const METRICS_ID_CONNECTIONS_HANDLER_PANIC: &str = "realtime.core.connections.handler_panic";
/// Number of `sendMessage` calls that failed because the send queue was full.
pub const METRICS_ID_SLOW_CONSUMER: &str = "realtime.core.send.slow_consumer";
/// Number of pending-ack entries that expired before a `client_ack` arrived.
pub const METRICS_ID_ACK_TIMEOUT: &str = "realtime.core.ack.timeout";
/// Number of `sendRequest` calls that resolved via timeout.
pub const METRICS_ID_REQUEST_TIMEOUT: &str = "realtime.core.request.timeout";
/// Number of `sendRequest` calls that resolved via a matching response.
pub const METRICS_ID_REQUEST_RESOLVED: &str = "realtime.core.request.resolved";
/// Duration of `shutdown`, from invocation to every connection reaching `Closed`.
pub const METRICS_ID_SHUTDOWN_DURATION: &str = "realtime.core.shutdown.duration";

/// Describes all metrics used by the runtime.
///
/// Calls the `describe_*` functions from the `metrics` crate to set units and
/// human-readable descriptions for each metric key above.
pub fn describe_metrics() {
    metrics::describe_gauge!(
        METRICS_ID_CONNECTIONS_OPEN,
        metrics::Unit::Count,
        "Number of currently open websocket connections"
    );
    metrics::describe_gauge!(
        METRICS_ID_USERS_ONLINE,
        metrics::Unit::Count,
        "Number of distinct users with at least one open connection"
    );
    metrics::describe_counter!(
        METRICS_ID_CONNECTIONS_PONG_TIMEOUT,
        metrics::Unit::Count,
        "Number of connections closed because no pong arrived within pongWait"
    );
    metrics::describe_counter!(
        METRICS_ID_CONNECTIONS_WRITE_TIMEOUT,
        metrics::Unit::Count,
        "Number of connections closed because a frame write exceeded writeWait"
    );
    metrics::describe_counter!(
        METRICS_ID_CONNECTIONS_SIZE_EXCEEDED,
        metrics::Unit::Count,
        "Number of connections closed because an inbound frame exceeded maxMessageSize"
    );
    metrics::describe_counter!(
        METRICS_ID_CONNECTIONS_HANDLER_PANIC,
        metrics::Unit::Count,
        "Number of connections closed because the on-message callback panicked"
    );
    metrics::describe_counter!(
        METRICS_ID_SLOW_CONSUMER,
        metrics::Unit::Count,
        "Number of sendMessage calls that failed because the send queue was full"
    );
    metrics::describe_counter!(
        METRICS_ID_ACK_TIMEOUT,
        metrics::Unit::Count,
        "Number of pending-ack entries that expired before a client_ack arrived"
    );
    metrics::describe_counter!(
        METRICS_ID_REQUEST_TIMEOUT,
        metrics::Unit::Count,
        "Number of sendRequest calls that resolved via timeout"
    );
    metrics::describe_counter!(
        METRICS_ID_REQUEST_RESOLVED,
        metrics::Unit::Count,
        "Number of sendRequest calls that resolved via a matching response"
    );
    metrics::describe_histogram!(
        METRICS_ID_SHUTDOWN_DURATION,
        metrics::Unit::Milliseconds,
        "Duration of shutdown, from invocation to every connection reaching Closed"
    );
}
