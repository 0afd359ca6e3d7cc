//! The per-connection state machine: read loop, write loop, ping scheduler,
//! pending-request table, send queue, and close coordinator.

mod pending;
mod state;

pub use pending::AckOutcome;
pub(crate) use pending::RequestClosed;
pub use state::{CloseReason, ConnectionState};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures::stream::SplitSink;
use futures::{FutureExt, SinkExt, StreamExt};
use parking_lot::Mutex;
use realtime_types::codec::{decode_inbound, encode_outbound, DecodeError};
use realtime_types::envelope::inbound;
use realtime_types::{error_codes, AckPayload, OutboundEnvelope, UserId};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::callbacks::Callbacks;
use crate::config::RuntimeConfig;
use crate::error::{RequestError, SendError, SlowConsumer};
use crate::metrics::{
    METRICS_ID_ACK_TIMEOUT, METRICS_ID_CONNECTIONS_HANDLER_PANIC, METRICS_ID_CONNECTIONS_OPEN,
    METRICS_ID_CONNECTIONS_PONG_TIMEOUT, METRICS_ID_CONNECTIONS_SIZE_EXCEEDED,
    METRICS_ID_CONNECTIONS_WRITE_TIMEOUT, METRICS_ID_REQUEST_RESOLVED, METRICS_ID_REQUEST_TIMEOUT,
    METRICS_ID_SLOW_CONSUMER,
};
use crate::pid::PidGenerator;
use crate::registry::ConnectionManager;
use pending::{PendingAcks, PendingRequests};

/// A single outbound item produced by application code. Pings are sent
/// directly by the write loop and never enter this queue, so a slow
/// consumer cannot delay liveness probing.
enum OutboundFrame {
    Envelope(OutboundEnvelope),
}

/// A live (or just-closed) websocket session.
///
/// Attributes per the data model: a user identifier (assigned at
/// authentication time), a session identifier (the peer address, for logs),
/// opaque per-user data from the authenticator, a bounded outbound channel,
/// pending-acks and pending-requests tables, a closed flag, and a close
/// reason.
pub struct Connection<U> {
    user_id: UserId,
    session_id: String,
    user_data: Arc<U>,
    config: Arc<RuntimeConfig>,
    sender: mpsc::Sender<OutboundFrame>,
    pending_acks: PendingAcks,
    pending_requests: PendingRequests,
    state: Mutex<ConnectionState>,
    closed: AtomicBool,
    close_reason: Mutex<Option<CloseReason>>,
    cancel: CancellationToken,
    pid_generator: Arc<dyn PidGenerator>,
    /// Abort handles for the read/write tasks, set once they are spawned.
    /// Used by [`crate::registry::ConnectionManager::shutdown`] to force a
    /// connection closed once its deadline has elapsed.
    task_handles: Mutex<Option<(tokio::task::AbortHandle, tokio::task::AbortHandle)>>,
}

impl<U> Connection<U> {
    /// The user identifier assigned at authentication time.
    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    /// The session identifier (peer address), for logging/diagnostics only.
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// The opaque per-connection data the authenticator produced.
    pub fn user_data(&self) -> &U {
        &self.user_data
    }

    /// The connection's current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        *self.state.lock()
    }

    /// Mints a fresh pid via the host's [`PidGenerator`].
    pub fn generate_pid(&self) -> String {
        self.pid_generator.generate()
    }

    /// Enqueues `msg` for the write loop.
    ///
    /// Succeeds if the send queue has capacity; otherwise fails immediately
    /// with [`SendError::SlowConsumer`] without blocking the caller. A
    /// single slow-consumer failure does not close the connection; policy
    /// is left to the caller.
    pub fn send_message(&self, msg: OutboundEnvelope) -> Result<(), SendError> {
        self.enqueue(OutboundFrame::Envelope(msg))
    }

    /// Convenience form of [`Connection::send_message`] producing a
    /// `server_ack` envelope.
    pub fn send_server_ack(
        &self,
        original_pid: impl Into<String>,
        status: impl Into<String>,
        err: Option<String>,
    ) -> Result<(), SendError> {
        self.send_message(OutboundEnvelope::server_ack(original_pid, status, err))
    }

    /// Convenience form of [`Connection::send_message`] producing an
    /// `error_notification` envelope referencing `original_pid`.
    pub fn send_error_notification(
        &self,
        original_pid: Option<String>,
        code: u16,
        message: impl Into<String>,
    ) -> Result<(), SendError> {
        self.send_message(OutboundEnvelope::error_notification(original_pid, code, message))
    }

    /// Registers `pid` in the pending-acks table with the configured
    /// `ackTimeout` deadline.
    ///
    /// A handler opts into ack tracking explicitly by calling this before
    /// (or right after) enqueueing the corresponding message; consuming a
    /// matching `client_ack` resolves the returned receiver with its status,
    /// and the background sweeper resolves it with a `"timeout"` status if
    /// none arrives in time.
    pub fn track_ack(&self, pid: impl Into<String>) -> oneshot::Receiver<AckOutcome> {
        self.pending_acks.track(pid.into(), self.config.ack_timeout)
    }

    /// Sends `msg` and blocks until a matching `generic_response` arrives,
    /// `timeout` elapses, or the connection closes.
    ///
    /// Assigns a fresh pid if `msg.pid` is `None`. Resolves exactly once.
    pub async fn send_request(
        &self,
        mut msg: OutboundEnvelope,
        timeout: Duration,
    ) -> Result<Value, RequestError> {
        let pid = msg.pid.clone().unwrap_or_else(|| self.generate_pid());
        msg.pid = Some(pid.clone());

        let rx = self.pending_requests.register(pid.clone());
        self.send_message(msg)?;

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(Ok(value))) => {
                ::metrics::counter!(METRICS_ID_REQUEST_RESOLVED).increment(1);
                Ok(value)
            }
            Ok(Ok(Err(RequestClosed))) => Err(RequestError::Cancelled),
            Ok(Err(_recv_error)) => Err(RequestError::Cancelled),
            Err(_elapsed) => {
                self.pending_requests.cancel(&pid);
                ::metrics::counter!(METRICS_ID_REQUEST_TIMEOUT).increment(1);
                Err(RequestError::Timeout)
            }
        }
    }

    /// Idempotently initiates the close sequence.
    ///
    /// A second call is a no-op: `on_disconnect` runs exactly once no matter
    /// how many times (or from how many places) `close` is invoked.
    pub fn close(&self, reason: CloseReason) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        *self.close_reason.lock() = Some(reason);
        self.cancel.cancel();
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Aborts the read and write tasks outright, bypassing the cooperative
    /// close sequence. Used once a shutdown deadline has elapsed and a
    /// connection is still open despite having been asked to close.
    pub(crate) fn force_abort(&self) {
        self.close(CloseReason::Shutdown);
        if let Some((write, read)) = self.task_handles.lock().as_ref() {
            write.abort();
            read.abort();
        }
    }

    fn enqueue(&self, frame: OutboundFrame) -> Result<(), SendError> {
        if self.is_closed() {
            return Err(SendError::Closed);
        }
        match self.sender.try_send(frame) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => {
                ::metrics::counter!(METRICS_ID_SLOW_CONSUMER).increment(1);
                Err(SlowConsumer.into())
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(SendError::Closed),
        }
    }

    fn set_state(&self, state: ConnectionState) {
        *self.state.lock() = state;
    }
}

#[cfg(test)]
impl<U: Default> Connection<U> {
    /// Builds a standalone, already-`Open` connection with no socket behind
    /// it, for exercising [`crate::registry::ConnectionManager`] and the
    /// send-side API without driving a real websocket. The outbound channel
    /// is drained by a background task so sends never fail on a dropped
    /// receiver.
    pub(crate) fn new_for_test(user_id: UserId, config: Arc<RuntimeConfig>) -> Arc<Self> {
        let (conn, mut receiver) = Self::new_for_test_undrained(user_id, config);
        tokio::spawn(async move { while receiver.recv().await.is_some() {} });
        conn
    }

    /// Like [`Connection::new_for_test`], but leaves the outbound channel
    /// undrained so backpressure tests can fill it deterministically.
    fn new_for_test_undrained(
        user_id: UserId,
        config: Arc<RuntimeConfig>,
    ) -> (Arc<Self>, mpsc::Receiver<OutboundFrame>) {
        let (sender, receiver) = mpsc::channel(config.send_channel_buffer);
        let conn = Arc::new(Self {
            user_id,
            session_id: "test".to_owned(),
            user_data: Arc::new(U::default()),
            config,
            sender,
            pending_acks: PendingAcks::default(),
            pending_requests: PendingRequests::default(),
            state: Mutex::new(ConnectionState::Open),
            closed: AtomicBool::new(false),
            close_reason: Mutex::new(None),
            cancel: CancellationToken::new(),
            pid_generator: Arc::new(crate::pid::UuidPidGenerator),
            task_handles: Mutex::new(None),
        });
        (conn, receiver)
    }
}

/// Drives one connection end to end: registers it, runs `on_connect`, spawns
/// the read and write loops, runs `on_disconnect`, and deregisters it.
///
/// A panic inside `on_connect` or the read loop's `on_message` dispatch is
/// recovered and treated as [`CloseReason::HandlerPanic`].
pub(crate) async fn run<C: Callbacks>(
    mut socket: WebSocket,
    user_id: UserId,
    session_id: String,
    user_data: C::UserData,
    config: Arc<RuntimeConfig>,
    handler: Arc<C>,
    manager: ConnectionManager<C::UserData>,
) {
    let (sender, receiver) = mpsc::channel(config.send_channel_buffer);
    let conn = Arc::new(Connection {
        user_id,
        session_id,
        user_data: Arc::new(user_data),
        config: Arc::clone(&config),
        sender,
        pending_acks: PendingAcks::default(),
        pending_requests: PendingRequests::default(),
        state: Mutex::new(ConnectionState::Opening),
        closed: AtomicBool::new(false),
        close_reason: Mutex::new(None),
        cancel: CancellationToken::new(),
        pid_generator: handler.pid_generator(),
        task_handles: Mutex::new(None),
    });

    if !manager.insert(Arc::clone(&conn)) {
        // Lost the race against a `shutdown()` that started after the
        // upgrade handler's own draining check passed but before this
        // connection reached the registry. No loop ever ran for it, so
        // there is nothing to drain; just drop the socket.
        tracing::debug!(user_id = %user_id, "dropping connection: manager is draining");
        let _ = socket.close().await;
        return;
    }

    let close_reason = match run_guarded(handler.on_connect(&conn)).await {
        Ok(Ok(())) => {
            conn.set_state(ConnectionState::Open);
            ::metrics::gauge!(METRICS_ID_CONNECTIONS_OPEN).increment(1.0);
            let reason = drive_open_connection(socket, receiver, Arc::clone(&conn), Arc::clone(&handler)).await;
            ::metrics::gauge!(METRICS_ID_CONNECTIONS_OPEN).decrement(1.0);
            reason
        }
        Ok(Err(handler_err)) => {
            tracing::warn!(user_id = %user_id, "on_connect rejected session: {handler_err}");
            CloseReason::ServerClosed(handler_err.0)
        }
        Err(()) => {
            ::metrics::counter!(METRICS_ID_CONNECTIONS_HANDLER_PANIC).increment(1);
            CloseReason::HandlerPanic
        }
    };

    conn.close(close_reason.clone());
    conn.set_state(ConnectionState::Draining);
    conn.pending_acks.fail_all();
    conn.pending_requests.fail_all();

    handler.on_disconnect(&conn, &close_reason).await;

    manager.remove(&conn);
    conn.set_state(ConnectionState::Closed);
    tracing::debug!(user_id = %conn.user_id, reason = %close_reason, "connection closed");
}

/// Runs `fut` inside [`std::panic::AssertUnwindSafe`], converting a panic
/// into `Err(())`. Callback bodies are host-supplied code the core must not
/// let take the whole connection (or process) down with it.
async fn run_guarded<F: std::future::Future>(fut: F) -> Result<F::Output, ()> {
    std::panic::AssertUnwindSafe(fut).catch_unwind().await.map_err(|_| ())
}

/// Splits the socket, spawns read/write loops, and waits for either to exit.
async fn drive_open_connection<C: Callbacks>(
    socket: WebSocket,
    receiver: mpsc::Receiver<OutboundFrame>,
    conn: Arc<Connection<C::UserData>>,
    handler: Arc<C>,
) -> CloseReason {
    let (sink, stream) = socket.split();
    let cancel = conn.cancel.clone();

    let write_conn = Arc::clone(&conn);
    let mut write_handle = tokio::spawn(async move { write_loop(sink, receiver, write_conn).await });

    let read_conn = Arc::clone(&conn);
    let mut read_handle = tokio::spawn(async move { read_loop(stream, read_conn, handler).await });

    *conn.task_handles.lock() = Some((write_handle.abort_handle(), read_handle.abort_handle()));

    // When the write loop exits first (write timeout, or cancellation from a
    // handler calling `close` directly) the read loop has nothing left to
    // hand off to, so it is aborted. When the read loop exits first (client
    // closed, pong timeout, oversize frame, handler panic) the write loop is
    // left running so it can flush a best-effort close frame carrying that
    // reason before exiting on its own.
    let loop_reason = tokio::select! {
        write_result = &mut write_handle => {
            cancel.cancel();
            read_handle.abort();
            write_result.unwrap_or(CloseReason::WriteTimeout)
        }
        read_result = &mut read_handle => {
            let reason = read_result.unwrap_or_else(|_| CloseReason::ReadError("read task panicked".to_owned()));
            conn.close(reason.clone());
            let _ = (&mut write_handle).await;
            reason
        }
    };

    // `close()` may already have recorded a more specific reason (e.g. a
    // handler calling `Connection::close` directly); prefer that.
    conn.close_reason.lock().clone().unwrap_or(loop_reason)
}

/// Sends queued envelopes and periodic pings until cancelled, then attempts
/// one best-effort close frame carrying the connection's final reason.
async fn write_loop<U>(
    mut sink: SplitSink<WebSocket, Message>,
    mut receiver: mpsc::Receiver<OutboundFrame>,
    conn: Arc<Connection<U>>,
) -> CloseReason {
    let mut ping_interval = tokio::time::interval(conn.config.effective_ping_period());
    ping_interval.tick().await; // first tick fires immediately; consume it

    loop {
        tokio::select! {
            _ = conn.cancel.cancelled() => break,
            _ = ping_interval.tick() => {
                let expired = conn.pending_acks.sweep_expired();
                if expired > 0 {
                    ::metrics::counter!(METRICS_ID_ACK_TIMEOUT).increment(expired as u64);
                }
                if send_with_timeout(&mut sink, Message::Ping(Vec::new().into()), conn.config.write_wait)
                    .await
                    .is_err()
                {
                    ::metrics::counter!(METRICS_ID_CONNECTIONS_WRITE_TIMEOUT).increment(1);
                    conn.close(CloseReason::WriteTimeout);
                    break;
                }
            }
            frame = receiver.recv() => {
                match frame {
                    Some(OutboundFrame::Envelope(envelope)) => {
                        let text = encode_outbound(&envelope);
                        if send_with_timeout(&mut sink, Message::text(text), conn.config.write_wait)
                            .await
                            .is_err()
                        {
                            ::metrics::counter!(METRICS_ID_CONNECTIONS_WRITE_TIMEOUT).increment(1);
                            conn.close(CloseReason::WriteTimeout);
                            break;
                        }
                    }
                    None => break,
                }
            }
        }
    }

    let reason = conn.close_reason.lock().clone().unwrap_or(CloseReason::Shutdown);
    let close_frame = CloseFrame {
        code: reason.close_code(),
        reason: reason.wire_reason().into(),
    };
    let _ = send_with_timeout(&mut sink, Message::Close(Some(close_frame)), conn.config.write_wait).await;
    let _ = sink.close().await;
    reason
}

async fn send_with_timeout(
    sink: &mut SplitSink<WebSocket, Message>,
    message: Message,
    write_wait: Duration,
) -> Result<(), ()> {
    match tokio::time::timeout(write_wait, sink.send(message)).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(_)) | Err(_) => Err(()),
    }
}

/// Reads frames until the peer closes, an error occurs, or `pongWait`
/// elapses without any frame arriving.
///
/// Generic over the stream type (rather than concrete `SplitStream<WebSocket>`)
/// so a unit test can drive it with a stand-in stream that never yields, in
/// place of a real socket, to exercise the `pongWait` timeout deterministically.
async fn read_loop<C: Callbacks, S>(mut stream: S, conn: Arc<Connection<C::UserData>>, handler: Arc<C>) -> CloseReason
where
    S: futures::Stream<Item = Result<Message, axum::Error>> + Unpin,
{
    loop {
        let next = tokio::time::timeout(conn.config.pong_wait, stream.next()).await;
        let message = match next {
            Err(_elapsed) => {
                ::metrics::counter!(METRICS_ID_CONNECTIONS_PONG_TIMEOUT).increment(1);
                return CloseReason::PongTimeout;
            }
            Ok(None) => return CloseReason::ClientClosed,
            Ok(Some(Err(err))) => return CloseReason::ReadError(err.to_string()),
            Ok(Some(Ok(message))) => message,
        };

        match message {
            Message::Close(_) => return CloseReason::ClientClosed,
            Message::Ping(_) | Message::Pong(_) => {}
            Message::Text(text) => {
                if let Err(reason) = dispatch_bytes(text.as_bytes(), &conn, &handler).await {
                    return reason;
                }
            }
            Message::Binary(bytes) => {
                if let Err(reason) = dispatch_bytes(&bytes, &conn, &handler).await {
                    return reason;
                }
            }
        }

        if conn.is_closed() {
            return conn.close_reason.lock().clone().unwrap_or(CloseReason::Shutdown);
        }
    }
}

/// Decodes one frame and either consumes it internally (acks, responses) or
/// dispatches it to [`Callbacks::on_message`].
async fn dispatch_bytes<C: Callbacks>(
    bytes: &[u8],
    conn: &Arc<Connection<C::UserData>>,
    handler: &Arc<C>,
) -> Result<(), CloseReason> {
    let envelope = match decode_inbound(bytes, conn.config.max_message_size) {
        Ok(envelope) => envelope,
        Err(DecodeError::SizeExceeded { limit, actual }) => {
            ::metrics::counter!(METRICS_ID_CONNECTIONS_SIZE_EXCEEDED).increment(1);
            return Err(CloseReason::SizeExceeded { limit, actual });
        }
        Err(err) => {
            // Malformed frames are reported to the sender and otherwise
            // ignored; only an oversize frame is fatal to the connection.
            // A frame that parsed but carried an empty `type` still has a
            // recoverable pid; anything that failed to parse at all does not.
            let pid = match &err {
                DecodeError::EmptyType { pid } => pid.clone(),
                _ => None,
            };
            let _ = conn.send_error_notification(pid, error_codes::BAD_REQUEST, err.to_string());
            return Ok(());
        }
    };

    match envelope.kind.as_str() {
        inbound::CLIENT_ACK => {
            if let Ok(ack) = serde_json::from_value::<AckPayload>(envelope.payload.clone()) {
                conn.pending_acks.resolve(&ack.acknowledged_pid, ack.status, ack.error);
            }
        }
        inbound::GENERIC_RESPONSE => {
            if let Some(pid) = envelope.pid.clone() {
                conn.pending_requests.resolve(&pid, envelope.payload.clone());
            }
        }
        _ => match run_guarded(handler.on_message(conn, envelope)).await {
            Ok(Ok(())) => {}
            Ok(Err(handler_err)) => {
                tracing::warn!(user_id = %conn.user_id, "on_message returned an error: {handler_err}");
            }
            Err(()) => {
                ::metrics::counter!(METRICS_ID_CONNECTIONS_HANDLER_PANIC).increment(1);
                return Err(CloseReason::HandlerPanic);
            }
        },
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn envelope() -> OutboundEnvelope {
        OutboundEnvelope::server_ack("p1", "processed", None)
    }

    #[tokio::test]
    async fn slow_consumer_after_buffer_full_does_not_close_connection() {
        let mut config = RuntimeConfig::default();
        config.send_channel_buffer = 2;
        let (conn, _receiver) = Connection::<()>::new_for_test_undrained(UserId(1), Arc::new(config));

        assert!(conn.send_message(envelope()).is_ok());
        assert!(conn.send_message(envelope()).is_ok());
        assert!(matches!(
            conn.send_message(envelope()),
            Err(SendError::SlowConsumer(_))
        ));
        assert_eq!(conn.state(), ConnectionState::Open);
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let conn = Connection::<()>::new_for_test(UserId(1), Arc::new(RuntimeConfig::default()));
        conn.close(CloseReason::ClientClosed);
        conn.close(CloseReason::PongTimeout);
        assert_eq!(
            conn.close_reason.lock().clone(),
            Some(CloseReason::ClientClosed)
        );
    }

    #[tokio::test]
    async fn track_ack_resolves_via_client_ack() {
        let conn = Connection::<()>::new_for_test(UserId(1), Arc::new(RuntimeConfig::default()));
        let rx = conn.track_ack("p1");
        conn.pending_acks.resolve("p1", "processed".to_owned(), None);
        let outcome = rx.await.unwrap();
        assert_eq!(outcome.status, "processed");
    }

    #[tokio::test]
    async fn track_ack_expires_via_sweeper() {
        let mut config = RuntimeConfig::default();
        config.ack_timeout = Duration::from_millis(1);
        let conn = Connection::<()>::new_for_test(UserId(1), Arc::new(config));
        let rx = conn.track_ack("p1");
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert_eq!(conn.pending_acks.sweep_expired(), 1);
        let outcome = rx.await.unwrap();
        assert_eq!(outcome.status, "timeout");
    }

    /// A `Callbacks` impl that is never actually called: this test drives
    /// `read_loop` with a stream that never yields, so the loop must exit on
    /// its own via the `pongWait` deadline before any callback would fire.
    struct SilentHandler;

    #[async_trait::async_trait]
    impl Callbacks for SilentHandler {
        type UserData = ();
        type AuthError = std::io::Error;

        async fn authenticate(
            &self,
            _request: &realtime_types::AuthRequest<'_>,
        ) -> Result<(UserId, Self::UserData), Self::AuthError> {
            unreachable!("read_loop never authenticates")
        }

        async fn on_message(
            &self,
            _conn: &Arc<Connection<Self::UserData>>,
            _envelope: realtime_types::InboundEnvelope,
        ) -> Result<(), crate::error::HandlerError> {
            unreachable!("a pending stream never yields a frame to dispatch")
        }
    }

    #[tokio::test]
    async fn read_loop_closes_with_pong_timeout_when_peer_is_silent() {
        let mut config = RuntimeConfig::default();
        config.pong_wait = Duration::from_millis(5);
        let conn = Connection::<()>::new_for_test(UserId(1), Arc::new(config));
        let stream = futures::stream::pending::<Result<Message, axum::Error>>();

        let reason = read_loop(stream, conn, Arc::new(SilentHandler)).await;
        assert_eq!(reason, CloseReason::PongTimeout);
    }
}
