//! End-to-end exercises against the full upgrade -> connection -> registry
//! path, driven over real (in-process) websockets via `axum-test`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum_test::TestServer;
use parking_lot::Mutex;
use realtime_core::{
    envelope::{inbound, outbound},
    AuthRequest, Callbacks, Connection, ConnectionManager, HandlerError, InboundEnvelope,
    OutboundEnvelope, RequestError, RuntimeConfig, UserId,
};
use serde_json::{json, Value};

#[derive(Debug, thiserror::Error)]
#[error("missing or invalid user_id query parameter")]
struct TestAuthError;

/// Holds the outcome of a server-initiated `send_request`, written to by a
/// task spawned from `on_message` so the test can poll it.
#[derive(Default)]
struct RequestCapture {
    result: Mutex<Option<Result<Value, RequestError>>>,
}

struct TestHandler {
    manager: ConnectionManager<()>,
    capture: Arc<RequestCapture>,
}

#[async_trait]
impl Callbacks for TestHandler {
    type UserData = ();
    type AuthError = TestAuthError;

    async fn authenticate(
        &self,
        request: &AuthRequest<'_>,
    ) -> Result<(UserId, Self::UserData), Self::AuthError> {
        let user_id: u64 = request
            .query_param("user_id")
            .and_then(|value| value.parse().ok())
            .ok_or(TestAuthError)?;
        Ok((UserId(user_id), ()))
    }

    async fn on_message(
        &self,
        conn: &Arc<Connection<()>>,
        envelope: InboundEnvelope,
    ) -> Result<(), HandlerError> {
        match envelope.kind.as_str() {
            // Scenario 1/2: relay to the target user, ack the sender with a
            // status reflecting whether anyone was actually online.
            inbound::DATA_REQUEST => {
                let target = envelope
                    .target_user_id
                    .expect("test always sets targetUserId on data_request");
                let event = OutboundEnvelope {
                    pid: envelope.pid.clone(),
                    kind: outbound::DATA_EVENT.to_owned(),
                    from_user_id: Some(conn.user_id()),
                    payload: envelope.payload,
                    error: None,
                };
                let outcome = self.manager.send_message_to_user(target, &event);
                if let Some(pid) = envelope.pid {
                    let status = if outcome.delivered_to_any() {
                        "processed_and_saved"
                    } else {
                        "persisted_pending"
                    };
                    conn.send_server_ack(pid, status, None).map_err(HandlerError::new)?;
                }
                Ok(())
            }
            // Scenario 3: a client message is used as the test harness's way
            // to ask the server to open a `sendRequest` toward this same
            // connection; the spec leaves the trigger unspecified.
            inbound::PRESENCE_UPDATE if envelope.payload["action"] == "ask_client_info" => {
                let conn = Arc::clone(conn);
                let capture = Arc::clone(&self.capture);
                tokio::spawn(async move {
                    let request = OutboundEnvelope {
                        pid: None,
                        kind: outbound::GENERIC_REQUEST.to_owned(),
                        from_user_id: None,
                        payload: json!({"ask": "client_info"}),
                        error: None,
                    };
                    let result = conn.send_request(request, Duration::from_millis(200)).await;
                    *capture.result.lock() = Some(result);
                });
                Ok(())
            }
            _ => Ok(()),
        }
    }
}

fn build_server(config: RuntimeConfig) -> (TestServer, ConnectionManager<()>, Arc<RequestCapture>) {
    let config = Arc::new(config);
    let manager = ConnectionManager::new();
    let capture = Arc::new(RequestCapture::default());
    let handler = Arc::new(TestHandler {
        manager: manager.clone(),
        capture: Arc::clone(&capture),
    });
    let router = realtime_core::api::router(config, handler, manager.clone());
    let server = TestServer::builder()
        .http_transport()
        .build(router)
        .expect("test server builds");
    (server, manager, capture)
}

async fn wait_for<T>(mut poll: impl FnMut() -> Option<T>, timeout: Duration) -> T {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if let Some(value) = poll() {
            return value;
        }
        if tokio::time::Instant::now() >= deadline {
            panic!("condition did not become true within {timeout:?}");
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

#[tokio::test]
async fn happy_path_chat_delivers_event_and_ack() {
    let (server, _manager, _capture) = build_server(RuntimeConfig::default());

    let mut a = server
        .get_websocket("/ws")
        .add_query_param("user_id", "10")
        .await
        .into_websocket()
        .await;
    let mut b = server
        .get_websocket("/ws")
        .add_query_param("user_id", "20")
        .await
        .into_websocket()
        .await;

    a.send_json(&json!({
        "pid": "a-1",
        "type": inbound::DATA_REQUEST,
        "targetUserId": 20,
        "payload": {"action": "send_message", "resource": "chat", "data": {"text": "hi"}},
    }))
    .await;

    let event: OutboundEnvelope = b.receive_json().await;
    assert_eq!(event.kind, outbound::DATA_EVENT);
    assert_eq!(event.from_user_id, Some(UserId(10)));
    assert_eq!(event.payload["data"]["text"], "hi");

    let ack: OutboundEnvelope = a.receive_json().await;
    assert_eq!(ack.kind, outbound::SERVER_ACK);
    assert_eq!(ack.payload["acknowledgedPid"], "a-1");
    assert_eq!(ack.payload["status"], "processed_and_saved");
}

#[tokio::test]
async fn offline_recipient_gets_persisted_pending_ack() {
    let (server, _manager, _capture) = build_server(RuntimeConfig::default());

    let mut a = server
        .get_websocket("/ws")
        .add_query_param("user_id", "10")
        .await
        .into_websocket()
        .await;

    a.send_json(&json!({
        "pid": "a-1",
        "type": inbound::DATA_REQUEST,
        "targetUserId": 20,
        "payload": {"action": "send_message", "resource": "chat", "data": {"text": "hi"}},
    }))
    .await;

    let ack: OutboundEnvelope = a.receive_json().await;
    assert_eq!(ack.kind, outbound::SERVER_ACK);
    assert_eq!(ack.payload["status"], "persisted_pending");
}

#[tokio::test]
async fn request_response_correlation_resolves_with_peer_reply() {
    let (server, _manager, capture) = build_server(RuntimeConfig::default());

    let mut a = server
        .get_websocket("/ws")
        .add_query_param("user_id", "1")
        .await
        .into_websocket()
        .await;

    a.send_json(&json!({"type": inbound::PRESENCE_UPDATE, "payload": {"action": "ask_client_info"}}))
        .await;

    let request: OutboundEnvelope = a.receive_json().await;
    assert_eq!(request.kind, outbound::GENERIC_REQUEST);
    let pid = request.pid.expect("server request carries a pid");

    a.send_json(&json!({"type": inbound::GENERIC_RESPONSE, "pid": pid, "payload": {"tz": "UTC"}}))
        .await;

    let resolved = wait_for(|| capture.result.lock().take(), Duration::from_secs(1)).await;
    let value = resolved.expect("send_request resolves with a value");
    assert_eq!(value["tz"], "UTC");
}

#[tokio::test]
async fn request_times_out_when_no_response_arrives() {
    let (server, _manager, capture) = build_server(RuntimeConfig::default());

    let mut a = server
        .get_websocket("/ws")
        .add_query_param("user_id", "1")
        .await
        .into_websocket()
        .await;

    a.send_json(&json!({"type": inbound::PRESENCE_UPDATE, "payload": {"action": "ask_client_info"}}))
        .await;
    let _request: OutboundEnvelope = a.receive_json().await;

    let resolved = wait_for(|| capture.result.lock().take(), Duration::from_secs(1)).await;
    assert!(matches!(resolved, Err(RequestError::Timeout)));
}

#[tokio::test]
async fn broadcast_reaches_every_connected_user() {
    let (server, manager, _capture) = build_server(RuntimeConfig::default());

    let mut a = server
        .get_websocket("/ws")
        .add_query_param("user_id", "1")
        .await
        .into_websocket()
        .await;
    let mut b = server
        .get_websocket("/ws")
        .add_query_param("user_id", "2")
        .await
        .into_websocket()
        .await;

    wait_for(|| (manager.user_count() == 2).then_some(()), Duration::from_secs(1)).await;

    let announcement = OutboundEnvelope {
        pid: None,
        kind: outbound::PRESENCE_EVENT.to_owned(),
        from_user_id: None,
        payload: json!({"state": "maintenance"}),
        error: None,
    };
    assert_eq!(manager.broadcast_to_all(&announcement), 2);

    let a_event: OutboundEnvelope = a.receive_json().await;
    let b_event: OutboundEnvelope = b.receive_json().await;
    assert_eq!(a_event.kind, outbound::PRESENCE_EVENT);
    assert_eq!(b_event.kind, outbound::PRESENCE_EVENT);
}

#[tokio::test]
async fn shutdown_drains_open_connections_within_deadline() {
    let (server, manager, _capture) = build_server(RuntimeConfig::default());

    // Kept open (not dropped) for the rest of the test: `shutdown` must be
    // the one to close these, not the client hanging up first.
    let mut sockets = Vec::new();
    for user_id in 0..5u64 {
        let ws = server
            .get_websocket("/ws")
            .add_query_param("user_id", user_id.to_string())
            .await
            .into_websocket()
            .await;
        sockets.push(ws);
    }

    wait_for(|| (manager.connection_count() == 5).then_some(()), Duration::from_secs(1)).await;

    let drained = manager.shutdown(Duration::from_secs(2)).await;
    assert!(drained, "all connections should close before the deadline");
    assert_eq!(manager.connection_count(), 0);
    assert_eq!(manager.user_count(), 0);
    drop(sockets);
}
