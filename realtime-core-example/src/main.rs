//! Minimal chat relay built on `realtime-core`.
//!
//! Authenticates an upgrade from a `user_id` query parameter (no real
//! credential check: this binary exists to exercise the connection core end
//! to end, not to demonstrate an authentication scheme), then relays
//! `data_request` envelopes to their `targetUserId` and broadcasts
//! `presence_update` envelopes to every other connection.

use std::process::ExitCode;
use std::sync::Arc;

use async_trait::async_trait;
use clap::Parser;
use realtime_core::{
    envelope::{inbound, outbound},
    AuthRequest, Callbacks, CloseReason, Connection, ConnectionManager, HandlerError,
    InboundEnvelope, OutboundEnvelope, RuntimeConfig, UserId,
};
use tokio_util::sync::CancellationToken;

#[derive(Debug, thiserror::Error)]
enum ExampleAuthError {
    #[error("missing or invalid user_id query parameter")]
    MissingUserId,
}

struct ChatRelay {
    manager: ConnectionManager<()>,
}

#[async_trait]
impl Callbacks for ChatRelay {
    type UserData = ();
    type AuthError = ExampleAuthError;

    async fn authenticate(
        &self,
        request: &AuthRequest<'_>,
    ) -> Result<(UserId, Self::UserData), Self::AuthError> {
        let user_id: u64 = request
            .query_param("user_id")
            .and_then(|value| value.parse().ok())
            .ok_or(ExampleAuthError::MissingUserId)?;
        Ok((UserId(user_id), ()))
    }

    async fn on_connect(&self, conn: &Arc<Connection<()>>) -> Result<(), HandlerError> {
        tracing::info!(user_id = %conn.user_id(), "connected");
        let presence = OutboundEnvelope {
            pid: None,
            kind: outbound::PRESENCE_EVENT.to_owned(),
            from_user_id: Some(conn.user_id()),
            payload: serde_json::json!({"state": "online"}),
            error: None,
        };
        self.manager.broadcast_to_all(&presence);
        Ok(())
    }

    async fn on_disconnect(&self, conn: &Arc<Connection<()>>, reason: &CloseReason) {
        tracing::info!(user_id = %conn.user_id(), %reason, "disconnected");
        let presence = OutboundEnvelope {
            pid: None,
            kind: outbound::PRESENCE_EVENT.to_owned(),
            from_user_id: Some(conn.user_id()),
            payload: serde_json::json!({"state": "offline"}),
            error: None,
        };
        self.manager.broadcast_to_all(&presence);
    }

    async fn on_message(
        &self,
        conn: &Arc<Connection<()>>,
        envelope: InboundEnvelope,
    ) -> Result<(), HandlerError> {
        match envelope.kind.as_str() {
            inbound::DATA_REQUEST => {
                let Some(target) = envelope.target_user_id else {
                    conn.send_error_notification(envelope.pid.clone(), 400, "targetUserId is required")
                        .map_err(HandlerError::new)?;
                    return Ok(());
                };
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
                        "delivered"
                    } else {
                        "offline"
                    };
                    conn.send_server_ack(pid, status, None).map_err(HandlerError::new)?;
                }
                Ok(())
            }
            inbound::PRESENCE_UPDATE => {
                let event = OutboundEnvelope {
                    pid: None,
                    kind: outbound::PRESENCE_EVENT.to_owned(),
                    from_user_id: Some(conn.user_id()),
                    payload: envelope.payload,
                    error: None,
                };
                self.manager.broadcast_to_all(&event);
                Ok(())
            }
            other => {
                tracing::debug!(kind = other, "ignoring unrecognized message type");
                Ok(())
            }
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();
    realtime_core::metrics::describe_metrics();

    let config = Arc::new(RuntimeConfig::parse());
    if let Err(err) = config.validate() {
        tracing::error!("invalid configuration: {err}");
        return ExitCode::FAILURE;
    }

    let manager = ConnectionManager::new();
    let handler = Arc::new(ChatRelay {
        manager: manager.clone(),
    });
    let router = realtime_core::api::router(Arc::clone(&config), handler, manager.clone());

    let listener = match tokio::net::TcpListener::bind(config.bind_addr).await {
        Ok(listener) => listener,
        Err(err) => {
            tracing::error!("could not bind {}: {err}", config.bind_addr);
            return ExitCode::FAILURE;
        }
    };
    tracing::info!("listening on {}", config.bind_addr);

    let cancel = CancellationToken::new();
    let shutdown_signal = cancel.clone();
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("shutdown signal received");
        shutdown_signal.cancel();
    });

    let server_cancel = cancel.clone();
    let server = axum::serve(
        listener,
        router.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .with_graceful_shutdown(async move { server_cancel.cancelled().await });

    if let Err(err) = server.await {
        tracing::error!("server error: {err}");
        return ExitCode::FAILURE;
    }

    tracing::info!("draining open connections...");
    if !manager.shutdown(std::time::Duration::from_secs(10)).await {
        tracing::warn!("some connections did not drain before the deadline");
    }
    ExitCode::SUCCESS
}
