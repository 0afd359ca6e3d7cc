//! The websocket upgrade handler: origin check, shutdown-draining check,
//! authentication, then a connection handed off to [`crate::connection::run`].

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::connect_info::ConnectInfo;
use axum::extract::{State, WebSocketUpgrade};
use axum::http::{header, HeaderMap, StatusCode, Uri};
use axum::response::{IntoResponse, Response};

use realtime_types::AuthRequest;

use crate::callbacks::Callbacks;
use crate::config::RuntimeConfig;
use crate::connection;
use crate::registry::ConnectionManager;

/// Shared state behind the upgrade and health handlers.
pub struct UpgradeState<C: Callbacks> {
    pub(crate) config: Arc<RuntimeConfig>,
    pub(crate) handler: Arc<C>,
    pub(crate) manager: ConnectionManager<C::UserData>,
}

impl<C: Callbacks> Clone for UpgradeState<C> {
    fn clone(&self) -> Self {
        Self {
            config: Arc::clone(&self.config),
            handler: Arc::clone(&self.handler),
            manager: self.manager.clone(),
        }
    }
}

/// Handles one upgrade attempt: checks `Origin` (when sent), rejects if the
/// manager is draining, authenticates, and hands a successfully-authenticated
/// socket off to the connection runtime. A rejected origin, a draining
/// manager, or failed authentication never creates a [`crate::Connection`]
/// at all.
pub(crate) async fn upgrade<C: Callbacks>(
    State(state): State<UpgradeState<C>>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    uri: Uri,
    ws: WebSocketUpgrade,
) -> Response {
    let origin_allowed = headers
        .get(header::ORIGIN)
        .and_then(|value| value.to_str().ok())
        .map(|origin| state.config.is_origin_allowed(origin))
        .unwrap_or(true);
    if !origin_allowed {
        return (StatusCode::FORBIDDEN, "origin not allowed").into_response();
    }
    if state.manager.is_draining() {
        return (StatusCode::SERVICE_UNAVAILABLE, "server is shutting down").into_response();
    }

    let auth_request = AuthRequest::new(&headers, &uri);
    let (user_id, user_data) = match state.handler.authenticate(&auth_request).await {
        Ok(pair) => pair,
        Err(err) => {
            tracing::debug!("rejected websocket upgrade: {err}");
            return (StatusCode::UNAUTHORIZED, err.to_string()).into_response();
        }
    };

    let session_id = connect_info
        .map(|ConnectInfo(addr)| addr.to_string())
        .unwrap_or_else(|| "unknown".to_owned());

    let config = Arc::clone(&state.config);
    let handler = Arc::clone(&state.handler);
    let manager = state.manager.clone();

    ws.max_message_size(state.config.max_message_size)
        .on_failed_upgrade(|err| {
            tracing::warn!("websocket upgrade failed: {err}");
        })
        .on_upgrade(move |socket| async move {
            connection::run::<C>(socket, user_id, session_id, user_data, config, handler, manager).await;
        })
}
