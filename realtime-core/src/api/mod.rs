//! Axum wiring: the websocket upgrade endpoint and the liveness endpoint.

pub mod health;
pub mod upgrade;

use std::sync::Arc;

use axum::Router;
use tower_http::trace::TraceLayer;

use crate::callbacks::Callbacks;
use crate::config::RuntimeConfig;
use crate::registry::ConnectionManager;

/// Builds the router for one websocket module: the upgrade endpoint at
/// `config.ws_path` and the liveness endpoint at `config.health_path`.
///
/// Takes the [`ConnectionManager`] as an argument rather than creating one,
/// so the host can hold the same handle the handler itself uses to fan out
/// messages (e.g. routing an inbound `data_request` to its `targetUserId`).
pub fn router<C: Callbacks>(
    config: Arc<RuntimeConfig>,
    handler: Arc<C>,
    manager: ConnectionManager<C::UserData>,
) -> Router {
    let state = upgrade::UpgradeState {
        config: Arc::clone(&config),
        handler,
        manager,
    };
    Router::new()
        .route(&config.ws_path, axum::routing::any(upgrade::upgrade::<C>))
        .route(&config.health_path, axum::routing::get(health::health::<C>))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}
