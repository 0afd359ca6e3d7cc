//! Liveness endpoint.
//!
//! Returns `200 OK` with a small JSON body as long as the process can still
//! answer HTTP requests; it does not probe individual connections.

use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;
use serde::Serialize;

use crate::api::upgrade::UpgradeState;
use crate::callbacks::Callbacks;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct HealthBody {
    status: &'static str,
    connections: usize,
    users_online: usize,
}

pub(crate) async fn health<C: Callbacks>(State(state): State<UpgradeState<C>>) -> impl IntoResponse {
    Json(HealthBody {
        status: "ok",
        connections: state.manager.connection_count(),
        users_online: state.manager.user_count(),
    })
}
