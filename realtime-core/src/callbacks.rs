//! The callback surface a host application implements.
//!
//! A single [`Callbacks`] implementation is supplied per websocket module: it
//! authenticates upgrades, reacts to connect/disconnect, and routes every
//! inbound envelope the core does not consume internally (acks and matched
//! responses never reach `on_message`).

use std::sync::Arc;

use async_trait::async_trait;
use realtime_types::{AuthRequest, InboundEnvelope, UserId};

use crate::connection::{CloseReason, Connection};
use crate::error::HandlerError;
use crate::pid::{PidGenerator, UuidPidGenerator};

/// The host-supplied hooks the connection core invokes.
///
/// `UserData` is opaque to the core: whatever [`Callbacks::authenticate`]
/// returns is handed back unchanged on every subsequent callback via
/// [`Connection::user_data`].
#[async_trait]
pub trait Callbacks: Send + Sync + 'static {
    /// Per-connection data produced by authentication (claims, device info, ...).
    type UserData: Send + Sync + 'static;
    /// The error type [`Callbacks::authenticate`] rejects with.
    type AuthError: std::error::Error + Send + Sync + 'static;

    /// Validates an incoming upgrade and returns the user identity plus
    /// opaque user data, or rejects it. Any `Err` aborts the upgrade with
    /// HTTP 401; no [`Connection`] is ever created for a rejected attempt.
    async fn authenticate(
        &self,
        request: &AuthRequest<'_>,
    ) -> Result<(UserId, Self::UserData), Self::AuthError>;

    /// Runs once the connection is registered, before the read/write loops
    /// start dispatching. Returning `Err` aborts the session immediately:
    /// the connection is closed with that reason and no inbound message is
    /// ever dispatched.
    async fn on_connect(&self, _conn: &Arc<Connection<Self::UserData>>) -> Result<(), HandlerError> {
        Ok(())
    }

    /// Runs exactly once per connection that reached `Open`, during
    /// `Draining`. Fire-and-forget: the core does not act on what this
    /// returns, it only logs.
    async fn on_disconnect(&self, _conn: &Arc<Connection<Self::UserData>>, _reason: &CloseReason) {}

    /// Invoked for every inbound envelope that is not internally consumed.
    /// Invocations for a single connection are strictly sequential: the
    /// call for envelope N completes before envelope N+1 begins.
    async fn on_message(
        &self,
        conn: &Arc<Connection<Self::UserData>>,
        envelope: InboundEnvelope,
    ) -> Result<(), HandlerError>;

    /// Returns the pid generator used to mint server-originated pids.
    /// Defaults to random UUIDv4s, unique within the process lifetime.
    fn pid_generator(&self) -> Arc<dyn PidGenerator> {
        Arc::new(UuidPidGenerator)
    }
}
