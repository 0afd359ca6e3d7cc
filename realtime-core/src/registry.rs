//! The connection registry: tracks every open connection by user, and
//! answers online/broadcast/shutdown queries against it.
//!
//! Backed by a single `parking_lot::RwLock` rather than a sharded map or
//! `dashmap`: reads (fan-out sends, `is_user_online`) vastly outnumber
//! writes (connect/disconnect), and a single lock keeps the invariant
//! "a user with no connections has no entry" trivial to maintain under one
//! critical section per mutation.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use realtime_types::{OutboundEnvelope, UserId};

use crate::connection::Connection;
use crate::metrics::{METRICS_ID_SHUTDOWN_DURATION, METRICS_ID_USERS_ONLINE};

/// Result of [`ConnectionManager::send_message_to_user`].
///
/// Distinguished from a plain count so a handler can tell "nobody was home"
/// (persist and notify later) apart from "delivery was attempted" (log and
/// move on), per-connection slow-consumer failures notwithstanding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// The user had no open connection; nothing was enqueued.
    NotOnline,
    /// The user had at least one connection; `delivered` is how many of
    /// them the message was actually enqueued for (the rest were slow
    /// consumers).
    Online {
        /// Number of connections the message was enqueued on.
        delivered: usize,
        /// Number of connections whose send queue was full.
        failed: usize,
    },
}

impl DeliveryOutcome {
    /// `true` unless the user was offline or every connection was a slow consumer.
    pub fn delivered_to_any(&self) -> bool {
        matches!(self, DeliveryOutcome::Online { delivered, .. } if *delivered > 0)
    }
}

/// Shared handle to the live connection set for one websocket module.
///
/// Cheap to clone; every clone refers to the same underlying registry.
pub struct ConnectionManager<U> {
    inner: Arc<RwLock<HashMap<UserId, Vec<Arc<Connection<U>>>>>>,
    draining: Arc<AtomicBool>,
}

impl<U> Clone for ConnectionManager<U> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            draining: Arc::clone(&self.draining),
        }
    }
}

impl<U> Default for ConnectionManager<U> {
    fn default() -> Self {
        Self {
            inner: Arc::new(RwLock::new(HashMap::new())),
            draining: Arc::new(AtomicBool::new(false)),
        }
    }
}

impl<U> ConnectionManager<U> {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a newly-opened connection under its user id.
    ///
    /// Returns `false` without registering anything once [`ConnectionManager::shutdown`]
    /// has started draining — the caller (the upgrade handler, or `connection::run` as a
    /// last-resort race guard) must close the socket instead of dispatching to it.
    pub(crate) fn insert(&self, conn: Arc<Connection<U>>) -> bool {
        if self.is_draining() {
            return false;
        }
        let mut registry = self.inner.write();
        let entry = registry.entry(conn.user_id()).or_default();
        let was_offline = entry.is_empty();
        entry.push(conn);
        if was_offline {
            ::metrics::gauge!(METRICS_ID_USERS_ONLINE).increment(1.0);
        }
        true
    }

    /// Deregisters a connection, removing the user's entry entirely once
    /// their last connection is gone.
    pub(crate) fn remove(&self, conn: &Connection<U>) {
        let mut registry = self.inner.write();
        let Some(entry) = registry.get_mut(&conn.user_id()) else {
            return;
        };
        let target: *const Connection<U> = conn;
        entry.retain(|candidate| !std::ptr::eq(Arc::as_ptr(candidate), target));
        if entry.is_empty() {
            registry.remove(&conn.user_id());
            ::metrics::gauge!(METRICS_ID_USERS_ONLINE).decrement(1.0);
        }
    }

    /// Returns `true` once [`ConnectionManager::shutdown`] has been called.
    ///
    /// New upgrades must be rejected while this holds; existing connections
    /// are unaffected until `shutdown`'s own close-and-drain sequence reaches them.
    pub fn is_draining(&self) -> bool {
        self.draining.load(Ordering::SeqCst)
    }

    /// Returns `true` if `user_id` has at least one open connection.
    pub fn is_user_online(&self, user_id: UserId) -> bool {
        self.inner
            .read()
            .get(&user_id)
            .is_some_and(|conns| !conns.is_empty())
    }

    /// Number of distinct users with at least one open connection.
    pub fn user_count(&self) -> usize {
        self.inner.read().len()
    }

    /// Total number of open connections, summed across all users.
    pub fn connection_count(&self) -> usize {
        self.inner.read().values().map(Vec::len).sum()
    }

    /// Sends `msg` to every connection `user_id` currently has open.
    ///
    /// Per-connection backpressure (a full send queue) does not abort
    /// delivery to the user's other connections.
    pub fn send_message_to_user(&self, user_id: UserId, msg: &OutboundEnvelope) -> DeliveryOutcome {
        let registry = self.inner.read();
        let Some(conns) = registry.get(&user_id).filter(|conns| !conns.is_empty()) else {
            return DeliveryOutcome::NotOnline;
        };
        let delivered = conns.iter().filter(|conn| conn.send_message(msg.clone()).is_ok()).count();
        DeliveryOutcome::Online {
            delivered,
            failed: conns.len() - delivered,
        }
    }

    /// Sends `msg` to every open connection across every user.
    pub fn broadcast_to_all(&self, msg: &OutboundEnvelope) -> usize {
        let registry = self.inner.read();
        registry
            .values()
            .flatten()
            .filter(|conn| conn.send_message(msg.clone()).is_ok())
            .count()
    }

    /// Blocks new upgrades, closes every open connection with
    /// [`crate::CloseReason::Shutdown`], and waits (bounded by `deadline`)
    /// for the registry to drain.
    ///
    /// Returns `true` if the registry was empty before `deadline` elapsed.
    pub async fn shutdown(&self, deadline: Duration) -> bool {
        self.draining.store(true, Ordering::SeqCst);
        {
            let registry = self.inner.read();
            for conn in registry.values().flatten() {
                conn.close(crate::connection::CloseReason::Shutdown);
            }
        }

        let start = tokio::time::Instant::now();
        let poll_interval = Duration::from_millis(20).min(deadline);
        loop {
            if self.connection_count() == 0 {
                ::metrics::histogram!(METRICS_ID_SHUTDOWN_DURATION)
                    .record(start.elapsed().as_millis() as f64);
                return true;
            }
            if start.elapsed() >= deadline {
                let registry = self.inner.read();
                for conn in registry.values().flatten() {
                    conn.force_abort();
                }
                ::metrics::histogram!(METRICS_ID_SHUTDOWN_DURATION)
                    .record(start.elapsed().as_millis() as f64);
                return false;
            }
            tokio::time::sleep(poll_interval).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RuntimeConfig;
    use crate::connection::Connection;

    fn test_envelope() -> OutboundEnvelope {
        OutboundEnvelope::server_ack("p1", "processed", None)
    }

    #[tokio::test]
    async fn offline_user_yields_not_online() {
        let manager: ConnectionManager<()> = ConnectionManager::new();
        assert!(!manager.is_user_online(UserId(1)));
        assert_eq!(
            manager.send_message_to_user(UserId(1), &test_envelope()),
            DeliveryOutcome::NotOnline
        );
    }

    #[tokio::test]
    async fn insert_and_remove_tracks_online_state() {
        let manager: ConnectionManager<()> = ConnectionManager::new();
        let config = Arc::new(RuntimeConfig::default());
        let conn = Connection::<()>::new_for_test(UserId(1), config);

        manager.insert(Arc::clone(&conn));
        assert!(manager.is_user_online(UserId(1)));
        assert_eq!(manager.user_count(), 1);
        assert_eq!(manager.connection_count(), 1);

        let outcome = manager.send_message_to_user(UserId(1), &test_envelope());
        assert_eq!(outcome, DeliveryOutcome::Online { delivered: 1, failed: 0 });
        assert!(outcome.delivered_to_any());

        manager.remove(&conn);
        assert!(!manager.is_user_online(UserId(1)));
        assert_eq!(manager.user_count(), 0);
    }

    #[tokio::test]
    async fn remove_is_idempotent_and_only_affects_matching_connection() {
        let manager: ConnectionManager<()> = ConnectionManager::new();
        let config = Arc::new(RuntimeConfig::default());
        let first = Connection::<()>::new_for_test(UserId(1), Arc::clone(&config));
        let second = Connection::<()>::new_for_test(UserId(1), config);

        manager.insert(Arc::clone(&first));
        manager.insert(Arc::clone(&second));
        assert_eq!(manager.connection_count(), 2);

        manager.remove(&first);
        assert_eq!(manager.connection_count(), 1);
        assert!(manager.is_user_online(UserId(1)));

        // removing an already-removed connection is a no-op
        manager.remove(&first);
        assert_eq!(manager.connection_count(), 1);

        manager.remove(&second);
        assert_eq!(manager.connection_count(), 0);
        assert!(!manager.is_user_online(UserId(1)));
    }

    #[tokio::test]
    async fn broadcast_reaches_every_connection_across_users() {
        let manager: ConnectionManager<()> = ConnectionManager::new();
        let config = Arc::new(RuntimeConfig::default());
        manager.insert(Connection::<()>::new_for_test(UserId(1), Arc::clone(&config)));
        manager.insert(Connection::<()>::new_for_test(UserId(2), Arc::clone(&config)));
        manager.insert(Connection::<()>::new_for_test(UserId(2), config));

        assert_eq!(manager.broadcast_to_all(&test_envelope()), 3);
    }

    #[tokio::test]
    async fn shutdown_drains_once_connections_close() {
        let manager: ConnectionManager<()> = ConnectionManager::new();
        let config = Arc::new(RuntimeConfig::default());
        let conn = Connection::<()>::new_for_test(UserId(1), config);
        manager.insert(Arc::clone(&conn));

        // Nothing actually drives this connection's read/write loops, so
        // `close()` alone won't deregister it; simulate what the real
        // teardown path does once the loops observe the cancellation.
        conn.close(crate::connection::CloseReason::Shutdown);
        manager.remove(&conn);

        assert!(manager.shutdown(Duration::from_millis(50)).await);
    }

    #[tokio::test]
    async fn shutdown_rejects_new_inserts() {
        let manager: ConnectionManager<()> = ConnectionManager::new();
        let config = Arc::new(RuntimeConfig::default());
        let before = Connection::<()>::new_for_test(UserId(1), Arc::clone(&config));
        assert!(manager.insert(Arc::clone(&before)));
        before.close(crate::connection::CloseReason::Shutdown);
        manager.remove(&before);

        assert!(!manager.is_draining());
        assert!(manager.shutdown(Duration::from_millis(50)).await);
        assert!(manager.is_draining());

        let after = Connection::<()>::new_for_test(UserId(2), config);
        assert!(!manager.insert(after));
        assert!(!manager.is_user_online(UserId(2)));
    }
}
