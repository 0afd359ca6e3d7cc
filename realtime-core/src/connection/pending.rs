//! The two correlation tables a [`super::Connection`] owns: pending acks and
//! pending requests.
//!
//! They are kept as separate maps because their lifetimes differ (a request
//! carries a reply channel; an ack does not) and because they are resolved
//! by different inbound types (`client_ack` vs. `generic_response`). Folding
//! them into one tagged-union map would force a dispatch on every inbound
//! envelope just to figure out which table it belongs to.

use std::{collections::HashMap, time::Instant};

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::oneshot;

/// The outcome delivered to whoever is tracking an outbound message's ack.
#[derive(Debug, Clone)]
pub struct AckOutcome {
    /// The status token from the `client_ack` (or `"timeout"` on expiry).
    pub status: String,
    /// An error message, when `status` indicates failure.
    pub error: Option<String>,
}

/// Marker sent to pending-request waiters when the connection closes before
/// a response arrives.
#[derive(Debug, Clone, Copy)]
pub struct RequestClosed;

struct AckEntry {
    deadline: Instant,
    tx: oneshot::Sender<AckOutcome>,
}

/// Tracks server-originated messages awaiting a `client_ack`.
///
/// Entries are created only when a handler explicitly opts in via
/// [`super::Connection::track_ack`]; plain `sendMessage` calls are never
/// tracked.
#[derive(Default)]
pub(crate) struct PendingAcks {
    entries: Mutex<HashMap<String, AckEntry>>,
}

impl PendingAcks {
    pub(crate) fn track(&self, pid: String, timeout: std::time::Duration) -> oneshot::Receiver<AckOutcome> {
        let (tx, rx) = oneshot::channel();
        let deadline = Instant::now() + timeout;
        self.entries.lock().insert(pid, AckEntry { deadline, tx });
        rx
    }

    /// Resolves and removes the entry for `pid`, if one is registered.
    ///
    /// Returns `true` iff an entry was found (the core's invariant: "for
    /// every `client_ack` with `acknowledgedPid = P`, the corresponding
    /// pending-ack entry is removed exactly once" holds because `remove`
    /// on a `HashMap` is itself exactly-once).
    pub(crate) fn resolve(&self, pid: &str, status: String, error: Option<String>) -> bool {
        if let Some(entry) = self.entries.lock().remove(pid) {
            let _ = entry.tx.send(AckOutcome { status, error });
            true
        } else {
            false
        }
    }

    /// Removes and resolves every entry whose deadline has passed with a
    /// `"timeout"` status. Returns the number of entries expired.
    pub(crate) fn sweep_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        let expired: Vec<String> = entries
            .iter()
            .filter(|(_, entry)| entry.deadline <= now)
            .map(|(pid, _)| pid.clone())
            .collect();
        for pid in &expired {
            if let Some(entry) = entries.remove(pid) {
                let _ = entry.tx.send(AckOutcome {
                    status: "timeout".to_owned(),
                    error: None,
                });
            }
        }
        expired.len()
    }

    /// Resolves every remaining entry with a `"closed"` status; used when
    /// the connection tears down so waiters don't hang forever.
    pub(crate) fn fail_all(&self) {
        let mut entries = self.entries.lock();
        for (_, entry) in entries.drain() {
            let _ = entry.tx.send(AckOutcome {
                status: "closed".to_owned(),
                error: None,
            });
        }
    }
}

/// Tracks outbound `generic_request`s awaiting a matching `generic_response`.
#[derive(Default)]
pub(crate) struct PendingRequests {
    entries: Mutex<HashMap<String, oneshot::Sender<Result<Value, RequestClosed>>>>,
}

impl PendingRequests {
    pub(crate) fn register(&self, pid: String) -> oneshot::Receiver<Result<Value, RequestClosed>> {
        let (tx, rx) = oneshot::channel();
        self.entries.lock().insert(pid, tx);
        rx
    }

    /// Delivers `payload` to the waiter for `pid` and removes the entry.
    /// Returns `true` iff a waiter was found; unmatched responses are
    /// discarded silently by the caller (see `Connection::dispatch_inbound`).
    pub(crate) fn resolve(&self, pid: &str, payload: Value) -> bool {
        if let Some(tx) = self.entries.lock().remove(pid) {
            let _ = tx.send(Ok(payload));
            true
        } else {
            false
        }
    }

    /// Removes the entry for `pid` without resolving it; used after a local
    /// timeout so a late response can't resurrect it.
    pub(crate) fn cancel(&self, pid: &str) {
        self.entries.lock().remove(pid);
    }

    /// Fails every pending request with [`RequestClosed`]; called once the
    /// connection starts draining.
    pub(crate) fn fail_all(&self) {
        let mut entries = self.entries.lock();
        for (_, tx) in entries.drain() {
            let _ = tx.send(Err(RequestClosed));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn ack_resolve_is_exactly_once() {
        let acks = PendingAcks::default();
        let rx = acks.track("p1".to_owned(), Duration::from_secs(5));
        assert!(acks.resolve("p1", "processed".to_owned(), None));
        assert!(!acks.resolve("p1", "processed".to_owned(), None));
        let outcome = rx.await.unwrap();
        assert_eq!(outcome.status, "processed");
    }

    #[tokio::test]
    async fn ack_sweep_expires_and_removes() {
        let acks = PendingAcks::default();
        let rx = acks.track("p1".to_owned(), Duration::from_millis(1));
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert_eq!(acks.sweep_expired(), 1);
        assert_eq!(acks.sweep_expired(), 0);
        let outcome = rx.await.unwrap();
        assert_eq!(outcome.status, "timeout");
    }

    #[tokio::test]
    async fn request_resolve_delivers_payload() {
        let requests = PendingRequests::default();
        let rx = requests.register("r1".to_owned());
        assert!(requests.resolve("r1", serde_json::json!({"tz": "UTC"})));
        let value = rx.await.unwrap().unwrap();
        assert_eq!(value["tz"], "UTC");
    }

    #[tokio::test]
    async fn request_fail_all_cancels_waiters() {
        let requests = PendingRequests::default();
        let rx = requests.register("r1".to_owned());
        requests.fail_all();
        assert!(rx.await.unwrap().is_err());
    }

    #[test]
    fn unmatched_response_is_discarded() {
        let requests = PendingRequests::default();
        assert!(!requests.resolve("unknown", serde_json::Value::Null));
    }
}
