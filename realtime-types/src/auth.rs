//! The read-only view of an upgrade request a host's authentication
//! callback inspects.
//!
//! The core does not prescribe a token format: a host's
//! `Callbacks::authenticate` implementation inspects the upgrade request's
//! headers and query parameters and returns a `UserId` plus opaque
//! per-connection user data, or rejects the upgrade.

use http::{HeaderMap, Uri};

/// The parts of an upgrade request a host's authentication callback may inspect.
///
/// Deliberately a read-only view: the core owns the actual HTTP request and
/// only lends its headers and URI out for the duration of the call.
#[derive(Debug)]
pub struct AuthRequest<'a> {
    /// Request headers, including any bearer/session tokens.
    pub headers: &'a HeaderMap,
    /// Request URI, including query parameters.
    pub uri: &'a Uri,
}

impl<'a> AuthRequest<'a> {
    /// Convenience constructor.
    pub fn new(headers: &'a HeaderMap, uri: &'a Uri) -> Self {
        Self { headers, uri }
    }

    /// Returns the first value of a query parameter, if present.
    ///
    /// Performs a simple `key=value` scan over the URI's query string; hosts
    /// needing richer parsing should inspect [`AuthRequest::uri`] directly.
    pub fn query_param(&self, key: &str) -> Option<&str> {
        let query = self.uri.query()?;
        query.split('&').find_map(|pair| {
            let mut parts = pair.splitn(2, '=');
            let k = parts.next()?;
            let v = parts.next().unwrap_or("");
            (k == key).then_some(v)
        })
    }
}
