//! Stable numeric codes carried by [`crate::ErrorDescriptor`].
//!
//! Codes deliberately reuse HTTP status semantics so host applications and
//! client SDKs can share one mental model between the REST API and the
//! websocket error channel.

/// The request payload was malformed or failed validation.
pub const BAD_REQUEST: u16 = 400;
/// The connection's authentication was rejected.
pub const UNAUTHORIZED: u16 = 401;
/// The caller is authenticated but not allowed to perform the action.
pub const FORBIDDEN: u16 = 403;
/// The referenced resource does not exist.
pub const NOT_FOUND: u16 = 404;
/// The request conflicts with existing state (e.g. a reused session id).
pub const CONFLICT: u16 = 409;
/// An unexpected internal failure occurred.
pub const INTERNAL: u16 = 500;
/// The requested operation is not implemented.
pub const NOT_IMPLEMENTED: u16 = 501;
