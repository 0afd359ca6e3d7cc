#![deny(missing_docs)]
//! Wire types and protocol contracts for the `realtime-core` websocket
//! connection runtime.
//!
//! This crate groups together the strongly-typed values shared between a
//! host application and the core:
//!
//! * The inbound/outbound message envelopes and their closed-set type tags
//!   (see [`envelope`]).
//! * A JSON text-frame codec enforcing frame size limits (see [`codec`]).
//! * Stable, HTTP-flavored numeric error codes (see [`error_codes`]).
//! * The [`auth::AuthRequest`] view a host's authentication callback inspects.
//!
//! `realtime-core` depends on this crate; host applications typically depend
//! on both.

pub mod auth;
pub mod codec;
pub mod envelope;
pub mod error_codes;
mod user;

pub use auth::AuthRequest;
pub use codec::{decode_inbound, encode_outbound, close_codes, DecodeError, DEFAULT_MAX_MESSAGE_SIZE};
pub use envelope::{AckPayload, ErrorDescriptor, InboundEnvelope, OutboundEnvelope};
pub use user::UserId;
