#![deny(missing_docs)]
//! Generic, application-agnostic websocket connection runtime.
//!
//! A single [`Connection<U>`] owns one peer's lifecycle: the upgrade, the
//! read/write loops, liveness pings, and the pending-ack/pending-request
//! correlation tables. A [`ConnectionManager<U>`] tracks every connection a
//! process currently holds open, keyed by [`realtime_types::UserId`], and
//! answers fan-out and shutdown queries against it.
//!
//! Host applications supply a [`Callbacks`] implementation; everything else
//! (multiplexing, backpressure, liveness, graceful shutdown) is handled here.

pub mod api;
pub mod callbacks;
pub mod config;
pub mod connection;
pub mod error;
pub mod metrics;
pub mod pid;
pub mod registry;

pub use callbacks::Callbacks;
pub use config::{ConfigError, RuntimeConfig};
pub use connection::{AckOutcome, CloseReason, Connection, ConnectionState};
pub use error::{HandlerError, RequestError, SendError, SlowConsumer};
pub use pid::{PidGenerator, UuidPidGenerator};
pub use registry::{ConnectionManager, DeliveryOutcome};

pub use realtime_types::{
    codec, envelope, error_codes, AckPayload, AuthRequest, ErrorDescriptor, InboundEnvelope,
    OutboundEnvelope, UserId,
};
