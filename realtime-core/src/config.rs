//! Runtime configuration for the connection core.
//!
//! Recognized options and their effects are documented on [`RuntimeConfig`].
//! Every field can be set via environment variable or, when the host wires
//! `clap::Parser` into its own CLI with `#[clap(flatten)]`, via a flag.

use std::{net::SocketAddr, time::Duration};

use clap::Parser;

/// `pongWait` default: maximum interval between pongs before a connection is
/// declared dead.
pub const DEFAULT_PONG_WAIT: Duration = Duration::from_secs(60);
/// `writeWait` default: maximum time a single frame write may block.
pub const DEFAULT_WRITE_WAIT: Duration = Duration::from_secs(15);
/// `maxMessageSize` default, in bytes.
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 4096;
/// `sendChannelBuffer` default: depth of a connection's outbound queue.
pub const DEFAULT_SEND_CHANNEL_BUFFER: usize = 256;
/// `ackTimeout` default: deadline for a client to acknowledge a server message.
pub const DEFAULT_ACK_TIMEOUT: Duration = Duration::from_secs(10);
/// `requestTimeout` default: deadline for `sendRequest` to resolve.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(20);

/// Connection runtime configuration.
///
/// Can be constructed via environment variables or command line arguments
/// using `clap`, or built directly for embedding/tests.
#[derive(Parser, Debug, Clone)]
pub struct RuntimeConfig {
    /// Address the websocket/health HTTP listener binds to.
    #[clap(long, env = "REALTIME_BIND_ADDR", default_value = "0.0.0.0:8080")]
    pub bind_addr: SocketAddr,

    /// Path the websocket upgrade endpoint is served on.
    #[clap(long, env = "REALTIME_WS_PATH", default_value = "/ws")]
    pub ws_path: String,

    /// Path the liveness endpoint is served on.
    #[clap(long, env = "REALTIME_HEALTH_PATH", default_value = "/health")]
    pub health_path: String,

    /// Origins accepted at upgrade time. A single `*` entry accepts any origin.
    #[clap(
        long,
        env = "REALTIME_ALLOWED_ORIGINS",
        value_delimiter = ',',
        default_value = "*"
    )]
    pub allowed_origins: Vec<String>,

    /// Maximum time a single frame write may block before the connection is
    /// declared dead.
    #[clap(
        long,
        env = "REALTIME_WRITE_WAIT",
        default_value = "15s",
        value_parser = humantime::parse_duration,
    )]
    pub write_wait: Duration,

    /// Maximum interval between pongs; exceeding it closes the connection.
    #[clap(
        long,
        env = "REALTIME_PONG_WAIT",
        default_value = "60s",
        value_parser = humantime::parse_duration,
    )]
    pub pong_wait: Duration,

    /// Interval between server-initiated pings. Must be strictly less than
    /// `pong_wait`. Defaults to `pong_wait * 9 / 10` when unset.
    #[clap(
        long,
        env = "REALTIME_PING_PERIOD",
        value_parser = humantime::parse_duration,
    )]
    pub ping_period: Option<Duration>,

    /// Upper bound on a single inbound frame, in bytes. Oversize frames close
    /// the connection with policy-violation (1008).
    #[clap(long, env = "REALTIME_MAX_MESSAGE_SIZE", default_value = "4096")]
    pub max_message_size: usize,

    /// Depth of a connection's outbound queue. Exceeding it is a
    /// slow-consumer signal, not a close.
    #[clap(long, env = "REALTIME_SEND_CHANNEL_BUFFER", default_value = "256")]
    pub send_channel_buffer: usize,

    /// Deadline after which an unacknowledged server message is considered lost.
    #[clap(
        long,
        env = "REALTIME_ACK_TIMEOUT",
        default_value = "10s",
        value_parser = humantime::parse_duration,
    )]
    pub ack_timeout: Duration,

    /// Deadline after which a pending `sendRequest` resolves as failed.
    #[clap(
        long,
        env = "REALTIME_REQUEST_TIMEOUT",
        default_value = "20s",
        value_parser = humantime::parse_duration,
    )]
    pub request_timeout: Duration,
}

/// Errors surfaced by [`RuntimeConfig::validate`].
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// `ping_period` was configured to be `>=` `pong_wait`.
    #[error("ping_period ({ping_period:?}) must be strictly less than pong_wait ({pong_wait:?})")]
    PingPeriodTooLarge {
        /// The configured (or defaulted) ping period.
        ping_period: Duration,
        /// The configured pong wait.
        pong_wait: Duration,
    },
}

impl RuntimeConfig {
    /// Returns the effective ping period: the configured override, or
    /// `pong_wait * 9 / 10` when unset.
    pub fn effective_ping_period(&self) -> Duration {
        self.ping_period
            .unwrap_or_else(|| self.pong_wait * 9 / 10)
    }

    /// Checks internal invariants (currently: `ping_period < pong_wait`).
    pub fn validate(&self) -> Result<(), ConfigError> {
        let ping_period = self.effective_ping_period();
        if ping_period >= self.pong_wait {
            return Err(ConfigError::PingPeriodTooLarge {
                ping_period,
                pong_wait: self.pong_wait,
            });
        }
        Ok(())
    }

    /// Returns `true` if `origin` is accepted by `allowed_origins`.
    ///
    /// Matching is case-insensitive; a `*` entry accepts any origin.
    pub fn is_origin_allowed(&self, origin: &str) -> bool {
        self.allowed_origins
            .iter()
            .any(|allowed| allowed == "*" || allowed.eq_ignore_ascii_case(origin))
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8080".parse().expect("valid default addr"),
            ws_path: "/ws".to_owned(),
            health_path: "/health".to_owned(),
            allowed_origins: vec!["*".to_owned()],
            write_wait: DEFAULT_WRITE_WAIT,
            pong_wait: DEFAULT_PONG_WAIT,
            ping_period: None,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            send_channel_buffer: DEFAULT_SEND_CHANNEL_BUFFER,
            ack_timeout: DEFAULT_ACK_TIMEOUT,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_ping_period_is_nine_tenths_of_pong_wait() {
        let config = RuntimeConfig::default();
        assert_eq!(config.effective_ping_period(), Duration::from_secs(54));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn rejects_ping_period_not_below_pong_wait() {
        let mut config = RuntimeConfig::default();
        config.ping_period = Some(Duration::from_secs(60));
        assert!(matches!(
            config.validate(),
            Err(ConfigError::PingPeriodTooLarge { .. })
        ));
    }

    #[test]
    fn origin_matching_is_case_insensitive_and_supports_wildcard() {
        let mut config = RuntimeConfig::default();
        config.allowed_origins = vec!["https://Example.com".to_owned()];
        assert!(config.is_origin_allowed("https://example.COM"));
        assert!(!config.is_origin_allowed("https://evil.com"));

        config.allowed_origins = vec!["*".to_owned()];
        assert!(config.is_origin_allowed("https://anything.example"));
    }
}
