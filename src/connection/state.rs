//! Connection state, endpoints and timing configuration.
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

/// A board's TCP address. Endpoints are tried by index.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BoardEndpoint {
    /// Host name or IP address.
    pub host: String,
    /// TCP port.
    pub port: u16,
}

impl BoardEndpoint {
    /// Endpoint at `host:port`.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for BoardEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Lifecycle of the single board socket.
///
/// ```text
/// Disconnected ──connect──> Connecting ──handshake──> Connected
///      ▲                        │                         │
///      │                error/timeout           close/error/watchdog
///      └────────────────────────┴─────────────────────────┘
///                 (reconnect after backoff unless closed manually)
/// ```
///
/// `Closing` is only entered through a manual disconnect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ConnectionState {
    /// No socket; a reconnect may be scheduled.
    #[default]
    Disconnected,
    /// Handshake in progress, connect-timeout armed.
    Connecting,
    /// Socket open, watchdog armed.
    Connected,
    /// Manual disconnect in progress.
    Closing,
}

impl ConnectionState {
    /// Returns a short status label for display.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Disconnected => "Disconnected",
            Self::Connecting => "Connecting...",
            Self::Connected => "Connected",
            Self::Closing => "Closing",
        }
    }
}

/// Which clock stamps history entries and live updates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClockSource {
    /// The board's embedded clock, carried in each data frame.
    #[default]
    Board,
    /// Local wall-clock time at decode.
    Local,
}

/// Timer settings of the connection state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionTimings {
    /// Socket is destroyed if the handshake has not completed by then.
    pub connect_timeout: Duration,
    /// Socket is destroyed if no data arrives for this long.
    pub watchdog: Duration,
    /// Delay before reconnecting after an unintentional close.
    pub reconnect_backoff: Duration,
}

impl Default for ConnectionTimings {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_millis(5000),
            watchdog: Duration::from_millis(2000),
            reconnect_backoff: Duration::from_millis(1000),
        }
    }
}

/// Diagnostic snapshot of the current socket.
#[derive(Debug, Clone)]
pub struct ClientInfo {
    /// Endpoint the socket targets.
    pub endpoint: BoardEndpoint,
    /// Index of that endpoint in the configured list.
    pub endpoint_index: usize,
    /// State at the time of the snapshot.
    pub state: ConnectionState,
    /// Remote address, when connected.
    pub peer_addr: Option<SocketAddr>,
    /// Local address, when connected.
    pub local_addr: Option<SocketAddr>,
    /// Handshake time, when connected.
    pub connected_at: Option<Instant>,
    /// Set after a manual disconnect.
    pub manually_closed: bool,
}

impl ClientInfo {
    /// Time since the handshake, if connected.
    pub fn uptime(&self) -> Option<Duration> {
        self.connected_at.map(|t| t.elapsed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clock_source_parses_lowercase() {
        let parsed: ClockSource = serde_json::from_str("\"local\"").unwrap();
        assert_eq!(parsed, ClockSource::Local);
        assert_eq!(ClockSource::default(), ClockSource::Board);
    }

    #[test]
    fn endpoint_display() {
        assert_eq!(BoardEndpoint::new("10.0.0.2", 8080).to_string(), "10.0.0.2:8080");
    }
}
