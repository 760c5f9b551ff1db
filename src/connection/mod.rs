//! Board connection lifecycle.
//!
//! A single actor task owns the TCP socket to the active board endpoint and runs the
//! reconnect state machine:
//!
//! - a connect attempt is abandoned if the handshake does not complete within the
//!   connect timeout;
//! - a connected socket is destroyed if no data arrives within the watchdog period;
//! - any unintentional loss schedules one reconnect, after a fixed backoff, to the same
//!   endpoint index;
//! - a manual [`ConnectionHandle::disconnect`] stops reconnecting until the flag is
//!   cleared again.
//!
//! Decoded frames are routed to the [`crate::sinks::Collaborators`] given at spawn time.
mod actor;
pub mod handle;
pub mod state;

pub use handle::{ConnectionBuilder, ConnectionHandle};
pub use state::{BoardEndpoint, ClientInfo, ClockSource, ConnectionState, ConnectionTimings};
