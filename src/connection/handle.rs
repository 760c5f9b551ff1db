//! Public handle to the connection actor.
use super::actor::{Command, ConnectionActor};
use super::state::{BoardEndpoint, ClientInfo, ClockSource, ConnectionState, ConnectionTimings};
use crate::error::{IngestError, IngestResult};
use crate::protocol::FrameDecoder;
use crate::sinks::Collaborators;
use bytes::Bytes;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const COMMAND_CAPACITY: usize = 64;
const DEFAULT_READ_BUFFER: usize = 4096;

/// Configures and spawns a board connection actor.
///
/// # Example
///
/// ```rust,no_run
/// use board_ingest::connection::{BoardEndpoint, ConnectionBuilder};
///
/// # async fn example() -> board_ingest::error::IngestResult<()> {
/// let (conn, _task) = ConnectionBuilder::new().spawn();
/// conn.connect(vec![BoardEndpoint::new("192.168.1.10", 8080)], 0).await?;
/// conn.send(vec![0xCD, 0xEF, 0x01]).await;
/// conn.disconnect().await;
/// # Ok(())
/// # }
/// ```
pub struct ConnectionBuilder {
    timings: ConnectionTimings,
    clock: ClockSource,
    decoder: FrameDecoder,
    collaborators: Collaborators,
    read_buffer_size: usize,
}

impl Default for ConnectionBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionBuilder {
    /// Builder with default timings, board clock and the default payload layout.
    pub fn new() -> Self {
        Self {
            timings: ConnectionTimings::default(),
            clock: ClockSource::default(),
            decoder: FrameDecoder::default(),
            collaborators: Collaborators::default(),
            read_buffer_size: DEFAULT_READ_BUFFER,
        }
    }

    /// Connect-timeout, watchdog and reconnect backoff.
    pub fn timings(mut self, timings: ConnectionTimings) -> Self {
        self.timings = timings;
        self
    }

    /// Clock used to stamp history and live updates.
    pub fn clock_source(mut self, clock: ClockSource) -> Self {
        self.clock = clock;
        self
    }

    /// Frame decoder applied to every read.
    pub fn decoder(mut self, decoder: FrameDecoder) -> Self {
        self.decoder = decoder;
        self
    }

    /// Sinks that receive decoded frames and notifications.
    pub fn collaborators(mut self, collaborators: Collaborators) -> Self {
        self.collaborators = collaborators;
        self
    }

    /// Size of the socket read buffer, in bytes.
    pub fn read_buffer_size(mut self, size: usize) -> Self {
        self.read_buffer_size = size;
        self
    }

    /// Spawns the actor on the current tokio runtime.
    ///
    /// The actor stops once every [`ConnectionHandle`] clone has been dropped.
    pub fn spawn(self) -> (ConnectionHandle, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(COMMAND_CAPACITY);
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        let actor = ConnectionActor::new(
            rx,
            state_tx,
            self.timings,
            self.clock,
            self.decoder,
            self.collaborators,
            self.read_buffer_size,
        );
        let task = tokio::spawn(actor.run());
        (
            ConnectionHandle {
                tx,
                state: state_rx,
            },
            task,
        )
    }
}

/// Cloneable handle used to drive a board connection.
#[derive(Clone)]
pub struct ConnectionHandle {
    tx: mpsc::Sender<Command>,
    state: watch::Receiver<ConnectionState>,
}

impl ConnectionHandle {
    /// Connects to `endpoints[start_index]`.
    ///
    /// Resolves `Ok(true)` on the first successful handshake, including one reached through
    /// automatic reconnects. Fails immediately if `start_index` is past the end of the
    /// list, and fails with [`IngestError::ConnectionClosed`] if the connection is closed
    /// manually before any handshake succeeds.
    pub async fn connect(
        &self,
        endpoints: Vec<BoardEndpoint>,
        start_index: usize,
    ) -> IngestResult<bool> {
        if start_index >= endpoints.len() {
            return Err(IngestError::EndpointIndexOutOfRange {
                index: start_index,
                len: endpoints.len(),
            });
        }
        let (reply, rx) = oneshot::channel();
        self.command(Command::Connect {
            endpoints,
            index: start_index,
            reply,
        })
        .await?;
        rx.await.map_err(|_| IngestError::ConnectionActorStopped)?
    }

    /// Reconnects, optionally clearing the manual-close flag first.
    ///
    /// Returns `Ok(false)` without connecting when the connection is still marked as
    /// manually closed. `endpoints = None` reuses the list from the last connect.
    pub async fn reconnect(
        &self,
        endpoints: Option<Vec<BoardEndpoint>>,
        index: usize,
        clear_manual_close: bool,
    ) -> IngestResult<bool> {
        let (reply, rx) = oneshot::channel();
        self.command(Command::Reconnect {
            endpoints,
            index,
            clear_manual_close,
            reply,
        })
        .await?;
        rx.await.map_err(|_| IngestError::ConnectionActorStopped)?
    }

    /// Closes the socket and stops automatic reconnects until [`rearm`](Self::rearm) or
    /// `reconnect(.., true)` is called.
    pub async fn disconnect(&self) {
        let (reply, rx) = oneshot::channel();
        if self.command(Command::Disconnect { reply }).await.is_ok() {
            let _ = rx.await;
        }
    }

    /// Clears the manual-close flag without connecting.
    pub async fn rearm(&self) {
        let _ = self.command(Command::Rearm).await;
    }

    /// Queues bytes for the board's writer. A no-op (logged) when not connected; never fails.
    ///
    /// Messages are dropped with a warning once the per-link queue is full.
    pub async fn send(&self, bytes: impl Into<Bytes>) {
        let bytes = bytes.into();
        if self.command(Command::Send { bytes }).await.is_err() {
            warn!("Cannot send message, connection actor stopped");
        }
    }

    /// Sends `frames` one by one, waiting `interval` between consecutive sends.
    pub async fn send_sequence<I, B>(&self, frames: I, interval: Duration)
    where
        I: IntoIterator<Item = B>,
        B: Into<Bytes>,
    {
        let mut sent = 0usize;
        for frame in frames {
            if sent > 0 {
                tokio::time::sleep(interval).await;
            }
            self.send(frame).await;
            sent += 1;
            debug!(sent, "Sequence frame sent");
        }
        info!(sent, "Command sequence complete");
    }

    /// Snapshot of the current socket for diagnostics. `None` before the first connect.
    pub async fn client_info(&self) -> Option<ClientInfo> {
        let (reply, rx) = oneshot::channel();
        self.command(Command::ClientInfo { reply }).await.ok()?;
        rx.await.ok().flatten()
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Receiver notified on every state change.
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    /// Waits until the connection reaches `target`.
    pub async fn wait_for_state(&self, target: ConnectionState) -> IngestResult<()> {
        let mut rx = self.state.clone();
        rx.wait_for(|state| *state == target)
            .await
            .map(|_| ())
            .map_err(|_| IngestError::ConnectionActorStopped)
    }

    async fn command(&self, command: Command) -> IngestResult<()> {
        self.tx
            .send(command)
            .await
            .map_err(|_| IngestError::ConnectionActorStopped)
    }
}
