//! Per-connection event loop.
//!
//! One task owns the socket, the three timers and the manual-close flag. Socket events,
//! timer expiries and handle commands are all consumed by a single `select!` loop, so they
//! are handled one at a time in arrival order and no state is shared with other tasks.
//!
//! Timers are `Option<Pin<Box<Sleep>>>`: setting one to `None` cancels it, assigning a new
//! one replaces (and so cancels) the previous one. That guarantees there is never more
//! than one pending connect-timeout, watchdog or reconnect.
//!
//! Outbound bytes go through a per-link writer task, so a board that stops reading can
//! never hold up the loop. A failed writer counts as a lost connection.

use super::state::{BoardEndpoint, ClientInfo, ClockSource, ConnectionState, ConnectionTimings};
use crate::error::{IngestError, IngestResult};
use crate::protocol::{DecodedFrame, FrameDecoder};
use crate::sample::SampleBatch;
use crate::sinks::{Collaborators, HistoryEntry, LiveMessage};
use bytes::Bytes;
use chrono::Utc;
use futures::future::BoxFuture;
use std::future::pending;
use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::{JoinError, JoinHandle};
use tokio::time::{sleep, timeout, Sleep};
use tracing::{debug, info, warn};

type Timer = Option<Pin<Box<Sleep>>>;

/// Messages queued per link before `send` starts dropping them.
const OUTBOUND_CAPACITY: usize = 256;

/// Commands sent from [`super::ConnectionHandle`] to the actor.
pub(crate) enum Command {
    Connect {
        endpoints: Vec<BoardEndpoint>,
        index: usize,
        reply: oneshot::Sender<IngestResult<bool>>,
    },
    Reconnect {
        endpoints: Option<Vec<BoardEndpoint>>,
        index: usize,
        clear_manual_close: bool,
        reply: oneshot::Sender<IngestResult<bool>>,
    },
    Disconnect {
        reply: oneshot::Sender<()>,
    },
    Rearm,
    Send {
        bytes: Bytes,
    },
    ClientInfo {
        reply: oneshot::Sender<Option<ClientInfo>>,
    },
}

struct Link {
    reader: OwnedReadHalf,
    peer_addr: Option<SocketAddr>,
    local_addr: Option<SocketAddr>,
    connected_at: Instant,
}

/// Write side of a link, owned by its own task.
struct Writer {
    outbound: mpsc::Sender<Bytes>,
    task: JoinHandle<io::Result<()>>,
}

impl Writer {
    fn spawn(half: OwnedWriteHalf) -> Self {
        let (outbound, queue) = mpsc::channel(OUTBOUND_CAPACITY);
        Self {
            outbound,
            task: tokio::spawn(write_loop(half, queue)),
        }
    }

    /// Drops queued messages and the socket's write half immediately.
    fn abort(self) {
        self.task.abort();
    }

    /// Stops accepting messages, lets the queue drain for at most `grace`, then closes.
    fn close(self, grace: Duration) -> JoinHandle<()> {
        let Writer { outbound, mut task } = self;
        drop(outbound);
        tokio::spawn(async move {
            if timeout(grace, &mut task).await.is_err() {
                task.abort();
                warn!(grace_ms = grace.as_millis() as u64, "Board not reading, dropping queued messages");
            }
        })
    }
}

pub(crate) struct ConnectionActor {
    commands: mpsc::Receiver<Command>,
    state_tx: watch::Sender<ConnectionState>,
    timings: ConnectionTimings,
    clock: ClockSource,
    decoder: FrameDecoder,
    collaborators: Collaborators,
    read_buf: Vec<u8>,

    endpoints: Vec<BoardEndpoint>,
    index: usize,
    manually_closed: bool,
    waiting: Vec<oneshot::Sender<IngestResult<bool>>>,

    connecting: Option<BoxFuture<'static, io::Result<TcpStream>>>,
    link: Option<Link>,
    writer: Option<Writer>,
    draining: Vec<JoinHandle<()>>,
    connect_timeout: Timer,
    watchdog: Timer,
    reconnect: Timer,
}

impl ConnectionActor {
    pub(crate) fn new(
        commands: mpsc::Receiver<Command>,
        state_tx: watch::Sender<ConnectionState>,
        timings: ConnectionTimings,
        clock: ClockSource,
        decoder: FrameDecoder,
        collaborators: Collaborators,
        read_buffer_size: usize,
    ) -> Self {
        Self {
            commands,
            state_tx,
            timings,
            clock,
            decoder,
            collaborators,
            read_buf: vec![0u8; read_buffer_size.max(64)],
            endpoints: Vec::new(),
            index: 0,
            manually_closed: false,
            waiting: Vec::new(),
            connecting: None,
            link: None,
            writer: None,
            draining: Vec::new(),
            connect_timeout: None,
            watchdog: None,
            reconnect: None,
        }
    }

    pub(crate) async fn run(mut self) {
        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(command) => self.handle_command(command),
                    None => break,
                },

                result = poll_connect(&mut self.connecting) => {
                    self.connecting = None;
                    self.connect_timeout = None;
                    match result {
                        Ok(stream) => self.on_connected(stream),
                        Err(e) => {
                            warn!(endpoint = %self.endpoint_label(), error = %e, "Connection error");
                            self.on_closed();
                        }
                    }
                }

                _ = poll_timer(&mut self.connect_timeout) => {
                    self.connect_timeout = None;
                    self.connecting = None;
                    let err = IngestError::ConnectionTimeout(self.endpoint_label());
                    warn!(error = %err, "Destroying socket");
                    self.on_closed();
                }

                read = poll_read(&mut self.link, &mut self.read_buf) => match read {
                    Ok(0) => {
                        info!(endpoint = %self.endpoint_label(), "Connection ended by board");
                        self.on_closed();
                    }
                    Ok(n) => {
                        self.arm_watchdog();
                        self.dispatch(&self.read_buf[..n]);
                    }
                    Err(e) => {
                        warn!(endpoint = %self.endpoint_label(), error = %e, "Connection error");
                        self.on_closed();
                    }
                },

                result = poll_writer(&mut self.writer) => {
                    self.writer = None;
                    match result {
                        Ok(Err(e)) => warn!(endpoint = %self.endpoint_label(), error = %e, "Write to board failed"),
                        Ok(Ok(())) => debug!("Writer stopped"),
                        Err(e) => warn!(error = %e, "Writer task ended unexpectedly"),
                    }
                    self.on_closed();
                }

                _ = poll_timer(&mut self.watchdog) => {
                    warn!(
                        endpoint = %self.endpoint_label(),
                        idle_ms = self.timings.watchdog.as_millis() as u64,
                        "No data received for a while, destroying socket"
                    );
                    self.on_closed();
                }

                _ = poll_timer(&mut self.reconnect) => {
                    self.reconnect = None;
                    if self.manually_closed {
                        info!("Connection closed manually, not reconnecting");
                    } else {
                        info!(endpoint = %self.endpoint_label(), "Attempting to reconnect");
                        self.start_attempt();
                    }
                }
            }
        }

        self.teardown();
        self.set_state(ConnectionState::Disconnected);
        for drain in self.draining.drain(..) {
            let _ = drain.await;
        }
        debug!("Connection actor stopped");
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Connect {
                endpoints,
                index,
                reply,
            } => self.connect(endpoints, index, reply),

            Command::Reconnect {
                endpoints,
                index,
                clear_manual_close,
                reply,
            } => {
                if clear_manual_close {
                    self.manually_closed = false;
                }
                if self.manually_closed {
                    info!("Connection closed manually, not reconnecting");
                    let _ = reply.send(Ok(false));
                    return;
                }
                let endpoints = endpoints.unwrap_or_else(|| self.endpoints.clone());
                self.collaborators
                    .notify(format!("Reconnecting to board ({} endpoints)...", endpoints.len()));
                self.connect(endpoints, index, reply);
            }

            Command::Disconnect { reply } => {
                self.manually_closed = true;
                self.set_state(ConnectionState::Closing);
                self.reconnect = None;
                self.draining.retain(|drain| !drain.is_finished());
                if let Some(writer) = self.writer.take() {
                    self.draining.push(writer.close(self.timings.connect_timeout));
                }
                self.teardown();
                self.set_state(ConnectionState::Disconnected);
                info!("Connection closed manually");
                for waiter in self.waiting.drain(..) {
                    let _ = waiter.send(Err(IngestError::ConnectionClosed));
                }
                let _ = reply.send(());
            }

            Command::Rearm => {
                debug!("Manual-close flag cleared");
                self.manually_closed = false;
            }

            Command::Send { bytes } => self.write(bytes),

            Command::ClientInfo { reply } => {
                let _ = reply.send(self.client_info());
            }
        }
    }

    fn connect(
        &mut self,
        endpoints: Vec<BoardEndpoint>,
        index: usize,
        reply: oneshot::Sender<IngestResult<bool>>,
    ) {
        if endpoints.is_empty() {
            let _ = reply.send(Err(IngestError::NoEndpoints));
            return;
        }
        if index >= endpoints.len() {
            let _ = reply.send(Err(IngestError::EndpointIndexOutOfRange {
                index,
                len: endpoints.len(),
            }));
            return;
        }

        // A fresh attempt supersedes whatever was in flight.
        self.reconnect = None;
        self.teardown();

        self.endpoints = endpoints;
        self.index = index;
        self.waiting.push(reply);
        self.start_attempt();
    }

    fn start_attempt(&mut self) {
        let Some(endpoint) = self.endpoints.get(self.index).cloned() else {
            return;
        };
        info!(endpoint = %endpoint, index = self.index, "Connecting to board");
        self.set_state(ConnectionState::Connecting);
        self.connecting = Some(Box::pin(async move {
            TcpStream::connect((endpoint.host.as_str(), endpoint.port)).await
        }));
        self.connect_timeout = Some(Box::pin(sleep(self.timings.connect_timeout)));
    }

    fn on_connected(&mut self, stream: TcpStream) {
        if let Err(e) = stream.set_nodelay(true) {
            debug!(error = %e, "Failed to disable Nagle's algorithm");
        }
        let peer_addr = stream.peer_addr().ok();
        let local_addr = stream.local_addr().ok();
        let (reader, writer) = stream.into_split();

        self.reconnect = None;
        self.writer = Some(Writer::spawn(writer));
        self.link = Some(Link {
            reader,
            peer_addr,
            local_addr,
            connected_at: Instant::now(),
        });
        self.arm_watchdog();
        self.set_state(ConnectionState::Connected);
        info!(endpoint = %self.endpoint_label(), "Connection established");

        for waiter in self.waiting.drain(..) {
            let _ = waiter.send(Ok(true));
        }
    }

    /// Common path for every unintentional loss: error, end of stream, timeout, watchdog.
    fn on_closed(&mut self) {
        self.teardown();
        self.set_state(ConnectionState::Disconnected);

        if self.manually_closed {
            info!("Connection closed manually, not reconnecting");
            for waiter in self.waiting.drain(..) {
                let _ = waiter.send(Err(IngestError::ConnectionClosed));
            }
            return;
        }

        info!(
            endpoint = %self.endpoint_label(),
            backoff_ms = self.timings.reconnect_backoff.as_millis() as u64,
            "Scheduling reconnect"
        );
        self.reconnect = Some(Box::pin(sleep(self.timings.reconnect_backoff)));
        self.collaborators.notify(format!(
            "Connection to board {} lost, reconnecting...",
            self.endpoint_label()
        ));
    }

    /// Drops the socket and cancels socket-bound timers. Leaves the reconnect timer alone.
    fn teardown(&mut self) {
        self.connecting = None;
        self.connect_timeout = None;
        self.watchdog = None;
        self.link = None;
        if let Some(writer) = self.writer.take() {
            writer.abort();
        }
    }

    fn arm_watchdog(&mut self) {
        self.watchdog = Some(Box::pin(sleep(self.timings.watchdog)));
    }

    fn write(&self, bytes: Bytes) {
        let Some(writer) = self.writer.as_ref() else {
            info!(len = bytes.len(), "Cannot send message, board not connected");
            return;
        };
        match writer.outbound.try_send(bytes) {
            Ok(()) => {}
            Err(TrySendError::Full(bytes)) => {
                warn!(len = bytes.len(), "Outbound queue full, dropping message");
            }
            Err(TrySendError::Closed(bytes)) => {
                debug!(len = bytes.len(), "Writer stopped, dropping message");
            }
        }
    }

    fn dispatch(&self, chunk: &[u8]) {
        let mut batch: SampleBatch = Vec::new();
        for frame in self.decoder.decode_chunk(chunk) {
            match frame {
                DecodedFrame::Status(status) => {
                    debug!(online = status.online_count(), "Board status received");
                    if let Some(health) = &self.collaborators.health {
                        health.update_status(status);
                    }
                }
                DecodedFrame::Data(data) => {
                    let now = Utc::now().timestamp_millis();
                    let values = data.values();

                    if let (Some(history), Some(board_time)) =
                        (&self.collaborators.history, data.board_time)
                    {
                        let time = match self.clock {
                            ClockSource::Board => board_time,
                            ClockSource::Local => now,
                        };
                        history.record(HistoryEntry {
                            time,
                            data: values.clone(),
                        });
                    }

                    if let Some(publisher) = &self.collaborators.publisher {
                        let time = match self.clock {
                            ClockSource::Board => data.board_time.unwrap_or(now),
                            ClockSource::Local => now,
                        };
                        publisher.publish(LiveMessage::Data { time, values });
                    }

                    batch.extend(data.samples());
                }
            }
        }

        if !batch.is_empty() {
            if let Some(sink) = &self.collaborators.batches {
                sink.submit_batch(batch);
            }
        }
    }

    fn client_info(&self) -> Option<ClientInfo> {
        let endpoint = self.endpoints.get(self.index)?.clone();
        Some(ClientInfo {
            endpoint,
            endpoint_index: self.index,
            state: *self.state_tx.borrow(),
            peer_addr: self.link.as_ref().and_then(|l| l.peer_addr),
            local_addr: self.link.as_ref().and_then(|l| l.local_addr),
            connected_at: self.link.as_ref().map(|l| l.connected_at),
            manually_closed: self.manually_closed,
        })
    }

    fn endpoint_label(&self) -> String {
        self.endpoints
            .get(self.index)
            .map_or_else(|| "<none>".to_string(), ToString::to_string)
    }

    fn set_state(&self, state: ConnectionState) {
        self.state_tx.send_if_modified(|current| {
            if *current == state {
                false
            } else {
                debug!(from = current.label(), to = state.label(), "Connection state change");
                *current = state;
                true
            }
        });
    }
}

async fn poll_timer(timer: &mut Timer) {
    match timer {
        Some(sleep) => sleep.as_mut().await,
        None => pending().await,
    }
}

async fn poll_connect(
    connecting: &mut Option<BoxFuture<'static, io::Result<TcpStream>>>,
) -> io::Result<TcpStream> {
    match connecting {
        Some(fut) => fut.as_mut().await,
        None => pending().await,
    }
}

async fn poll_writer(writer: &mut Option<Writer>) -> Result<io::Result<()>, JoinError> {
    match writer {
        Some(writer) => (&mut writer.task).await,
        None => pending().await,
    }
}

async fn write_loop(mut half: OwnedWriteHalf, mut queue: mpsc::Receiver<Bytes>) -> io::Result<()> {
    while let Some(bytes) = queue.recv().await {
        half.write_all(&bytes).await?;
        debug!(len = bytes.len(), "Sent message to board");
    }
    half.shutdown().await
}

async fn poll_read(link: &mut Option<Link>, buf: &mut [u8]) -> io::Result<usize> {
    match link {
        Some(link) => link.reader.read(buf).await,
        None => pending().await,
    }
}
