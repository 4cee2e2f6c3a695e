//! One peer connection and the task that drives it.
//!
//! A [`PeerConnection`] lives entirely on the worker thread. Its task owns the
//! transport, the outbound buffer, the inbound frame codec, and the reconnect
//! bookkeeping, and it is the only code that ever changes the peer's state.
//! Every transition is published to the [`PeerDirectory`] before the matching
//! event is queued, so a caller reacting to an event sees the new state.

use crate::config::NetworkConfig;
use crate::directory::{PeerDirectory, PeerStats};
use crate::event::{Event, EventQueue};
use crate::reconnect::{ReconnectPolicy, ReconnectState};
use crate::transport::connect_tcp;
use crate::types::{ConnectionState, PeerId, RemoteAddr};
use bytes::{Bytes, BytesMut};
use peerlink_wire::{encode_into, FrameCodec};
use std::io;
use std::sync::Arc;
use std::time::Instant;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Instructions from the manager to a peer task
#[derive(Debug)]
pub enum PeerCommand {
    /// Frame and queue one payload
    Send(Bytes),
    /// Replace the reconnect policy
    SetPolicy(ReconnectPolicy),
    /// Close the link for good, caller-initiated
    Disconnect,
    /// Close the link for good, library shutdown
    Shutdown,
}

/// Shared handles every peer task needs
#[derive(Debug, Clone)]
pub struct PeerContext {
    /// Outbound event queue
    pub events: Arc<EventQueue>,
    /// Caller-visible status table
    pub directory: Arc<PeerDirectory>,
    /// Instance configuration
    pub config: Arc<NetworkConfig>,
}

/// What a state step asks the run loop to do next
enum Step {
    /// State changed, run the step for the new state
    Continue,
    /// Task is done
    Exit,
}

/// Result of one turn of the connected I/O loop
enum IoOutcome {
    Command(Option<PeerCommand>),
    Wrote(io::Result<usize>),
    Read(io::Result<usize>),
}

/// State owned by one peer task
pub struct PeerConnection {
    id: PeerId,
    remote: RemoteAddr,
    state: ConnectionState,
    transport: Option<TcpStream>,
    send_buf: BytesMut,
    codec: FrameCodec,
    read_scratch: Vec<u8>,
    policy: ReconnectPolicy,
    reconnect: ReconnectState,
    /// Entered Connecting from Reconnecting
    retrying: bool,
    /// A disconnect event was queued since the last connect event
    down_reported: bool,
    stats: PeerStats,
    ctx: PeerContext,
}

impl PeerConnection {
    /// Create a peer in the Connecting state
    pub fn new(id: PeerId, remote: RemoteAddr, policy: ReconnectPolicy, ctx: PeerContext) -> Self {
        Self {
            id,
            remote,
            state: ConnectionState::Connecting,
            transport: None,
            send_buf: BytesMut::with_capacity(16 * 1024),
            codec: FrameCodec::new(ctx.config.max_frame_size),
            read_scratch: vec![0u8; ctx.config.read_chunk_size],
            reconnect: ReconnectState::new(&policy),
            policy,
            retrying: false,
            down_reported: false,
            stats: PeerStats::default(),
            ctx,
        }
    }

    /// Peer handle
    pub fn id(&self) -> PeerId {
        self.id
    }

    /// Current state
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Drive the peer until it is disconnected or shut down.
    pub async fn run(mut self, mut commands: mpsc::UnboundedReceiver<PeerCommand>) -> PeerId {
        info!("Starting peer {} for {}", self.id, self.remote);
        self.publish();

        loop {
            let step = match self.state {
                ConnectionState::Connecting => self.begin_connect(&mut commands).await,
                ConnectionState::Connected => self.pump_io(&mut commands).await,
                ConnectionState::Reconnecting => self.await_retry(&mut commands).await,
                ConnectionState::Disconnected => {
                    let cmd = commands.recv().await;
                    self.on_command(cmd)
                }
                ConnectionState::ShuttingDown => Step::Exit,
            };

            if let Step::Exit = step {
                break;
            }
        }

        self.close_transport();
        info!("Peer {} for {} stopped ({})", self.id, self.remote, self.state);
        self.id
    }

    /// Run one handshake, serving commands while it is in flight.
    async fn begin_connect(&mut self, commands: &mut mpsc::UnboundedReceiver<PeerCommand>) -> Step {
        let remote = self.remote.clone();
        let timeout = self.ctx.config.connect_timeout();
        info!("Attempting to connect peer {} to {}", self.id, remote);

        let connect = connect_tcp(&remote, timeout);
        tokio::pin!(connect);

        loop {
            tokio::select! {
                biased;

                cmd = commands.recv() => {
                    // Dropping `connect` on exit closes the half-open socket.
                    if let Step::Exit = self.on_command(cmd) {
                        return Step::Exit;
                    }
                    if self.state != ConnectionState::Connecting {
                        return Step::Continue;
                    }
                }

                result = &mut connect => {
                    match result {
                        Ok(stream) => self.on_connected(stream),
                        Err(e) => self.on_connect_failed(e),
                    }
                    return Step::Continue;
                }
            }
        }
    }

    /// Wait for the backoff deadline, serving commands meanwhile.
    async fn await_retry(&mut self, commands: &mut mpsc::UnboundedReceiver<PeerCommand>) -> Step {
        loop {
            let deadline = self
                .reconnect
                .next_attempt_at()
                .unwrap_or_else(Instant::now);

            tokio::select! {
                biased;

                cmd = commands.recv() => {
                    if let Step::Exit = self.on_command(cmd) {
                        return Step::Exit;
                    }
                    if self.state != ConnectionState::Reconnecting {
                        return Step::Continue;
                    }
                }

                _ = tokio::time::sleep_until(tokio::time::Instant::from_std(deadline)) => {
                    if self.policy.enabled {
                        debug!(
                            "Reconnect timer fired for peer {} (attempt {})",
                            self.id,
                            self.reconnect.attempt_count() + 1
                        );
                        self.retrying = true;
                        self.state = ConnectionState::Connecting;
                    } else {
                        info!("Auto-reconnect disabled for peer {}, giving up", self.id);
                        self.reconnect.cancel();
                        self.settle_disconnected();
                    }
                    self.publish();
                    return Step::Continue;
                }
            }
        }
    }

    /// Move bytes in both directions until the link drops or the state changes.
    async fn pump_io(&mut self, commands: &mut mpsc::UnboundedReceiver<PeerCommand>) -> Step {
        loop {
            let Some(stream) = self.transport.as_mut() else {
                self.on_link_lost("transport missing");
                return Step::Continue;
            };

            let outcome = {
                let (mut reader, mut writer) = stream.split();
                tokio::select! {
                    biased;

                    cmd = commands.recv() => IoOutcome::Command(cmd),

                    res = writer.write_buf(&mut self.send_buf), if !self.send_buf.is_empty() => {
                        IoOutcome::Wrote(res)
                    }

                    res = reader.read(&mut self.read_scratch[..]) => IoOutcome::Read(res),
                }
            };

            match outcome {
                IoOutcome::Command(cmd) => {
                    if let Step::Exit = self.on_command(cmd) {
                        return Step::Exit;
                    }
                }
                IoOutcome::Wrote(Ok(0)) => self.on_link_lost("transport accepted no bytes"),
                IoOutcome::Wrote(Ok(n)) => {
                    self.stats.bytes_out += n as u64;
                    if self.send_buf.is_empty() {
                        self.publish();
                    }
                }
                IoOutcome::Wrote(Err(e)) => self.on_link_lost(&format!("write failed: {}", e)),
                IoOutcome::Read(Ok(0)) => self.on_link_lost("closed by remote"),
                IoOutcome::Read(Ok(n)) => self.on_bytes(n),
                IoOutcome::Read(Err(e)) => self.on_link_lost(&format!("read failed: {}", e)),
            }

            if self.state != ConnectionState::Connected {
                return Step::Continue;
            }
        }
    }

    /// Feed `n` freshly read bytes through the codec.
    fn on_bytes(&mut self, n: usize) {
        self.stats.bytes_in += n as u64;

        let mut failure = None;
        for frame in self.codec.feed(&self.read_scratch[..n]) {
            match frame {
                Ok(payload) => {
                    debug!("Received {} byte packet from peer {}", payload.len(), self.id);
                    self.stats.frames_received += 1;
                    self.ctx.events.push(Event::Packet(self.id, payload));
                }
                Err(e) => failure = Some(e),
            }
        }

        match failure {
            Some(e) => self.on_link_lost(&format!("bad frame: {}", e)),
            None => self.publish(),
        }
    }

    fn on_command(&mut self, cmd: Option<PeerCommand>) -> Step {
        match cmd {
            Some(PeerCommand::Send(payload)) => {
                self.queue_packet(&payload);
                Step::Continue
            }
            Some(PeerCommand::SetPolicy(policy)) => {
                info!(
                    "Peer {} reconnect policy: enabled={}, initial={:?}, max={:?}",
                    self.id, policy.enabled, policy.initial_delay, policy.max_delay
                );
                self.policy = policy;
                Step::Continue
            }
            Some(PeerCommand::Disconnect) => {
                info!("Disconnecting peer {} ({})", self.id, self.state);
                if self.state == ConnectionState::Connected && !self.down_reported {
                    self.ctx.events.push(Event::Disconnected(self.id));
                    self.down_reported = true;
                }
                self.close_transport();
                self.reconnect.cancel();
                self.state = ConnectionState::Disconnected;
                Step::Exit
            }
            Some(PeerCommand::Shutdown) | None => {
                debug!("Peer {} shutting down", self.id);
                self.close_transport();
                self.reconnect.cancel();
                self.state = ConnectionState::ShuttingDown;
                Step::Exit
            }
        }
    }

    /// Frame a payload into the outbound buffer if the state allows it.
    fn queue_packet(&mut self, payload: &[u8]) {
        let accept = match self.state {
            ConnectionState::Connected => true,
            ConnectionState::Connecting => self.ctx.config.buffer_while_connecting,
            _ => false,
        };
        if !accept {
            // The link went down after the caller's state check.
            debug!(
                "Dropping {} byte packet for peer {} in state {}",
                payload.len(),
                self.id,
                self.state
            );
            return;
        }

        match encode_into(payload, self.codec.max_frame_size(), &mut self.send_buf) {
            Ok(()) => {
                self.stats.frames_sent += 1;
                debug!(
                    "Queued {} byte packet for peer {} ({} bytes pending)",
                    payload.len(),
                    self.id,
                    self.send_buf.len()
                );
            }
            Err(e) => warn!("Dropping packet for peer {}: {}", self.id, e),
        }
    }

    fn on_connected(&mut self, stream: TcpStream) {
        info!("Peer {} connected to {}", self.id, self.remote);
        self.transport = Some(stream);
        self.codec.clear();
        self.state = ConnectionState::Connected;
        self.retrying = false;
        self.down_reported = false;
        self.reconnect.on_connected(&self.policy);
        self.stats.connects += 1;
        self.publish();
        self.ctx.events.push(Event::Connected(self.id));
    }

    fn on_connect_failed(&mut self, err: io::Error) {
        if self.policy.enabled {
            let now = Instant::now();
            let at = if self.retrying {
                self.reconnect.on_attempt_failed(&self.policy, now)
            } else {
                self.reconnect.on_link_lost(&self.policy, now)
            };
            warn!(
                "Failed to connect peer {} to {}: {}; retrying in {:?}",
                self.id,
                self.remote,
                err,
                at.saturating_duration_since(now)
            );
            self.state = ConnectionState::Reconnecting;
        } else {
            warn!("Failed to connect peer {} to {}: {}", self.id, self.remote, err);
            self.send_buf.clear();
            self.settle_disconnected();
        }
        self.publish();
    }

    /// The transport failed while connected.
    fn on_link_lost(&mut self, reason: &str) {
        self.close_transport();
        self.send_buf.clear();
        self.codec.clear();

        if self.policy.enabled {
            let now = Instant::now();
            let at = self.reconnect.on_link_lost(&self.policy, now);
            warn!(
                "Peer {} lost link to {} ({}); reconnecting in {:?}",
                self.id,
                self.remote,
                reason,
                at.saturating_duration_since(now)
            );
            self.retrying = false;
            self.state = ConnectionState::Reconnecting;
        } else {
            warn!("Peer {} lost link to {} ({})", self.id, self.remote, reason);
            self.reconnect.cancel();
            self.state = ConnectionState::Disconnected;
        }

        self.publish();
        if !self.down_reported {
            self.ctx.events.push(Event::Disconnected(self.id));
            self.down_reported = true;
        }
    }

    /// Terminal failure without a live link: report it once if it was never
    /// reported.
    fn settle_disconnected(&mut self) {
        self.state = ConnectionState::Disconnected;
        let never_connected = self.stats.connects == 0;
        if !self.down_reported && (!never_connected || self.ctx.config.report_initial_failure) {
            self.publish();
            self.ctx.events.push(Event::Disconnected(self.id));
            self.down_reported = true;
        }
    }

    fn close_transport(&mut self) {
        if let Some(stream) = self.transport.take() {
            debug!("Closing transport for peer {}", self.id);
            drop(stream);
        }
    }

    fn publish(&self) {
        self.ctx.directory.publish(
            self.id,
            self.state,
            self.reconnect.attempt_count(),
            &self.stats,
        );
    }
}
