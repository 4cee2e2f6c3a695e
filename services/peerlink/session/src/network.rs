//! Caller-facing network handle.
//!
//! A [`Network`] owns one background worker thread. Every method here runs on
//! the caller's thread, returns without waiting on network I/O, and talks to
//! the worker only through the command channel. Callbacks run only inside
//! [`Network::run_callbacks`].

use crate::config::NetworkConfig;
use crate::directory::{PeerDirectory, PeerInfo};
use crate::dispatch::{Dispatcher, PeerHandler};
use crate::error::{NetworkError, Result};
use crate::event::EventQueue;
use crate::manager::{Command, ConnectionManager};
use crate::reconnect::ReconnectPolicy;
use crate::types::{ConnectionState, PeerId, RemoteAddr};
use bytes::Bytes;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Handle to a running peer network
pub struct Network {
    commands: mpsc::UnboundedSender<Command>,
    events: Arc<EventQueue>,
    directory: Arc<PeerDirectory>,
    dispatcher: Dispatcher,
    config: Arc<NetworkConfig>,
    next_id: AtomicU64,
    default_policy: ReconnectPolicy,
    worker: Mutex<Option<JoinHandle<()>>>,
    shut_down: AtomicBool,
}

impl std::fmt::Debug for Network {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Network")
            .field("peers", &self.directory.len())
            .field("pending_events", &self.events.len())
            .field("shut_down", &self.is_shut_down())
            .finish()
    }
}

impl Network {
    /// Start a network with default configuration
    pub fn init() -> Result<Self> {
        Self::with_config(NetworkConfig::default())
    }

    /// Start a network and its worker thread
    pub fn with_config(config: NetworkConfig) -> Result<Self> {
        config.validate()?;
        let config = Arc::new(config);

        // Built here so a runtime failure is reported to the caller.
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;

        let (tx, rx) = mpsc::unbounded_channel();
        let events = Arc::new(EventQueue::new());
        let directory = Arc::new(PeerDirectory::new());
        let manager = ConnectionManager::new(rx, events.clone(), directory.clone(), config.clone());

        let worker = std::thread::Builder::new()
            .name(config.worker_thread_name.clone())
            .spawn(move || {
                runtime.block_on(manager.run());
                debug!("Worker thread exiting");
            })?;

        info!(
            "Network started (worker={}, max_frame_size={})",
            config.worker_thread_name, config.max_frame_size
        );

        Ok(Self {
            commands: tx,
            events,
            directory,
            dispatcher: Dispatcher::new(),
            default_policy: config.default_reconnect.into(),
            config,
            next_id: AtomicU64::new(1),
            worker: Mutex::new(Some(worker)),
            shut_down: AtomicBool::new(false),
        })
    }

    /// Configuration this network runs with
    pub fn config(&self) -> &NetworkConfig {
        &self.config
    }

    /// Whether [`shutdown`](Self::shutdown) has been called
    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::Acquire)
    }

    fn ensure_running(&self) -> Result<()> {
        if self.is_shut_down() {
            return Err(NetworkError::ShutDown);
        }
        Ok(())
    }

    fn submit(&self, cmd: Command) -> Result<()> {
        self.commands.send(cmd).map_err(|_| {
            error!("Worker is gone, command dropped");
            NetworkError::ShutDown
        })
    }

    fn ensure_known(&self, peer: PeerId) -> Result<()> {
        if !self.directory.contains(peer) {
            return Err(NetworkError::UnknownPeer(peer));
        }
        Ok(())
    }

    /// Request a connection to `host:port`.
    ///
    /// Returns as soon as the request is queued. The outcome arrives as a
    /// connection callback on a later [`run_callbacks`](Self::run_callbacks).
    pub fn connect(&self, host: &str, port: u16) -> Result<PeerId> {
        self.ensure_running()?;
        let remote = RemoteAddr::new(host, port).ok_or_else(|| NetworkError::InvalidAddress {
            host: host.to_string(),
            port,
        })?;

        let id = PeerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.directory.register(id, remote.clone());
        debug!("Requesting connect of peer {} to {}", id, remote);

        if let Err(e) = self.submit(Command::Connect {
            id,
            remote,
            policy: self.default_policy,
        }) {
            self.directory.remove(id);
            return Err(e);
        }
        Ok(id)
    }

    /// Enable or disable automatic reconnect for one peer.
    ///
    /// Delays are in milliseconds. The initial delay is raised to at least
    /// 1ms and the maximum to at least the initial delay.
    pub fn set_auto_reconnect(
        &self,
        peer: PeerId,
        enabled: bool,
        initial_delay_ms: u32,
        max_delay_ms: u32,
    ) -> Result<()> {
        self.set_reconnect_policy(
            peer,
            ReconnectPolicy::from_millis(enabled, initial_delay_ms, max_delay_ms),
        )
    }

    /// Replace the reconnect policy of one peer
    pub fn set_reconnect_policy(&self, peer: PeerId, policy: ReconnectPolicy) -> Result<()> {
        self.ensure_running()?;
        self.ensure_known(peer)?;
        self.submit(Command::SetPolicy { id: peer, policy })
    }

    /// Queue one packet for a connected peer.
    ///
    /// Succeeds once the payload is handed to the worker. A link that drops
    /// before the bytes are written loses them silently; the disconnect
    /// callback tells the caller.
    pub fn send(&self, peer: PeerId, payload: &[u8]) -> Result<()> {
        self.ensure_running()?;
        let state = self
            .directory
            .state(peer)
            .ok_or(NetworkError::UnknownPeer(peer))?;

        let max = self.config.max_frame_size;
        if payload.len() > max {
            return Err(NetworkError::TooLarge {
                len: payload.len(),
                max,
            });
        }

        let accepted = match state {
            ConnectionState::Connected => true,
            ConnectionState::Connecting => self.config.buffer_while_connecting,
            _ => false,
        };
        if !accepted {
            return Err(NetworkError::NotConnected(peer));
        }

        self.submit(Command::Send {
            id: peer,
            payload: Bytes::copy_from_slice(payload),
        })
    }

    /// Close a peer and forget it.
    ///
    /// The handle is invalid as soon as this returns. Events already queued
    /// for the peer are still delivered, and a disconnect callback follows if
    /// the caller has seen the link come up.
    pub fn disconnect(&self, peer: PeerId) -> Result<()> {
        self.ensure_running()?;
        if !self.directory.contains(peer) {
            return Err(NetworkError::UnknownPeer(peer));
        }
        // Retire first so nothing the worker raises from here on slips in.
        self.events.retire(peer);
        if !self.directory.remove(peer) {
            return Err(NetworkError::UnknownPeer(peer));
        }
        info!("Disconnecting peer {}", peer);
        self.submit(Command::Disconnect { id: peer })
    }

    /// Register the connection change callback
    pub fn set_connection_callback<F>(&self, callback: F)
    where
        F: FnMut(PeerId, bool) + Send + 'static,
    {
        self.dispatcher.set_connection_callback(Some(Box::new(callback)));
    }

    /// Register the inbound packet callback
    pub fn set_data_callback<F>(&self, callback: F)
    where
        F: FnMut(PeerId, &[u8]) + Send + 'static,
    {
        self.dispatcher.set_data_callback(Some(Box::new(callback)));
    }

    /// Remove the connection change callback
    pub fn clear_connection_callback(&self) {
        self.dispatcher.set_connection_callback(None);
    }

    /// Remove the inbound packet callback
    pub fn clear_data_callback(&self) {
        self.dispatcher.set_data_callback(None);
    }

    /// Route both callbacks to `handler`, replacing any registered closures
    pub fn set_handler<H: PeerHandler + 'static>(&self, handler: H) {
        self.dispatcher.set_handler(handler);
    }

    /// Deliver pending events to the registered callbacks.
    ///
    /// Runs callbacks on the calling thread and returns how many events were
    /// taken from the queue. Events raised while callbacks run are left for
    /// the next call. Calling this from inside a callback returns `Ok(0)`.
    pub fn run_callbacks(&self) -> Result<usize> {
        self.ensure_running()?;
        Ok(self.dispatcher.dispatch(&self.events).unwrap_or(0))
    }

    /// Number of events waiting for the next poll
    pub fn pending_events(&self) -> usize {
        self.events.len()
    }

    /// Last state the worker published for a peer
    pub fn peer_state(&self, peer: PeerId) -> Result<ConnectionState> {
        self.directory
            .state(peer)
            .ok_or(NetworkError::UnknownPeer(peer))
    }

    /// Snapshot of one peer
    pub fn peer_info(&self, peer: PeerId) -> Result<PeerInfo> {
        self.directory
            .info(peer)
            .ok_or(NetworkError::UnknownPeer(peer))
    }

    /// Snapshot of every known peer, ordered by ID
    pub fn peers(&self) -> Vec<PeerInfo> {
        self.directory.all()
    }

    /// Stop the worker and release every peer.
    ///
    /// Blocks until the worker thread has exited. No callback runs after this
    /// returns. Calling it again is a no-op.
    pub fn shutdown(&self) -> Result<()> {
        let mut worker = self.worker.lock().unwrap_or_else(|e| e.into_inner());
        let Some(handle) = worker.take() else {
            return Ok(());
        };

        info!("Shutting down network ({} peers)", self.directory.len());
        self.shut_down.store(true, Ordering::Release);
        self.dispatcher.close();

        if self.commands.send(Command::Shutdown).is_err() {
            warn!("Worker already stopped");
        }
        if handle.join().is_err() {
            error!("Worker thread panicked");
        }

        self.events.clear();
        self.directory.clear();
        info!("Network shut down");
        Ok(())
    }
}

impl Drop for Network {
    fn drop(&mut self) {
        let _ = self.shutdown();
    }
}
