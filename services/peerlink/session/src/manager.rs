//! Connection manager: the worker-side owner of every peer.
//!
//! The manager runs on the background worker thread. It receives commands
//! from the caller's thread, spawns one task per peer, routes commands to
//! those tasks, and reaps them when they finish. Nothing outside the worker
//! mutates peer state.

use crate::config::NetworkConfig;
use crate::directory::PeerDirectory;
use crate::event::EventQueue;
use crate::peer::{PeerCommand, PeerConnection, PeerContext};
use crate::reconnect::ReconnectPolicy;
use crate::types::{PeerId, RemoteAddr};
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, error, info, warn};

/// Requests from the caller's thread to the worker
#[derive(Debug)]
pub enum Command {
    /// Create a peer and start its first handshake
    Connect {
        /// Pre-allocated handle
        id: PeerId,
        /// Target
        remote: RemoteAddr,
        /// Initial reconnect policy
        policy: ReconnectPolicy,
    },
    /// Queue one payload for a peer
    Send {
        /// Target peer
        id: PeerId,
        /// Unframed payload
        payload: Bytes,
    },
    /// Replace a peer's reconnect policy
    SetPolicy {
        /// Target peer
        id: PeerId,
        /// New policy
        policy: ReconnectPolicy,
    },
    /// Close a peer for good
    Disconnect {
        /// Target peer
        id: PeerId,
    },
    /// Stop the worker
    Shutdown,
}

/// Worker-side peer table and command router
pub struct ConnectionManager {
    commands: mpsc::UnboundedReceiver<Command>,
    peers: HashMap<PeerId, mpsc::UnboundedSender<PeerCommand>>,
    tasks: JoinSet<PeerId>,
    ctx: PeerContext,
}

impl ConnectionManager {
    /// Create a new connection manager
    pub fn new(
        commands: mpsc::UnboundedReceiver<Command>,
        events: Arc<EventQueue>,
        directory: Arc<PeerDirectory>,
        config: Arc<NetworkConfig>,
    ) -> Self {
        Self {
            commands,
            peers: HashMap::new(),
            tasks: JoinSet::new(),
            ctx: PeerContext {
                events,
                directory,
                config,
            },
        }
    }

    /// Run the connection manager until shutdown
    pub async fn run(mut self) {
        info!("Starting connection manager");

        loop {
            tokio::select! {
                biased;

                cmd = self.commands.recv() => {
                    match cmd {
                        Some(Command::Shutdown) => {
                            info!("Connection manager received shutdown");
                            break;
                        }
                        Some(cmd) => self.handle_command(cmd),
                        None => {
                            info!("Command channel closed, connection manager shutting down");
                            break;
                        }
                    }
                }

                Some(joined) = self.tasks.join_next() => self.reap(joined),
            }
        }

        self.shutdown_all().await;
    }

    fn handle_command(&mut self, cmd: Command) {
        match cmd {
            Command::Connect { id, remote, policy } => {
                if !self.ctx.directory.contains(id) {
                    debug!("Peer {} removed before its connect was processed", id);
                    self.ctx.events.release(id);
                    return;
                }
                let peer = PeerConnection::new(id, remote, policy, self.ctx.clone());
                debug!("Spawning peer {} in state {}", peer.id(), peer.state());
                let (tx, rx) = mpsc::unbounded_channel();
                self.tasks.spawn(peer.run(rx));
                self.peers.insert(id, tx);
            }
            Command::Send { id, payload } => {
                self.forward(id, PeerCommand::Send(payload));
            }
            Command::SetPolicy { id, policy } => {
                self.forward(id, PeerCommand::SetPolicy(policy));
            }
            Command::Disconnect { id } => {
                // The task exits on its own and is released when reaped.
                if !self.forward(id, PeerCommand::Disconnect) {
                    self.ctx.events.release(id);
                }
                self.peers.remove(&id);
            }
            Command::Shutdown => {}
        }
    }

    /// Route a command to a peer task. Returns whether the task took it.
    fn forward(&mut self, id: PeerId, cmd: PeerCommand) -> bool {
        let Some(tx) = self.peers.get(&id) else {
            debug!("No task for peer {}, dropping {:?}", id, cmd);
            return false;
        };
        if tx.send(cmd).is_err() {
            warn!("Peer {} task is gone, removing it", id);
            self.peers.remove(&id);
            return false;
        }
        true
    }

    fn reap(&mut self, joined: Result<PeerId, JoinError>) {
        match joined {
            Ok(id) => {
                debug!("Peer {} task finished", id);
                self.peers.remove(&id);
                self.ctx.events.release(id);
            }
            Err(e) if e.is_cancelled() => {}
            Err(e) => {
                error!("Peer task failed: {}", e);
                // The failed task's sender is closed; drop it lazily.
                self.peers.retain(|_, tx| !tx.is_closed());
            }
        }
    }

    /// Force-close every peer and wait for their tasks.
    async fn shutdown_all(&mut self) {
        info!("Closing {} peers", self.peers.len());
        self.ctx.directory.mark_all_shutting_down();

        for tx in self.peers.values() {
            let _ = tx.send(PeerCommand::Shutdown);
        }
        self.peers.clear();

        // Aborting drops each task's transport, closing the socket.
        self.tasks.shutdown().await;

        let dropped = self.ctx.events.clear();
        if dropped > 0 {
            debug!("Discarded {} undelivered events", dropped);
        }
        self.ctx.directory.clear();
        info!("Connection manager stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Event;
    use crate::types::ConnectionState;
    use std::net::{IpAddr, Ipv4Addr, SocketAddr};
    use std::time::Duration;
    use tokio::time::timeout;

    struct Harness {
        tx: mpsc::UnboundedSender<Command>,
        events: Arc<EventQueue>,
        directory: Arc<PeerDirectory>,
        worker: tokio::task::JoinHandle<()>,
    }

    fn harness() -> Harness {
        let (tx, rx) = mpsc::unbounded_channel();
        let events = Arc::new(EventQueue::new());
        let directory = Arc::new(PeerDirectory::new());
        let manager = ConnectionManager::new(
            rx,
            events.clone(),
            directory.clone(),
            Arc::new(NetworkConfig::default()),
        );
        Harness {
            tx,
            events,
            directory,
            worker: tokio::spawn(manager.run()),
        }
    }

    async fn listener() -> (tokio::net::TcpListener, RemoteAddr) {
        let listener = crate::transport::listen_tcp(SocketAddr::new(
            IpAddr::V4(Ipv4Addr::LOCALHOST),
            0,
        ))
        .await
        .unwrap();
        let port = listener.local_addr().unwrap().port();
        (listener, RemoteAddr::new("127.0.0.1", port).unwrap())
    }

    #[tokio::test]
    async fn test_connect_and_shutdown() {
        let h = harness();
        let (listener, remote) = listener().await;

        h.directory.register(PeerId(1), remote.clone());
        h.tx.send(Command::Connect {
            id: PeerId(1),
            remote,
            policy: ReconnectPolicy::disabled(),
        })
        .unwrap();
        let (_server, _) = listener.accept().await.unwrap();

        timeout(Duration::from_secs(2), async {
            while h.directory.state(PeerId(1)) != Some(ConnectionState::Connected) {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        assert_eq!(h.events.take_snapshot().pop_front(), Some(Event::Connected(PeerId(1))));

        h.tx.send(Command::Shutdown).unwrap();
        timeout(Duration::from_secs(2), h.worker).await.unwrap().unwrap();
        assert!(h.directory.is_empty());
        assert!(h.events.is_empty());
    }

    #[tokio::test]
    async fn test_connect_for_removed_peer_is_skipped() {
        let h = harness();
        let (listener, remote) = listener().await;

        // Never registered: the caller already disconnected it.
        h.tx.send(Command::Connect {
            id: PeerId(9),
            remote,
            policy: ReconnectPolicy::disabled(),
        })
        .unwrap();
        h.tx.send(Command::Disconnect { id: PeerId(9) }).unwrap();

        let accepted = timeout(Duration::from_millis(200), listener.accept()).await;
        assert!(accepted.is_err(), "no handshake expected");

        drop(h.tx);
        timeout(Duration::from_secs(2), h.worker).await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_unknown_peer_commands_are_ignored() {
        let h = harness();
        h.tx.send(Command::Send {
            id: PeerId(5),
            payload: Bytes::from_static(b"x"),
        })
        .unwrap();
        h.tx.send(Command::SetPolicy {
            id: PeerId(5),
            policy: ReconnectPolicy::disabled(),
        })
        .unwrap();
        h.tx.send(Command::Shutdown).unwrap();
        timeout(Duration::from_secs(2), h.worker).await.unwrap().unwrap();
        assert!(h.events.is_empty());
    }
}
