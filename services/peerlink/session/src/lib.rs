//! Peer connections, auto-reconnect, and poll-driven callbacks for peerlink.
//!
//! This crate keeps a set of outbound TCP links to remote peers, exchanges
//! length-prefixed packets over them, and reconnects dropped links with
//! exponential backoff. All socket work happens on one background worker
//! thread; the application sees results only when it polls.
//!
//! ## Features
//!
//! - **Background Worker**: One thread running a current-thread tokio runtime
//! - **Auto-reconnect**: Per-peer policy with doubling, capped delays
//! - **Packet Framing**: `u32` little-endian length prefix via `peerlink-wire`
//! - **Polled Callbacks**: Connection and data callbacks run only inside
//!   `run_callbacks`, on the caller's thread
//! - **Flat API**: Optional process-wide instance in [`global`]
//!
//! ## Example
//!
//! ```rust,no_run
//! use peerlink_session::Network;
//! use std::time::Duration;
//!
//! # fn example() -> Result<(), peerlink_session::NetworkError> {
//! let net = Network::init()?;
//!
//! net.set_connection_callback(|peer, connected| {
//!     println!("peer {} connected={}", peer, connected);
//! });
//! net.set_data_callback(|peer, payload: &[u8]| {
//!     println!("peer {} sent {} bytes", peer, payload.len());
//! });
//!
//! let peer = net.connect("127.0.0.1", 9000)?;
//! net.set_auto_reconnect(peer, true, 100, 1000)?;
//!
//! loop {
//!     net.run_callbacks()?;
//!     if net.send(peer, b"hello").is_ok() {
//!         break;
//!     }
//!     std::thread::sleep(Duration::from_millis(10));
//! }
//!
//! net.shutdown()?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod directory;
pub mod dispatch;
pub mod error;
pub mod event;
pub mod global;
pub mod manager;
pub mod network;
pub mod peer;
pub mod reconnect;
pub mod transport;
pub mod types;

// Re-export main types
pub use config::NetworkConfig;
pub use directory::{PeerDirectory, PeerInfo, PeerStats};
pub use dispatch::{ConnectionCallback, DataCallback, Dispatcher, PeerHandler};
pub use error::{NetworkError, Result};
pub use event::{Event, EventQueue};
pub use network::Network;
pub use reconnect::{ReconnectConfig, ReconnectPolicy, ReconnectState, MIN_RECONNECT_DELAY};
pub use types::{ConnectionState, PeerId, RemoteAddr};
