//! Process-wide network instance behind a flat function API.
//!
//! Embedders that want a single implicit network call [`init`] once, then the
//! free functions below, then [`shutdown`]. Code that can hold a handle should
//! use [`Network`] directly instead.

use crate::config::NetworkConfig;
use crate::error::{NetworkError, Result};
use crate::network::Network;
use crate::types::PeerId;
use once_cell::sync::Lazy;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::info;

enum Slot {
    Empty,
    Running(Arc<Network>),
    ShutDown,
}

static GLOBAL_NETWORK: Lazy<RwLock<Slot>> = Lazy::new(|| RwLock::new(Slot::Empty));

fn read_slot() -> RwLockReadGuard<'static, Slot> {
    GLOBAL_NETWORK.read().unwrap_or_else(|e| e.into_inner())
}

fn write_slot() -> RwLockWriteGuard<'static, Slot> {
    GLOBAL_NETWORK.write().unwrap_or_else(|e| e.into_inner())
}

/// Clone the running instance out so no lock is held while it is used.
fn current() -> Result<Arc<Network>> {
    match &*read_slot() {
        Slot::Running(net) => Ok(net.clone()),
        Slot::Empty => Err(NetworkError::NotInitialized),
        Slot::ShutDown => Err(NetworkError::ShutDown),
    }
}

/// Start the process-wide network with default configuration
pub fn init() -> Result<()> {
    init_with_config(NetworkConfig::default())
}

/// Start the process-wide network.
///
/// Fails with `AlreadyInitialized` while a previous instance is running. A
/// new instance may be started after [`shutdown`].
pub fn init_with_config(config: NetworkConfig) -> Result<()> {
    let mut slot = write_slot();
    if let Slot::Running(_) = *slot {
        return Err(NetworkError::AlreadyInitialized);
    }
    *slot = Slot::Running(Arc::new(Network::with_config(config)?));
    info!("Global network initialized");
    Ok(())
}

/// See [`Network::connect`]
pub fn connect(host: &str, port: u16) -> Result<PeerId> {
    current()?.connect(host, port)
}

/// See [`Network::set_auto_reconnect`]
pub fn set_auto_reconnect(
    peer: PeerId,
    enabled: bool,
    initial_delay_ms: u32,
    max_delay_ms: u32,
) -> Result<()> {
    current()?.set_auto_reconnect(peer, enabled, initial_delay_ms, max_delay_ms)
}

/// See [`Network::send`]
pub fn send_packet(peer: PeerId, payload: &[u8]) -> Result<()> {
    current()?.send(peer, payload)
}

/// See [`Network::disconnect`]
pub fn disconnect(peer: PeerId) -> Result<()> {
    current()?.disconnect(peer)
}

/// See [`Network::set_connection_callback`]
pub fn set_connection_callback<F>(callback: F) -> Result<()>
where
    F: FnMut(PeerId, bool) + Send + 'static,
{
    current()?.set_connection_callback(callback);
    Ok(())
}

/// See [`Network::set_data_callback`]
pub fn set_data_callback<F>(callback: F) -> Result<()>
where
    F: FnMut(PeerId, &[u8]) + Send + 'static,
{
    current()?.set_data_callback(callback);
    Ok(())
}

/// See [`Network::run_callbacks`]
pub fn run_callbacks() -> Result<usize> {
    // Callbacks may call back into this module, shutdown included.
    let net = current()?;
    net.run_callbacks()
}

/// Stop the process-wide network. Calling it again, or before [`init`], is a
/// no-op.
pub fn shutdown() -> Result<()> {
    let previous = {
        let mut slot = write_slot();
        match std::mem::replace(&mut *slot, Slot::ShutDown) {
            Slot::Running(net) => Some(net),
            Slot::Empty => {
                *slot = Slot::Empty;
                None
            }
            Slot::ShutDown => None,
        }
    };

    match previous {
        Some(net) => net.shutdown(),
        None => Ok(()),
    }
}
