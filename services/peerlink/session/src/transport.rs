//! TCP transport for peer connections.
//!
//! Host names are resolved on every attempt so that a peer whose address
//! changes is still reachable after a reconnect.

use crate::types::RemoteAddr;
use std::io;
use std::time::Duration;
use tokio::net::{lookup_host, TcpStream};
use tracing::debug;

/// Loopback listener for tests that need a remote end
#[cfg(test)]
pub(crate) async fn listen_tcp(addr: std::net::SocketAddr) -> io::Result<tokio::net::TcpListener> {
    tokio::net::TcpListener::bind(addr).await
}

/// Resolve `remote` and connect to the first address that accepts.
///
/// The whole attempt, resolution included, is bounded by `timeout`.
pub async fn connect_tcp(remote: &RemoteAddr, timeout: Duration) -> io::Result<TcpStream> {
    match tokio::time::timeout(timeout, connect_any(remote)).await {
        Ok(result) => result,
        Err(_) => Err(io::Error::new(
            io::ErrorKind::TimedOut,
            format!("connect to {} timed out after {:?}", remote, timeout),
        )),
    }
}

async fn connect_any(remote: &RemoteAddr) -> io::Result<TcpStream> {
    let mut last_err = None;

    for addr in lookup_host((remote.host.as_str(), remote.port)).await? {
        debug!("Trying {} for {}", addr, remote);
        match TcpStream::connect(addr).await {
            Ok(stream) => {
                stream.set_nodelay(true)?;
                return Ok(stream);
            }
            Err(e) => last_err = Some(e),
        }
    }

    Err(last_err.unwrap_or_else(|| {
        io::Error::new(
            io::ErrorKind::NotFound,
            format!("{} resolved to no addresses", remote),
        )
    }))
}
