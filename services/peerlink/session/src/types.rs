//! Identifiers and connection states shared across the crate.

use std::fmt;

/// Opaque handle for one remote peer
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct PeerId(pub u64);

impl PeerId {
    /// Distinguished value meaning "no peer"
    pub const INVALID: PeerId = PeerId(0);

    /// Whether this is a real peer handle
    pub fn is_valid(self) -> bool {
        self != Self::INVALID
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle state of a peer connection
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// No transport and no retry pending
    Disconnected,
    /// Transport handshake in progress
    Connecting,
    /// Transport established, packets flow
    Connected,
    /// Waiting for the backoff timer before the next handshake
    Reconnecting,
    /// Being torn down by library shutdown
    ShuttingDown,
}

impl ConnectionState {
    /// Whether a transport handle exists in this state
    pub fn has_transport(self) -> bool {
        matches!(self, ConnectionState::Connecting | ConnectionState::Connected)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Reconnecting => "reconnecting",
            ConnectionState::ShuttingDown => "shutting-down",
        };
        f.write_str(s)
    }
}

/// Remote endpoint as given by the caller
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct RemoteAddr {
    /// Host name or IP literal
    pub host: String,
    /// TCP port
    pub port: u16,
}

impl RemoteAddr {
    /// Validate and build a remote address
    pub fn new(host: &str, port: u16) -> Option<Self> {
        let host = host.trim();
        if host.is_empty() || port == 0 || host.contains(char::is_whitespace) {
            return None;
        }
        // Bracketed IPv6 literals are accepted and stored bare.
        let host = host
            .strip_prefix('[')
            .and_then(|h| h.strip_suffix(']'))
            .unwrap_or(host);
        Some(Self {
            host: host.to_string(),
            port,
        })
    }
}

impl fmt::Display for RemoteAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_peer_id() {
        assert!(!PeerId::INVALID.is_valid());
        assert!(PeerId(7).is_valid());
    }

    #[test]
    fn test_remote_addr_validation() {
        assert!(RemoteAddr::new("", 80).is_none());
        assert!(RemoteAddr::new("  ", 80).is_none());
        assert!(RemoteAddr::new("127.0.0.1", 0).is_none());
        assert!(RemoteAddr::new("bad host", 80).is_none());

        let addr = RemoteAddr::new("[::1]", 9000).unwrap();
        assert_eq!(addr.host, "::1");
        assert_eq!(addr.to_string(), "[::1]:9000");
        assert_eq!(RemoteAddr::new("example.org", 443).unwrap().to_string(), "example.org:443");
    }

    #[test]
    fn test_transport_invariant() {
        assert!(ConnectionState::Connecting.has_transport());
        assert!(ConnectionState::Connected.has_transport());
        assert!(!ConnectionState::Reconnecting.has_transport());
        assert!(!ConnectionState::Disconnected.has_transport());
        assert!(!ConnectionState::ShuttingDown.has_transport());
    }
}
