use std::collections::HashMap;
use std::net::SocketAddr;
use tracing::{debug, warn};

/// Address family of a connected caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AddressFamily {
    IPv4,
    IPv6,
}

/// Network identity of the peer on one connection.
///
/// Passed to the access policy alongside the caller id the request claims.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallerIdentity {
    pub address: String,
    pub port: u16,
    pub family: AddressFamily,
}

impl From<SocketAddr> for CallerIdentity {
    fn from(addr: SocketAddr) -> Self {
        let family = match addr {
            SocketAddr::V4(_) => AddressFamily::IPv4,
            SocketAddr::V6(_) => AddressFamily::IPv6,
        };
        Self {
            address: addr.ip().to_string(),
            port: addr.port(),
            family,
        }
    }
}

/// Caller identities keyed by connection id.
///
/// Holds exactly one entry per open connection.
#[derive(Debug, Default)]
pub struct ClientInfoTable {
    clients: HashMap<usize, CallerIdentity>,
}

impl ClientInfoTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the identity for a freshly accepted connection.
    pub fn insert(&mut self, id: usize, identity: CallerIdentity) {
        debug!(id, address = %identity.address, port = identity.port, "Recording caller identity");
        if self.clients.insert(id, identity).is_some() {
            warn!(id, "Replaced stale caller identity");
        }
    }

    pub fn find(&self, id: usize) -> Option<&CallerIdentity> {
        self.clients.get(&id)
    }

    pub fn remove(&mut self, id: usize) -> Option<CallerIdentity> {
        self.clients.remove(&id)
    }

    pub fn clear(&mut self) {
        self.clients.clear();
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}
