//! Peer identity and connection lifecycle

use serde::{Deserialize, Serialize};

/// Name a peer registers under, e.g. `Owner` or `Alice`
///
/// Unique among currently connected peers.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerId(String);

impl PeerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for PeerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PeerId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// What a peer is allowed to do in a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// Holder of the secret; distributes shares and triggers recovery
    Owner,
    /// Holds one share and returns it on request
    Trustee,
}

/// Per-connection state tracked by the coordinator
///
/// `Registering -> Registered -> Authenticated` (trustees only), and back to
/// `Disconnected` on close or rejected credentials.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Registering,
    Registered,
    Authenticated,
}
