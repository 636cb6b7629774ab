//! Error kinds surfaced by the coordination core
//!
//! Each enum is reported to the offending caller only. None of them is fatal
//! to the coordinator process.

use thiserror::Error;

/// Credential checks performed by the registry
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// The peer id is not part of the configured roster.
    #[error("Invalid peer ID: {0}")]
    InvalidPeerId(String),

    /// The presented key does not match the roster's key for this id.
    #[error("Invalid key for peer ID {0}")]
    InvalidKey(String),

    /// Another open connection already holds this id.
    #[error("Peer ID {0} is already registered")]
    AlreadyRegistered(String),

    /// Unknown, mismatched or already consumed access token.
    #[error("Invalid token or name")]
    InvalidToken,
}

/// Split and combine failures
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ShareError {
    #[error("Insufficient shares: need at least {needed}, but only {provided} provided")]
    InsufficientShares { needed: usize, provided: usize },

    #[error("Malformed share: {0}")]
    MalformedShare(String),

    #[error("Share {0} was supplied more than once")]
    DuplicateShare(u8),

    /// Shares come from different `split` calls.
    #[error("Shares belong to different splits")]
    MixedSplits,

    /// The reconstructed secret failed its embedded integrity check.
    #[error("Recovered secret failed its integrity check")]
    ChecksumMismatch,

    #[error("Invalid split parameters: {0}")]
    InvalidParameters(String),
}

/// Recovery lifecycle failures
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RecoveryError {
    #[error("Only {connected} trustees connected, need at least {needed}")]
    InsufficientConnectedTrustees { needed: usize, connected: usize },

    #[error("No shares have been distributed")]
    NoSession,

    #[error("The session has already been recovered")]
    AlreadyRecovered,

    /// The quorum was reached but combining failed. Terminal for the request,
    /// the session may be retried.
    #[error("Recovery failed: {0}")]
    Combine(#[from] ShareError),

    /// The request was dropped before it could complete.
    #[error("Recovery request was abandoned")]
    Abandoned,
}

/// Reasons the signaling relay drops a negotiation message
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RelayError {
    #[error("Target {0} is not connected")]
    UnknownTarget(String),

    #[error("Negotiation from {from} to {target} is not permitted")]
    PolicyDenied { from: String, target: String },
}

/// Inbound message handling failures, answered with an `error` message
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("Invalid message format")]
    Malformed,

    #[error("Peer must register before sending {0}")]
    NotRegistered(&'static str),

    #[error("{0}")]
    Unexpected(String),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Share(#[from] ShareError),

    #[error(transparent)]
    Recovery(#[from] RecoveryError),
}

/// Failures of owner-side calls made through the coordinator handle
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoordinatorError {
    #[error("Coordinator has shut down")]
    Closed,

    #[error(transparent)]
    Share(#[from] ShareError),

    #[error(transparent)]
    Recovery(#[from] RecoveryError),
}

/// A direct channel refused a message because its far end is gone
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("Direct channel is closed")]
pub struct ChannelClosed;

/// Mediated-mode failures on either end of a direct channel
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MeshError {
    #[error("No direct channel to {0}")]
    NoChannel(String),

    #[error(transparent)]
    Share(#[from] ShareError),

    #[error(transparent)]
    Recovery(#[from] RecoveryError),
}

impl ProtocolError {
    /// Whether the connection should be closed after reporting this error
    #[must_use]
    pub fn closes_connection(&self) -> bool {
        matches!(self, Self::Registry(_))
    }
}
