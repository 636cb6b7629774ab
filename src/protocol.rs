//! Wire protocol
//!
//! Every message is a JSON object with a `type` tag. Each direction is a
//! closed enum, so adding a message kind forces every handler to deal with it.
//!
//! - [`ClientMessage`]: peer to coordinator
//! - [`ServerMessage`]: coordinator to peer
//! - [`DirectMessage`]: owner and trustee over a direct channel (mediated mode)
//!
//! Negotiation payloads (`offer`, `answer`, `candidate`) are opaque JSON that
//! the relay forwards without inspecting.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::PeerId;
use crate::error::ProtocolError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Register {
        id: String,
        key: String,
    },
    Authenticate {
        name: String,
        token: String,
    },
    Offer {
        #[serde(rename = "targetId")]
        target_id: PeerId,
        payload: Value,
    },
    Answer {
        #[serde(rename = "targetId")]
        target_id: PeerId,
        payload: Value,
    },
    Candidate {
        #[serde(rename = "targetId")]
        target_id: PeerId,
        payload: Value,
    },
    #[serde(alias = "share_response")]
    SubmitShare {
        share: String,
    },
}

impl ClientMessage {
    /// Parses one text frame
    ///
    /// # Errors
    /// [`ProtocolError::Malformed`] for invalid JSON, an unknown `type` or
    /// missing fields
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(text).map_err(|_| ProtocolError::Malformed)
    }

    /// The `type` tag, for logs and error messages
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Register { .. } => "register",
            Self::Authenticate { .. } => "authenticate",
            Self::Offer { .. } => "offer",
            Self::Answer { .. } => "answer",
            Self::Candidate { .. } => "candidate",
            Self::SubmitShare { .. } => "submit_share",
        }
    }
}

/// Step of the channel negotiation handshake
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Negotiation {
    Offer,
    Answer,
    Candidate,
}

impl Negotiation {
    /// The message delivered to the target, stamped with the sender's id
    #[must_use]
    pub fn forward(self, from: PeerId, payload: Value) -> ServerMessage {
        match self {
            Self::Offer => ServerMessage::Offer { from, payload },
            Self::Answer => ServerMessage::Answer { from, payload },
            Self::Candidate => ServerMessage::Candidate { from, payload },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    RegisterSuccess {
        id: PeerId,
    },
    PeerList {
        peers: Vec<PeerId>,
    },
    ReceiveShare {
        share: String,
        index: u8,
    },
    RequestShare,
    RecoveryComplete,
    Offer {
        from: PeerId,
        payload: Value,
    },
    Answer {
        from: PeerId,
        payload: Value,
    },
    Candidate {
        from: PeerId,
        payload: Value,
    },
    Error {
        message: String,
    },
}

impl ServerMessage {
    pub fn error(err: impl std::fmt::Display) -> Self {
        Self::Error {
            message: err.to_string(),
        }
    }

    /// Serializes to one text frame
    ///
    /// # Errors
    /// Propagates serializer failures (not expected for these shapes)
    pub fn encode(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    /// Parses one text frame on the peer side
    ///
    /// # Errors
    /// [`ProtocolError::Malformed`] for anything that is not a server message
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(text).map_err(|_| ProtocolError::Malformed)
    }
}

/// Messages exchanged over a direct owner/trustee channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DirectMessage {
    Share { share: String, from: PeerId },
    RequestShare { from: PeerId },
    ShareResponse { share: String, from: PeerId },
    RecoveryComplete { from: PeerId },
}
