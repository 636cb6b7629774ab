//! Mediated-mode peer logic
//!
//! Once the signaling relay has helped the owner open a direct channel to a
//! trustee, shares never touch the relay again. [`OwnerDesk`] runs on the
//! owner's side: it splits the secret across the open channels, asks for the
//! shares back and feeds the answers to the recovery orchestrator.
//! [`TrusteeVault`] runs on each trustee and holds exactly one share.
//!
//! The transport behind a channel is abstracted by [`DirectChannel`].

use std::collections::BTreeMap;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::domain::{PeerId, ShareCount, ShareIndex, SplitConfig, Threshold};
use crate::error::{ChannelClosed, MeshError, RecoveryError, ShareError};
use crate::protocol::DirectMessage;
use crate::recovery::{RecoveryTicket, Submission};
use crate::session::Session;
use crate::sharing::{Secret, Share, SplitId};

/// One end of an established owner/trustee channel
pub trait DirectChannel {
    /// Queues `msg` for the far end
    ///
    /// # Errors
    /// [`ChannelClosed`] once the far end went away
    fn send(&self, msg: DirectMessage) -> Result<(), ChannelClosed>;

    fn is_open(&self) -> bool;
}

impl DirectChannel for mpsc::UnboundedSender<DirectMessage> {
    fn send(&self, msg: DirectMessage) -> Result<(), ChannelClosed> {
        mpsc::UnboundedSender::send(self, msg).map_err(|_| ChannelClosed)
    }

    fn is_open(&self) -> bool {
        !self.is_closed()
    }
}

/// Owner side of the mediated mode
pub struct OwnerDesk<C> {
    id: PeerId,
    channels: BTreeMap<PeerId, C>,
    session: Option<Session>,
}

impl<C: DirectChannel> OwnerDesk<C> {
    pub fn new(id: PeerId) -> Self {
        Self {
            id,
            channels: BTreeMap::new(),
            session: None,
        }
    }

    /// Records an open channel to `trustee`, replacing any previous one
    pub fn attach(&mut self, trustee: PeerId, channel: C) {
        debug!(peer = %trustee, "direct channel attached");
        self.channels.insert(trustee, channel);
    }

    /// Drops the channel to `trustee`
    ///
    /// A pending request it was asked to answer fails once the rest can no
    /// longer reach the quorum.
    pub fn detach(&mut self, trustee: &PeerId) {
        if self.channels.remove(trustee).is_some() {
            debug!(peer = %trustee, "direct channel detached");
        }
        if let Some(session) = self.session.as_ref() {
            session.withdraw(trustee);
        }
    }

    /// Trustees with an open channel, sorted
    pub fn reachable(&self) -> Vec<PeerId> {
        self.channels
            .iter()
            .filter(|(_, channel)| channel.is_open())
            .map(|(peer, _)| peer.clone())
            .collect()
    }

    #[must_use]
    pub fn is_recovered(&self) -> bool {
        self.session.as_ref().is_some_and(Session::is_recovered)
    }

    fn deliver(&self, trustee: &PeerId, msg: DirectMessage) -> Result<(), MeshError> {
        let channel = self
            .channels
            .get(trustee)
            .ok_or_else(|| MeshError::NoChannel(trustee.to_string()))?;
        channel
            .send(msg)
            .map_err(|_| MeshError::NoChannel(trustee.to_string()))
    }

    /// Splits `secret` into one share per reachable trustee, `threshold` of
    /// which recover it, and sends each trustee its share
    ///
    /// A previous session is discarded.
    ///
    /// # Errors
    /// - [`RecoveryError::InsufficientConnectedTrustees`] with fewer than
    ///   `threshold` open channels
    /// - [`ShareError`] if the split fails
    pub fn distribute(&mut self, secret: &Secret, threshold: Threshold) -> Result<SplitId, MeshError> {
        let trustees = self.reachable();
        if trustees.len() < threshold.as_usize() {
            return Err(RecoveryError::InsufficientConnectedTrustees {
                needed: threshold.as_usize(),
                connected: trustees.len(),
            }
            .into());
        }

        let invalid = |e: anyhow::Error| ShareError::InvalidParameters(e.to_string());
        let count = u8::try_from(trustees.len())
            .map_err(|_| ShareError::InvalidParameters("too many trustees".into()))?;
        let config = SplitConfig::new(threshold, ShareCount::new(count).map_err(invalid)?)
            .map_err(invalid)?;
        let session = Session::create(secret, config, &trustees)?;

        for trustee in &trustees {
            let Some(share) = session.share_for(trustee) else {
                continue;
            };
            let msg = DirectMessage::Share {
                share: share.encode(),
                from: self.id.clone(),
            };
            if let Err(error) = self.deliver(trustee, msg) {
                warn!(peer = %trustee, %error, "share not delivered");
            }
        }

        let secret_id = session.secret_id();
        info!(%secret_id, trustees = trustees.len(), "shares distributed");
        self.session = Some(session);
        Ok(secret_id)
    }

    /// Asks every reachable trustee of the current session for its share
    ///
    /// # Errors
    /// [`RecoveryError::NoSession`], [`RecoveryError::AlreadyRecovered`] or
    /// [`RecoveryError::InsufficientConnectedTrustees`]; nothing is sent then
    pub fn request_shares(&self) -> Result<RecoveryTicket, MeshError> {
        let session = self.session.as_ref().ok_or(RecoveryError::NoSession)?;
        let reachable = self.reachable();
        let ticket = session.request_shares(&reachable)?;

        for trustee in ticket.participants() {
            let msg = DirectMessage::RequestShare {
                from: self.id.clone(),
            };
            if let Err(error) = self.deliver(trustee, msg) {
                warn!(peer = %trustee, %error, "share request not delivered");
            }
        }
        Ok(ticket)
    }

    /// Handles a message that arrived on the channel to `from`
    ///
    /// The channel, not the message body, identifies the sender.
    ///
    /// # Errors
    /// [`RecoveryError::NoSession`] or a malformed share
    pub fn on_message(&mut self, from: &PeerId, msg: DirectMessage) -> Result<Submission, MeshError> {
        let DirectMessage::ShareResponse { share, .. } = msg else {
            debug!(peer = %from, "unexpected direct message ignored");
            return Ok(Submission::Unsolicited);
        };
        let session = self.session.as_ref().ok_or(RecoveryError::NoSession)?;
        let share = Share::decode(&share)?;

        let outcome = session.submit_share(from, share);
        if let Submission::Recovered { participants } = &outcome {
            for trustee in participants {
                let msg = DirectMessage::RecoveryComplete {
                    from: self.id.clone(),
                };
                if let Err(error) = self.deliver(trustee, msg) {
                    debug!(peer = %trustee, %error, "completion not delivered");
                }
            }
            if let Some(session) = self.session.as_mut() {
                session.retire();
            }
        }
        Ok(outcome)
    }

    /// Forgets the session and every channel, as when the owner leaves
    pub fn reset(&mut self) {
        self.session = None;
        self.channels.clear();
        info!("owner desk reset");
    }
}

/// What a [`TrusteeVault`] did with a message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VaultEvent {
    Stored(ShareIndex),
    Answered,
    NothingHeld,
    Cleared,
    Ignored,
}

/// Trustee side of the mediated mode
///
/// Only the owner may hand over, request or clear the share.
pub struct TrusteeVault<C> {
    id: PeerId,
    owner: PeerId,
    channel: C,
    share: Option<Share>,
}

impl<C: DirectChannel> TrusteeVault<C> {
    pub fn new(id: PeerId, owner: PeerId, channel: C) -> Self {
        Self {
            id,
            owner,
            channel,
            share: None,
        }
    }

    #[must_use]
    pub fn held_index(&self) -> Option<ShareIndex> {
        self.share.as_ref().map(Share::index)
    }

    /// Handles a message that arrived on the channel from `from`
    ///
    /// # Errors
    /// A malformed share, or a closed channel when answering a request
    pub fn on_message(&mut self, from: &PeerId, msg: DirectMessage) -> Result<VaultEvent, MeshError> {
        if *from != self.owner {
            warn!(peer = %from, "direct message from a non-owner ignored");
            return Ok(VaultEvent::Ignored);
        }

        match msg {
            DirectMessage::Share { share, .. } => {
                let share = Share::decode(&share)?;
                let index = share.index();
                self.share = Some(share);
                info!(%index, "share stored");
                Ok(VaultEvent::Stored(index))
            }
            DirectMessage::RequestShare { .. } => {
                let Some(share) = self.share.as_ref() else {
                    warn!("share requested but none held");
                    return Ok(VaultEvent::NothingHeld);
                };
                let msg = DirectMessage::ShareResponse {
                    share: share.encode(),
                    from: self.id.clone(),
                };
                self.channel
                    .send(msg)
                    .map_err(|_| MeshError::NoChannel(self.owner.to_string()))?;
                info!("share returned to owner");
                Ok(VaultEvent::Answered)
            }
            DirectMessage::RecoveryComplete { .. } => {
                self.share = None;
                info!("recovery complete, share cleared");
                Ok(VaultEvent::Cleared)
            }
            DirectMessage::ShareResponse { .. } => Ok(VaultEvent::Ignored),
        }
    }
}
