//! Owner-side distribution session
//!
//! A session exists from the moment the owner splits a secret for a fixed
//! set of trustees until the secret is recovered or the owner goes away.
//! Trustee `i` (in the order given at creation) is bound to share `i`.

use std::collections::BTreeMap;

use tracing::{info, warn};

use crate::domain::{PeerId, ShareIndex, SplitConfig};
use crate::error::{RecoveryError, ShareError};
use crate::recovery::{RecoveryOrchestrator, RecoveryTicket, Submission};
use crate::sharing::{self, Secret, Share, SplitId};

pub struct Session {
    split_id: SplitId,
    config: SplitConfig,
    shares: Vec<Share>,
    assignments: BTreeMap<PeerId, ShareIndex>,
    recovery: RecoveryOrchestrator,
}

impl Session {
    /// Splits `secret` into one share per trustee
    ///
    /// # Errors
    /// [`ShareError::InvalidParameters`] if the number of trustees differs
    /// from the split's share count or a trustee is listed twice
    pub fn create(
        secret: &Secret,
        config: SplitConfig,
        trustees: &[PeerId],
    ) -> Result<Self, ShareError> {
        if trustees.len() != config.share_count().as_usize() {
            return Err(ShareError::InvalidParameters(format!(
                "{} trustees for {} shares",
                trustees.len(),
                *config.share_count()
            )));
        }

        let shares = sharing::split(secret, config)?;
        let mut assignments = BTreeMap::new();
        for (trustee, share) in trustees.iter().zip(&shares) {
            if assignments.insert(trustee.clone(), share.index()).is_some() {
                return Err(ShareError::InvalidParameters(format!(
                    "trustee {trustee} listed twice"
                )));
            }
        }

        let split_id = shares[0].split_id();
        info!(
            secret_id = %split_id,
            shares = *config.share_count(),
            threshold = *config.threshold(),
            "session created"
        );
        Ok(Self {
            split_id,
            config,
            recovery: RecoveryOrchestrator::new(split_id, config.threshold()),
            shares,
            assignments,
        })
    }

    /// Identifier of the split behind this session
    #[must_use]
    pub fn secret_id(&self) -> SplitId {
        self.split_id
    }

    /// Forgets the owner-side copies of the shares
    ///
    /// The session keeps answering submissions (as closed) so that late
    /// shares are ignored, but [`Session::share_for`] returns `None`.
    pub fn retire(&mut self) {
        self.shares.clear();
        info!(secret_id = %self.split_id, "session retired");
    }

    #[must_use]
    pub fn is_trustee(&self, peer: &PeerId) -> bool {
        self.assignments.contains_key(peer)
    }

    /// The share bound to `trustee`
    #[must_use]
    pub fn share_for(&self, trustee: &PeerId) -> Option<&Share> {
        let index = self.assignments.get(trustee)?;
        self.shares.get(index.as_usize())
    }

    #[must_use]
    pub fn is_recovered(&self) -> bool {
        self.recovery.is_recovered()
    }

    /// Starts recovery against the trustees currently reachable
    ///
    /// Peers that are not trustees of this session are ignored.
    ///
    /// # Errors
    /// See [`RecoveryOrchestrator::begin`]
    pub fn request_shares<'a>(
        &self,
        reachable: impl IntoIterator<Item = &'a PeerId>,
    ) -> Result<RecoveryTicket, RecoveryError> {
        let trustees = reachable
            .into_iter()
            .filter(|peer| self.is_trustee(peer))
            .cloned()
            .collect();
        self.recovery.begin(trustees)
    }

    /// Hands a returned share to the orchestrator
    ///
    /// A share must be of this split and carry the index bound to `from`.
    pub fn submit_share(&self, from: &PeerId, share: Share) -> Submission {
        let index = share.index();
        let ours = share.split_id() == self.split_id && self.config.contains(index);
        if ours && self.assignments.get(from) != Some(&index) {
            warn!(peer = %from, index = *index, "share bound to another trustee ignored");
            return Submission::Misassigned;
        }
        self.recovery.submit(from, share)
    }

    /// See [`RecoveryOrchestrator::withdraw`]
    pub fn withdraw(&self, trustee: &PeerId) -> bool {
        self.recovery.withdraw(trustee)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trustees() -> Vec<PeerId> {
        vec!["Alice".into(), "Bob".into(), "Charlie".into()]
    }

    fn session() -> (Secret, Session) {
        let secret = Secret::new(vec![0x11; 16]);
        let session =
            Session::create(&secret, SplitConfig::from_raw(2, 3).unwrap(), &trustees()).unwrap();
        (secret, session)
    }

    #[test]
    fn test_each_trustee_gets_its_own_share() {
        let (_, session) = session();

        let indices: Vec<u8> = trustees()
            .iter()
            .map(|t| *session.share_for(t).unwrap().index())
            .collect();
        assert_eq!(indices, vec![0, 1, 2]);
        assert!(session.share_for(&"Mallory".into()).is_none());
    }

    #[test]
    fn test_trustee_count_must_match_shares() {
        let secret = Secret::new(vec![0x11; 16]);
        let result = Session::create(
            &secret,
            SplitConfig::from_raw(2, 3).unwrap(),
            &trustees()[..2],
        );
        assert!(matches!(result, Err(ShareError::InvalidParameters(_))));
    }

    #[test]
    fn test_duplicate_trustee_rejected() {
        let secret = Secret::new(vec![0x11; 16]);
        let listed = vec!["Alice".into(), "Alice".into(), "Bob".into()];
        let result = Session::create(&secret, SplitConfig::from_raw(2, 3).unwrap(), &listed);
        assert!(matches!(result, Err(ShareError::InvalidParameters(_))));
    }

    #[test]
    fn test_request_counts_only_session_trustees() {
        let (_, session) = session();
        let reachable: Vec<PeerId> = vec!["Alice".into(), "Mallory".into()];

        let result = session.request_shares(&reachable);
        assert_eq!(
            result.unwrap_err(),
            RecoveryError::InsufficientConnectedTrustees {
                needed: 2,
                connected: 1
            }
        );
    }

    #[test]
    fn test_share_of_another_trustee_rejected() {
        let (_, session) = session();
        let reachable = trustees();
        let _ticket = session.request_shares(&reachable).unwrap();

        let bobs = session.share_for(&"Bob".into()).unwrap().clone();
        assert_eq!(
            session.submit_share(&"Alice".into(), bobs.clone()),
            Submission::Misassigned
        );
        assert!(matches!(
            session.submit_share(&"Bob".into(), bobs),
            Submission::Pending { received: 1, .. }
        ));
    }

    #[test]
    fn test_round_trip_through_session() {
        let (secret, session) = session();
        let reachable = trustees();
        let ticket = session.request_shares(&reachable).unwrap();

        for trustee in &reachable[1..] {
            let share = session.share_for(trustee).unwrap().clone();
            session.submit_share(trustee, share);
        }

        assert_eq!(ticket.blocking_outcome().unwrap(), secret);
        assert!(session.is_recovered());
    }
}
