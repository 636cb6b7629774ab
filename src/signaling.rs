//! Signaling relay for the mediated mode
//!
//! Ferries channel negotiation messages (`offer`, `answer`, `candidate`)
//! between registered peers so they can open a direct channel. The payload
//! is forwarded verbatim and never retained. Undeliverable messages are
//! dropped without telling the sender.

use serde_json::Value;

use crate::domain::{PeerId, Role};
use crate::error::RelayError;
use crate::protocol::{Negotiation, ServerMessage};

/// Who may open a negotiation toward whom
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum NegotiationPolicy {
    /// One side of every negotiation must be the owner. Trustees can never
    /// reach, or learn about, each other through the relay.
    #[default]
    OwnerMediated,
    /// Any registered peer may negotiate with any other.
    Open,
}

impl NegotiationPolicy {
    #[must_use]
    pub fn permits(self, from: Role, to: Role) -> bool {
        match self {
            Self::Open => true,
            Self::OwnerMediated => from == Role::Owner || to == Role::Owner,
        }
    }
}

/// Stateless router applying a [`NegotiationPolicy`]
#[derive(Debug, Clone, Copy, Default)]
pub struct SignalingRelay {
    policy: NegotiationPolicy,
}

impl SignalingRelay {
    pub fn new(policy: NegotiationPolicy) -> Self {
        Self { policy }
    }

    #[must_use]
    pub fn policy(&self) -> NegotiationPolicy {
        self.policy
    }

    /// Decides whether a negotiation step reaches `target`
    ///
    /// `target_role` is `None` when no connected peer holds `target`. On
    /// success, returns the message to deliver, stamped with the
    /// authenticated sender id rather than anything the sender claimed.
    ///
    /// # Errors
    /// [`RelayError::UnknownTarget`] or [`RelayError::PolicyDenied`]; callers
    /// drop the message in both cases
    pub fn route(
        &self,
        from: &PeerId,
        from_role: Role,
        target: &PeerId,
        target_role: Option<Role>,
        step: Negotiation,
        payload: Value,
    ) -> Result<ServerMessage, RelayError> {
        let target_role =
            target_role.ok_or_else(|| RelayError::UnknownTarget(target.to_string()))?;
        if !self.policy.permits(from_role, target_role) {
            return Err(RelayError::PolicyDenied {
                from: from.to_string(),
                target: target.to_string(),
            });
        }
        Ok(step.forward(from.clone(), payload))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_owner_mediated_policy() {
        let policy = NegotiationPolicy::OwnerMediated;

        assert!(policy.permits(Role::Owner, Role::Trustee));
        assert!(policy.permits(Role::Trustee, Role::Owner));
        assert!(!policy.permits(Role::Trustee, Role::Trustee));
        assert!(NegotiationPolicy::Open.permits(Role::Trustee, Role::Trustee));
    }

    #[test]
    fn test_route_forwards_payload_verbatim() {
        let relay = SignalingRelay::default();
        let payload = json!({"sdp": "v=0", "extra": [1, 2, 3]});

        let msg = relay
            .route(
                &"Owner".into(),
                Role::Owner,
                &"Alice".into(),
                Some(Role::Trustee),
                Negotiation::Offer,
                payload.clone(),
            )
            .unwrap();
        assert_eq!(
            msg,
            ServerMessage::Offer {
                from: "Owner".into(),
                payload
            }
        );
    }

    #[test]
    fn test_route_unknown_target() {
        let relay = SignalingRelay::default();

        let result = relay.route(
            &"Owner".into(),
            Role::Owner,
            &"Zed".into(),
            None,
            Negotiation::Candidate,
            json!({}),
        );
        assert_eq!(result, Err(RelayError::UnknownTarget("Zed".into())));
    }

    #[test]
    fn test_route_trustee_to_trustee() {
        let denied = SignalingRelay::new(NegotiationPolicy::OwnerMediated).route(
            &"Alice".into(),
            Role::Trustee,
            &"Bob".into(),
            Some(Role::Trustee),
            Negotiation::Offer,
            json!({}),
        );
        assert!(matches!(denied, Err(RelayError::PolicyDenied { .. })));

        let allowed = SignalingRelay::new(NegotiationPolicy::Open).route(
            &"Alice".into(),
            Role::Trustee,
            &"Bob".into(),
            Some(Role::Trustee),
            Negotiation::Offer,
            json!({}),
        );
        assert!(allowed.is_ok());
    }
}
