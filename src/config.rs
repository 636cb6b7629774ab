//! Roster configuration
//!
//! Peer ids come from the command line (or `PEERS`). Each peer's
//! pre-shared key is read from `<ID>_KEY`, with the id uppercased; a peer
//! without one gets a freshly generated key that the operator has to hand
//! out.

use std::collections::BTreeSet;

use anyhow::{Result, bail};

use crate::domain::PeerId;
use crate::registry::{PreSharedKey, Roster};

/// A roster plus the keys that had to be generated for it
#[derive(Debug)]
pub struct RosterConfig {
    pub roster: Roster,
    pub generated: Vec<(PeerId, PreSharedKey)>,
}

/// Name of the variable holding `peer`'s pre-shared key
#[must_use]
pub fn key_variable(peer: &str) -> String {
    format!("{}_KEY", peer.to_uppercase())
}

/// Builds the roster from the process environment
///
/// # Errors
/// See [`build_roster`]
pub fn roster_from_env(owner: &str, peers: &[String]) -> Result<RosterConfig> {
    build_roster(owner, peers, |var| std::env::var(var).ok())
}

/// Builds the roster, resolving keys through `lookup`
///
/// The owner is always on the roster, even when missing from `peers`.
///
/// # Errors
/// Empty or duplicate peer ids
pub fn build_roster(
    owner: &str,
    peers: &[String],
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<RosterConfig> {
    let owner = owner.trim();
    if owner.is_empty() {
        bail!("Owner id must not be empty");
    }

    let mut seen = BTreeSet::new();
    let mut trustees = Vec::new();
    for peer in peers.iter().map(|p| p.trim()) {
        if peer.is_empty() {
            bail!("Peer ids must not be empty");
        }
        if !seen.insert(peer) {
            bail!("Peer id {peer} is listed twice");
        }
        if peer != owner {
            trustees.push(peer);
        }
    }

    let mut generated = Vec::new();
    let mut resolve = |id: &str| {
        let key = lookup(&key_variable(id))
            .filter(|key| !key.is_empty())
            .map(PreSharedKey::new)
            .unwrap_or_else(|| {
                let key = PreSharedKey::generate();
                generated.push((PeerId::from(id), key.clone()));
                key
            });
        (PeerId::from(id), key)
    };

    let (owner_id, owner_key) = resolve(owner);
    let mut roster = Roster::new(owner_id, owner_key);
    for trustee in trustees {
        let (id, key) = resolve(trustee);
        roster = roster.with_trustee(id, key);
    }

    Ok(RosterConfig { roster, generated })
}
