//! Credential registry
//!
//! Validates peers against the statically configured roster of pre-shared
//! keys, tracks which ids currently hold an open connection, and keeps the
//! single-use access tokens handed to trustees at distribution time.
//!
//! All secret comparisons are constant-time.

use std::collections::{BTreeMap, HashMap, HashSet};

use rand::RngCore;
use subtle::ConstantTimeEq;
use tracing::debug;
use zeroize::Zeroizing;

use crate::domain::{PeerId, Role};
use crate::error::RegistryError;

/// Number of random bytes behind generated keys and tokens
const CREDENTIAL_BYTES: usize = 16;

fn random_hex() -> Zeroizing<String> {
    let mut bytes = Zeroizing::new([0u8; CREDENTIAL_BYTES]);
    rand::thread_rng().fill_bytes(&mut *bytes);
    Zeroizing::new(hex::encode(&*bytes))
}

fn ct_str_eq(a: &str, b: &str) -> bool {
    a.as_bytes().ct_eq(b.as_bytes()).into()
}

/// Pre-shared key of one roster member
#[derive(Clone)]
pub struct PreSharedKey(Zeroizing<String>);

impl PreSharedKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(Zeroizing::new(key.into()))
    }

    /// Generates a random 128-bit key, hex encoded
    #[must_use]
    pub fn generate() -> Self {
        Self(random_hex())
    }

    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }

    fn matches(&self, presented: &str) -> bool {
        ct_str_eq(&self.0, presented)
    }
}

impl std::fmt::Debug for PreSharedKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("PreSharedKey(..)")
    }
}

/// Single-use credential bound to one trustee name
#[derive(Clone)]
pub struct AccessToken(Zeroizing<String>);

impl AccessToken {
    fn generate() -> Self {
        Self(random_hex())
    }

    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("AccessToken(..)")
    }
}

/// The fixed set of peers allowed to register, and the owner among them
#[derive(Debug, Clone)]
pub struct Roster {
    owner: PeerId,
    keys: BTreeMap<PeerId, PreSharedKey>,
}

impl Roster {
    /// Creates a roster whose owner holds `owner_key`
    pub fn new(owner: PeerId, owner_key: PreSharedKey) -> Self {
        let mut keys = BTreeMap::new();
        keys.insert(owner.clone(), owner_key);
        Self { owner, keys }
    }

    /// Adds or replaces a trustee
    #[must_use]
    pub fn with_trustee(mut self, id: PeerId, key: PreSharedKey) -> Self {
        self.keys.insert(id, key);
        self
    }

    #[must_use]
    pub fn owner(&self) -> &PeerId {
        &self.owner
    }

    /// Trustee ids, sorted
    pub fn trustees(&self) -> impl Iterator<Item = &PeerId> {
        self.keys.keys().filter(move |id| **id != self.owner)
    }

    #[must_use]
    pub fn role_of(&self, id: &PeerId) -> Option<Role> {
        if !self.keys.contains_key(id) {
            None
        } else if *id == self.owner {
            Some(Role::Owner)
        } else {
            Some(Role::Trustee)
        }
    }

    fn verify(&self, id: &str, presented: &str) -> Result<(PeerId, Role), RegistryError> {
        let peer = PeerId::from(id);
        let key = self
            .keys
            .get(&peer)
            .ok_or_else(|| RegistryError::InvalidPeerId(id.to_string()))?;
        if !key.matches(presented) {
            return Err(RegistryError::InvalidKey(id.to_string()));
        }
        let role = self
            .role_of(&peer)
            .ok_or_else(|| RegistryError::InvalidPeerId(id.to_string()))?;
        Ok((peer, role))
    }
}

/// Registration and token bookkeeping for the coordinator
///
/// Not synchronized on its own; the coordinator owns it exclusively.
#[derive(Debug)]
pub struct CredentialRegistry {
    roster: Roster,
    connected: HashSet<PeerId>,
    tokens: HashMap<PeerId, AccessToken>,
}

impl CredentialRegistry {
    pub fn new(roster: Roster) -> Self {
        Self {
            roster,
            connected: HashSet::new(),
            tokens: HashMap::new(),
        }
    }

    #[must_use]
    pub fn roster(&self) -> &Roster {
        &self.roster
    }

    /// Admits `id` if it is on the roster, `key` matches and no open
    /// connection already holds it
    ///
    /// # Errors
    /// `InvalidPeerId`, `InvalidKey` or `AlreadyRegistered`; the registry is
    /// unchanged on error
    pub fn register(&mut self, id: &str, key: &str) -> Result<(PeerId, Role), RegistryError> {
        let (peer, role) = self.roster.verify(id, key)?;
        self.claim(&peer)?;
        Ok((peer, role))
    }

    /// Marks `id` as held by an open connection without a key check
    ///
    /// Used when a trustee proves itself with an access token instead.
    ///
    /// # Errors
    /// `AlreadyRegistered` if another connection holds the id
    pub fn claim(&mut self, id: &PeerId) -> Result<(), RegistryError> {
        if !self.connected.insert(id.clone()) {
            return Err(RegistryError::AlreadyRegistered(id.to_string()));
        }
        debug!(peer = %id, "id claimed");
        Ok(())
    }

    /// Frees `id` after its connection closed
    pub fn release(&mut self, id: &PeerId) -> bool {
        self.connected.remove(id)
    }

    #[must_use]
    pub fn is_connected(&self, id: &PeerId) -> bool {
        self.connected.contains(id)
    }

    #[must_use]
    pub fn connected_count(&self) -> usize {
        self.connected.len()
    }

    /// Generates the access token for `trustee`, replacing any unused one
    pub fn issue_token(&mut self, trustee: &PeerId) -> AccessToken {
        let token = AccessToken::generate();
        self.tokens.insert(trustee.clone(), token.clone());
        token
    }

    /// Consumes the token bound to `name`
    ///
    /// A consumed token is gone for good, even if the trustee's connection
    /// later drops. A wrong token leaves the real one usable.
    ///
    /// # Errors
    /// `InvalidToken` for an unknown name, a mismatch, or a token already used
    pub fn consume_token(&mut self, name: &str, token: &str) -> Result<PeerId, RegistryError> {
        let peer = PeerId::from(name);
        let valid = self
            .tokens
            .get(&peer)
            .is_some_and(|expected| ct_str_eq(expected.expose(), token));
        if !valid {
            return Err(RegistryError::InvalidToken);
        }
        self.tokens.remove(&peer);
        debug!(peer = %peer, "access token consumed");
        Ok(peer)
    }

    /// Drops every outstanding token
    pub fn revoke_tokens(&mut self) {
        self.tokens.clear();
    }

    #[must_use]
    pub fn outstanding_tokens(&self) -> usize {
        self.tokens.len()
    }
}
