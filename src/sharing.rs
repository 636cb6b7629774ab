//! Threshold secret sharing adapter
//!
//! Wraps blahaj's Shamir implementation with the bookkeeping the recovery
//! protocol needs: share indices, a per-split identifier, an integrity seal
//! over the secret, and a checksummed wire encoding.
//!
//! # Overview
//!
//! - [`split`] seals the secret as `secret || crc32(secret)`, deals `n`
//!   shares from a fresh random polynomial and tags them with a random
//!   [`SplitId`].
//! - [`combine`] rejects mixed, duplicate or inconsistent shares, recovers
//!   from exactly `k` of them and verifies the seal.
//! - [`Share::encode`] / [`Share::decode`] move a share over the wire as hex:
//!   `version | threshold | index | split_id | payload | crc32`.
//!
//! # Examples
//!
//! ```rust
//! use sharekeeper::domain::SplitConfig;
//! use sharekeeper::sharing::{Secret, combine, split};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let secret = Secret::new(vec![0x42; 16]);
//! let shares = split(&secret, SplitConfig::from_raw(2, 3)?)?;
//!
//! let recovered = combine(&[shares[2].clone(), shares[0].clone()])?;
//! assert_eq!(recovered, secret);
//! # Ok(())
//! # }
//! ```

use std::collections::HashSet;

use blahaj::Sharks;
use crc::{CRC_32_ISO_HDLC, Crc};
use rand::RngCore;
use subtle::ConstantTimeEq;
use zeroize::Zeroizing;

use crate::domain::{ShareIndex, SplitConfig, Threshold};
use crate::error::ShareError;

/// CRC32 algorithm for the secret seal and the share frame
const CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

/// Version byte leading every encoded share
pub const WIRE_VERSION: u8 = 1;

const CHECKSUM_LEN: usize = 4;

/// version + threshold + index + split id
const HEADER_LEN: usize = 3 + SplitId::LEN;

/// Opaque secret payload, wiped from memory on drop
///
/// Equality is constant-time.
#[derive(Clone)]
pub struct Secret(Zeroizing<Vec<u8>>);

impl Secret {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(Zeroizing::new(bytes))
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl PartialEq for Secret {
    fn eq(&self, other: &Self) -> bool {
        self.0.as_slice().ct_eq(other.0.as_slice()).into()
    }
}

impl Eq for Secret {}

impl std::fmt::Debug for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Secret({} bytes)", self.0.len())
    }
}

/// Random tag shared by every share of one `split` call
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct SplitId([u8; SplitId::LEN]);

impl SplitId {
    pub const LEN: usize = 8;

    fn random() -> Self {
        let mut bytes = [0u8; Self::LEN];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(bytes)
    }
}

impl std::fmt::Display for SplitId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl std::fmt::Debug for SplitId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SplitId({self})")
    }
}

/// One share of a split
///
/// The payload is the raw blahaj share (x coordinate followed by the
/// y values). It is meaningless outside its originating split.
#[derive(Clone, PartialEq)]
pub struct Share {
    split_id: SplitId,
    threshold: Threshold,
    index: ShareIndex,
    payload: Zeroizing<Vec<u8>>,
}

impl Share {
    #[must_use]
    pub fn index(&self) -> ShareIndex {
        self.index
    }

    #[must_use]
    pub fn threshold(&self) -> Threshold {
        self.threshold
    }

    #[must_use]
    pub fn split_id(&self) -> SplitId {
        self.split_id
    }

    /// Encodes the share as a lowercase hex frame with a trailing CRC32
    #[must_use]
    pub fn encode(&self) -> String {
        let mut frame = Zeroizing::new(Vec::with_capacity(
            HEADER_LEN + self.payload.len() + CHECKSUM_LEN,
        ));
        frame.push(WIRE_VERSION);
        frame.push(*self.threshold);
        frame.push(*self.index);
        frame.extend_from_slice(&self.split_id.0);
        frame.extend_from_slice(&self.payload);
        let checksum = CRC32.checksum(&frame);
        frame.extend_from_slice(&checksum.to_be_bytes());
        hex::encode(frame.as_slice())
    }

    /// Parses a frame produced by [`Share::encode`]
    ///
    /// # Errors
    /// Returns [`ShareError::MalformedShare`] for invalid hex, a truncated
    /// frame, an unknown version, out-of-range parameters or a bad checksum
    pub fn decode(encoded: &str) -> Result<Self, ShareError> {
        let frame = Zeroizing::new(
            hex::decode(encoded.trim())
                .map_err(|_| ShareError::MalformedShare("share is not valid hex".into()))?,
        );

        // At least one x byte and one y byte of payload
        if frame.len() < HEADER_LEN + 2 + CHECKSUM_LEN {
            return Err(ShareError::MalformedShare(format!(
                "share frame too short: {} bytes",
                frame.len()
            )));
        }

        let (body, tail) = frame.split_at(frame.len() - CHECKSUM_LEN);
        let expected = CRC32.checksum(body);
        let actual = u32::from_be_bytes([tail[0], tail[1], tail[2], tail[3]]);
        if expected != actual {
            return Err(ShareError::MalformedShare(format!(
                "checksum verification failed: expected 0x{expected:08x}, got 0x{actual:08x}"
            )));
        }

        if body[0] != WIRE_VERSION {
            return Err(ShareError::MalformedShare(format!(
                "unsupported share version {}",
                body[0]
            )));
        }

        let threshold =
            Threshold::new(body[1]).map_err(|e| ShareError::MalformedShare(e.to_string()))?;
        let index =
            ShareIndex::new(body[2]).map_err(|e| ShareError::MalformedShare(e.to_string()))?;
        let mut split_id = [0u8; SplitId::LEN];
        split_id.copy_from_slice(&body[3..HEADER_LEN]);

        Ok(Self {
            split_id: SplitId(split_id),
            threshold,
            index,
            payload: Zeroizing::new(body[HEADER_LEN..].to_vec()),
        })
    }
}

impl std::fmt::Debug for Share {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Share")
            .field("split_id", &self.split_id)
            .field("threshold", &*self.threshold)
            .field("index", &*self.index)
            .finish_non_exhaustive()
    }
}

/// Splits `secret` into `n` shares, any `k` of which recover it
///
/// Every call draws a fresh polynomial and split id, so two splits of the
/// same secret share nothing but their parameters.
///
/// # Errors
/// Returns [`ShareError::InvalidParameters`] for an empty secret
pub fn split(secret: &Secret, config: SplitConfig) -> Result<Vec<Share>, ShareError> {
    if secret.is_empty() {
        return Err(ShareError::InvalidParameters("secret is empty".into()));
    }

    let sealed = seal(secret.as_bytes());
    let threshold = config.threshold();
    let split_id = SplitId::random();

    let sharks = Sharks(*threshold);
    let dealer = sharks.dealer(&sealed);

    dealer
        .take(config.share_count().as_usize())
        .enumerate()
        .map(|(idx, share)| {
            // idx < share_count, which is a u8
            let idx_u8 =
                u8::try_from(idx).unwrap_or_else(|_| unreachable!("idx < share_count fits in u8"));
            let index = ShareIndex::new(idx_u8)
                .map_err(|e| ShareError::InvalidParameters(e.to_string()))?;
            Ok(Share {
                split_id,
                threshold,
                index,
                payload: Zeroizing::new(Vec::from(&share)),
            })
        })
        .collect()
}

/// Reconstructs the secret from at least `k` shares of one split
///
/// When more than `k` shares are supplied, the first `k` in input order are
/// used.
///
/// # Errors
/// - [`ShareError::MixedSplits`] if the shares come from different splits
/// - [`ShareError::MalformedShare`] for inconsistent parameters or payloads
/// - [`ShareError::DuplicateShare`] if an index repeats
/// - [`ShareError::InsufficientShares`] for fewer than `k` shares
/// - [`ShareError::ChecksumMismatch`] if the recovered secret fails its seal
pub fn combine(shares: &[Share]) -> Result<Secret, ShareError> {
    let Some(first) = shares.first() else {
        return Err(ShareError::InsufficientShares {
            needed: usize::from(Threshold::MIN),
            provided: 0,
        });
    };

    let threshold = first.threshold;
    let mut seen = HashSet::with_capacity(shares.len());
    for share in shares {
        if share.split_id != first.split_id {
            return Err(ShareError::MixedSplits);
        }
        if share.threshold != threshold {
            return Err(ShareError::MalformedShare(format!(
                "inconsistent threshold: expected {threshold}, got {}",
                share.threshold
            )));
        }
        if share.payload.len() != first.payload.len() {
            return Err(ShareError::MalformedShare(
                "share payloads differ in length".into(),
            ));
        }
        if !seen.insert(share.index) {
            return Err(ShareError::DuplicateShare(*share.index));
        }
    }

    let needed = threshold.as_usize();
    if shares.len() < needed {
        return Err(ShareError::InsufficientShares {
            needed,
            provided: shares.len(),
        });
    }

    let points = shares
        .iter()
        .take(needed)
        .map(|share| {
            blahaj::Share::try_from(share.payload.as_slice())
                .map_err(|e| ShareError::MalformedShare(format!("invalid share payload: {e}")))
        })
        .collect::<Result<Vec<_>, _>>()?;

    let sealed = Zeroizing::new(
        Sharks(*threshold)
            .recover(&points)
            .map_err(|e| ShareError::MalformedShare(format!("failed to recover secret: {e}")))?,
    );

    unseal(&sealed)
}

/// Appends the CRC32 of the secret
fn seal(secret: &[u8]) -> Zeroizing<Vec<u8>> {
    let mut sealed = Zeroizing::new(Vec::with_capacity(secret.len() + CHECKSUM_LEN));
    sealed.extend_from_slice(secret);
    sealed.extend_from_slice(&CRC32.checksum(secret).to_be_bytes());
    sealed
}

/// Verifies and strips the CRC32 appended by [`seal`]
fn unseal(sealed: &[u8]) -> Result<Secret, ShareError> {
    if sealed.len() <= CHECKSUM_LEN {
        return Err(ShareError::ChecksumMismatch);
    }
    let (secret, tail) = sealed.split_at(sealed.len() - CHECKSUM_LEN);
    let expected = CRC32.checksum(secret).to_be_bytes();
    if !bool::from(expected.as_slice().ct_eq(tail)) {
        return Err(ShareError::ChecksumMismatch);
    }
    Ok(Secret::new(secret.to_vec()))
}
