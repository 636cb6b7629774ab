//! Property tests for split/combine workflows

use bip39::Mnemonic;
use quickcheck::{Arbitrary, Gen};
use quickcheck_macros::quickcheck;
use sharekeeper::commands::{combine_shares, split_mnemonic};
use sharekeeper::domain::SplitConfig;
use sharekeeper::error::ShareError;
use sharekeeper::sharing::{Secret, Share, combine, split};

/// Wrapper for valid BIP39 mnemonics (12 or 24 words)
#[derive(Clone, Debug)]
pub struct ValidMnemonic(pub Mnemonic);

impl Arbitrary for ValidMnemonic {
    fn arbitrary(g: &mut Gen) -> Self {
        let entropy_size = if bool::arbitrary(g) { 16 } else { 32 };

        let mut entropy = vec![0u8; entropy_size];
        for byte in &mut entropy {
            *byte = u8::arbitrary(g);
        }

        // Create mnemonic from entropy (this handles checksum automatically)
        let mnemonic = Mnemonic::from_entropy(&entropy).expect("Valid entropy");
        ValidMnemonic(mnemonic)
    }
}

/// Arbitrary non-empty secret bytes
#[derive(Clone, Debug)]
pub struct SecretBytes(pub Vec<u8>);

impl Arbitrary for SecretBytes {
    fn arbitrary(g: &mut Gen) -> Self {
        let mut bytes = Vec::<u8>::arbitrary(g);
        if bytes.is_empty() {
            bytes.push(u8::arbitrary(g));
        }
        SecretBytes(bytes)
    }
}

/// Wrapper for valid threshold and share count pairs
#[derive(Clone, Copy, Debug)]
pub struct ValidShamirParams {
    pub threshold: u8,
    pub num_shares: u8,
}

impl ValidShamirParams {
    pub fn config(self) -> SplitConfig {
        SplitConfig::from_raw(self.threshold, self.num_shares).unwrap()
    }
}

impl Arbitrary for ValidShamirParams {
    fn arbitrary(g: &mut Gen) -> Self {
        // Generate share count between 2 and 20 (keep it reasonable for testing)
        let num_shares = (u8::arbitrary(g) % 19) + 2; // 2..=20

        // Generate threshold between 2 and num_shares (never 1)
        let threshold = (u8::arbitrary(g) % (num_shares - 1)) + 2; // 2..=num_shares

        ValidShamirParams {
            threshold,
            num_shares,
        }
    }
}

/// Deterministic shuffle of `0..len` driven by `seed`
pub fn shuffled_indices(len: usize, seed: u64) -> Vec<usize> {
    let mut indices: Vec<usize> = (0..len).collect();
    let mut seed = seed;
    for i in 0..indices.len() {
        seed = seed.wrapping_mul(1_103_515_245).wrapping_add(12_345);
        let range = u64::try_from(indices.len() - i).unwrap();
        let j = usize::try_from(seed % range).unwrap() + i;
        indices.swap(i, j);
    }
    indices
}

/// Any k distinct shares, in any order, recover the secret
#[quickcheck]
fn prop_any_threshold_subset_recovers(
    secret: SecretBytes,
    params: ValidShamirParams,
    selection_seed: u64,
) -> bool {
    let secret = Secret::new(secret.0);
    let Ok(shares) = split(&secret, params.config()) else {
        return false;
    };

    let selected: Vec<Share> = shuffled_indices(shares.len(), selection_seed)
        .into_iter()
        .take(params.threshold as usize)
        .map(|idx| shares[idx].clone())
        .collect();

    combine(&selected).is_ok_and(|recovered| recovered == secret)
}

/// Fewer than k shares never recover anything
#[quickcheck]
fn prop_insufficient_shares_fail(
    secret: SecretBytes,
    params: ValidShamirParams,
    selection_seed: u64,
) -> bool {
    let secret = Secret::new(secret.0);
    let Ok(shares) = split(&secret, params.config()) else {
        return false;
    };

    let needed = params.threshold as usize;
    let selected: Vec<Share> = shuffled_indices(shares.len(), selection_seed)
        .into_iter()
        .take(needed - 1)
        .map(|idx| shares[idx].clone())
        .collect();

    combine(&selected)
        == Err(ShareError::InsufficientShares {
            needed,
            provided: needed - 1,
        })
}

/// Splitting the same secret twice yields unrelated shares
#[quickcheck]
fn prop_splits_are_randomized(secret: SecretBytes, params: ValidShamirParams) -> bool {
    let secret = Secret::new(secret.0);
    let (Ok(first), Ok(second)) = (
        split(&secret, params.config()),
        split(&secret, params.config()),
    ) else {
        return false;
    };

    first[0].split_id() != second[0].split_id()
        && first
            .iter()
            .zip(&second)
            .any(|(a, b)| a.encode() != b.encode())
}

/// Shares of two different splits never combine
#[quickcheck]
fn prop_mixed_shares_fail(secret: SecretBytes, params: ValidShamirParams) -> bool {
    let secret = Secret::new(secret.0);
    let (Ok(first), Ok(second)) = (
        split(&secret, params.config()),
        split(&secret, params.config()),
    ) else {
        return false;
    };

    let mut mixed: Vec<Share> = first
        .iter()
        .take(params.threshold as usize - 1)
        .cloned()
        .collect();
    mixed.push(second[params.num_shares as usize - 1].clone());

    combine(&mixed) == Err(ShareError::MixedSplits)
}

/// Encoding keeps index and threshold, and any flipped byte is caught
#[quickcheck]
fn prop_corrupted_encoding_rejected(
    secret: SecretBytes,
    params: ValidShamirParams,
    position: usize,
) -> bool {
    let secret = Secret::new(secret.0);
    let Ok(shares) = split(&secret, params.config()) else {
        return false;
    };

    let share = &shares[position % shares.len()];
    let encoded = share.encode();
    let Ok(decoded) = Share::decode(&encoded) else {
        return false;
    };
    if decoded.index() != share.index() || decoded.threshold() != share.threshold() {
        return false;
    }

    let mut bytes = hex::decode(&encoded).unwrap();
    let at = position % bytes.len();
    bytes[at] ^= 0x01;
    matches!(
        Share::decode(&hex::encode(bytes)),
        Err(ShareError::MalformedShare(_))
    )
}

/// The mnemonic commands round-trip through any k shares
#[quickcheck]
fn prop_mnemonic_round_trip(
    mnemonic: ValidMnemonic,
    params: ValidShamirParams,
    selection_seed: u64,
) -> bool {
    let ValidMnemonic(inner_mnemonic) = mnemonic;
    let phrase = inner_mnemonic.to_string();

    let Ok(shares) = split_mnemonic(&phrase, params.config()) else {
        return false;
    };
    let selected: Vec<String> = shuffled_indices(shares.len(), selection_seed)
        .into_iter()
        .take(params.threshold as usize)
        .map(|idx| shares[idx].clone())
        .collect();

    combine_shares(&selected).is_ok_and(|recovered| recovered.as_str() == phrase)
}

#[cfg(test)]
mod edge_cases {
    use super::*;

    #[test]
    fn test_threshold_1_rejected() {
        assert!(SplitConfig::from_raw(1, 3).is_err());
    }

    #[test]
    fn test_threshold_above_share_count_rejected() {
        assert!(SplitConfig::from_raw(4, 3).is_err());
    }

    #[test]
    fn test_shuffle_is_a_permutation() {
        let mut indices = shuffled_indices(20, 42);
        indices.sort_unstable();
        assert_eq!(indices, (0..20).collect::<Vec<_>>());
    }
}
