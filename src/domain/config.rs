//! Split parameters

use anyhow::{Result, bail};

use super::{ShareCount, ShareIndex, Threshold};

/// Validated pair of quorum and share count
///
/// Enforces `k <= n` so a session can never demand more shares than it
/// hands out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SplitConfig {
    threshold: Threshold,
    share_count: ShareCount,
}

impl SplitConfig {
    /// Creates a new split configuration
    ///
    /// # Errors
    /// Returns an error if threshold exceeds share count
    ///
    /// # Examples
    ///
    /// ```rust
    /// use sharekeeper::domain::{ShareCount, SplitConfig, Threshold};
    ///
    /// let config = SplitConfig::new(
    ///     Threshold::new(2).unwrap(),
    ///     ShareCount::new(3).unwrap(),
    /// ).unwrap();
    /// assert_eq!(*config.threshold(), 2);
    /// assert_eq!(*config.share_count(), 3);
    ///
    /// assert!(SplitConfig::new(Threshold::new(4).unwrap(), ShareCount::new(3).unwrap()).is_err());
    /// ```
    pub fn new(threshold: Threshold, share_count: ShareCount) -> Result<Self> {
        if *threshold > *share_count {
            bail!("Threshold {threshold} cannot exceed share count {}", *share_count);
        }
        Ok(Self {
            threshold,
            share_count,
        })
    }

    /// Builds a configuration from raw numbers, validating every bound
    ///
    /// # Errors
    /// Returns an error if either value is out of range or `k > n`
    pub fn from_raw(threshold: u8, share_count: u8) -> Result<Self> {
        Self::new(Threshold::new(threshold)?, ShareCount::new(share_count)?)
    }

    /// Gets the quorum
    #[must_use]
    pub fn threshold(&self) -> Threshold {
        self.threshold
    }

    /// Gets the share count
    #[must_use]
    pub fn share_count(&self) -> ShareCount {
        self.share_count
    }

    /// Whether `index` names a share of this split
    #[must_use]
    pub fn contains(&self, index: ShareIndex) -> bool {
        *index < *self.share_count
    }
}
