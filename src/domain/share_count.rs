//! Share count newtype

use anyhow::{Result, bail};

/// Number of shares `n` a secret is split into (1..=254)
///
/// blahaj evaluates the polynomial at `x = 1..=n` over GF(256), which caps
/// `n` at 254 once the zero point is excluded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ShareCount(u8);

impl ShareCount {
    /// Minimum valid share count
    pub const MIN: u8 = 1;

    /// Maximum valid share count
    pub const MAX: u8 = 254;

    /// Creates a new share count
    ///
    /// # Errors
    /// Returns an error if count is 0 or 255
    ///
    /// # Examples
    ///
    /// ```rust
    /// use sharekeeper::domain::ShareCount;
    ///
    /// let count = ShareCount::new(3).unwrap();
    /// assert_eq!(*count, 3);
    ///
    /// assert!(ShareCount::new(0).is_err());
    /// assert!(ShareCount::new(255).is_err());
    /// ```
    pub fn new(value: u8) -> Result<Self> {
        if value < Self::MIN {
            bail!("Share count must be at least {}", Self::MIN);
        }
        if value > Self::MAX {
            bail!("Share count maximum is {}", Self::MAX);
        }
        Ok(Self(value))
    }

    /// Share count as a collection size
    #[must_use]
    pub fn as_usize(self) -> usize {
        usize::from(self.0)
    }
}

impl std::ops::Deref for ShareCount {
    type Target = u8;

    #[inline]
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}
