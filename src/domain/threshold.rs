//! Quorum newtype

use anyhow::{Result, bail};

/// Quorum `k` of a split (2..=255)
///
/// A quorum of 1 would hand the whole secret to every trustee, so it is
/// refused at construction even though `1 <= k` is the only hard bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Threshold(u8);

impl Threshold {
    /// Smallest accepted quorum
    pub const MIN: u8 = 2;

    /// Creates a new threshold
    ///
    /// # Errors
    /// Returns an error if the value is below [`Threshold::MIN`]
    ///
    /// # Examples
    ///
    /// ```rust
    /// use sharekeeper::domain::Threshold;
    ///
    /// let quorum = Threshold::new(2).unwrap();
    /// assert_eq!(*quorum, 2);
    ///
    /// assert!(Threshold::new(1).is_err());
    /// assert!(Threshold::new(0).is_err());
    /// ```
    pub fn new(value: u8) -> Result<Self> {
        if value < Self::MIN {
            bail!("Threshold must be at least {} (got {value})", Self::MIN);
        }
        Ok(Self(value))
    }

    /// Quorum as a collection size
    #[must_use]
    pub fn as_usize(self) -> usize {
        usize::from(self.0)
    }
}

impl std::ops::Deref for Threshold {
    type Target = u8;

    #[inline]
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl std::fmt::Display for Threshold {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
