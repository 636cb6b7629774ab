//! Share index newtype

use anyhow::{Result, bail};

/// Position of a share inside its split (0..=254)
///
/// Unique within a session and always below the split's [`ShareCount`](super::ShareCount).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ShareIndex(u8);

impl ShareIndex {
    /// Maximum valid share index
    pub const MAX: u8 = 254;

    /// Creates a new share index
    ///
    /// # Errors
    /// Returns an error if index is 255
    ///
    /// # Examples
    ///
    /// ```rust
    /// use sharekeeper::domain::ShareIndex;
    ///
    /// let index = ShareIndex::new(0).unwrap();
    /// assert_eq!(*index, 0);
    ///
    /// assert!(ShareIndex::new(255).is_err());
    /// ```
    pub fn new(value: u8) -> Result<Self> {
        if value > Self::MAX {
            bail!("Share index {value} is out of range (max {})", Self::MAX);
        }
        Ok(Self(value))
    }

    /// Index as a slot in the owner's share vector
    #[must_use]
    pub fn as_usize(self) -> usize {
        usize::from(self.0)
    }
}

impl std::ops::Deref for ShareIndex {
    type Target = u8;

    #[inline]
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl std::fmt::Display for ShareIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
