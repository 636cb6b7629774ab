//! Domain types for threshold recovery sessions
//!
//! Validated newtypes shared by every layer of the relay:
//! - [`Threshold`] - quorum `k`, the number of shares needed to recover (2..=255)
//! - [`ShareCount`] - number of shares `n` a secret is split into (1..=254)
//! - [`ShareIndex`] - position of a share inside its split (0..=254)
//! - [`SplitConfig`] - a validated `k <= n` pair
//! - [`PeerId`], [`Role`], [`ConnectionState`] - peer identity and lifecycle

mod config;
mod peer;
mod share_count;
mod share_index;
mod threshold;

pub use config::SplitConfig;
pub use peer::{ConnectionState, PeerId, Role};
pub use share_count::ShareCount;
pub use share_index::ShareIndex;
pub use threshold::Threshold;
