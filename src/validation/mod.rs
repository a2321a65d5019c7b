//! Price validation.
//!
//! A fetched price is only cached after it passes the sanity bounds for its
//! asset, the age limit for its symbol, and (when two or more samples were
//! gathered) the cross-source consensus check.

pub mod bounds;
pub mod consensus;

pub use bounds::{AssetClass, SanityBoundsTable};
pub use consensus::{ConsensusValidator, Validation, ValidationReason};
