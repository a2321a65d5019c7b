//! Orchestration: the public `PriceOracle`, its background refresher, and
//! the stats it reports.

pub mod oracle;
mod refresher;
pub mod stats;

pub use oracle::PriceOracle;
pub use stats::CacheStats;
