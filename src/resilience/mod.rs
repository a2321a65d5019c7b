//! Failure isolation and backpressure.
//!
//! - `circuit_breaker`: per-source gate in front of every adapter call
//! - `failure_tracker`: per-asset exponential backoff
//! - `throttle`: daily call budget driving the background refresh interval
//!
//! Each component guards its own state; none of them share a lock.

pub mod circuit_breaker;
pub mod failure_tracker;
pub mod throttle;

pub use circuit_breaker::{CircuitBreaker, CircuitSnapshot, CircuitState};
pub use failure_tracker::FailureTracker;
pub use throttle::{BudgetStatus, RateBudgetThrottler};
