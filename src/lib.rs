//! Price oracle for trading bots.
//!
//! Library crate exposing all modules for use by integration tests
//! and the binary entry point.

pub mod config;
pub mod types;
pub mod validation;
pub mod resilience;
pub mod cache;
pub mod sources;
pub mod engine;
pub mod dashboard;
