//! Integration tests for the price oracle, driven through the public API
//! with in-memory sources.

mod mock_source;
mod oracle_flow;
