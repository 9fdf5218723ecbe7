//! Test Helper Utilities
//!
//! Shared utilities for testing catsync-engine

pub mod fake_catalog;

// Re-export commonly used items
pub use fake_catalog::{fast_transport, remote_track, FakeCatalog};
