//! # catsync Common Library
//!
//! Shared code for the catsync crates:
//! - Common error type
//! - TOML configuration loading and priority resolution
//! - Logging initialisation
//! - Human-readable duration formatting

pub mod config;
pub mod error;
pub mod human_time;
pub mod logging;

pub use error::{Error, Result};
