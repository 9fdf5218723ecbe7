//! catsync-engine library interface
//!
//! Reconciles a local music library against a remote catalog: decides per
//! track whether to skip, upload, or add missing metadata, and executes those
//! decisions through a rate-limited transport.

pub mod config;
pub mod error;
pub mod models;
pub mod services;

pub use crate::config::{load_app_config, AppConfig, ReconcileConfig, RemoteConfig};
pub use crate::error::{DecisionLogError, ReconcileError, ReconcileResult, TransportError};
