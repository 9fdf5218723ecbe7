//! Service modules for catalog reconciliation
//!
//! Bottom-up:
//! - normalizer / fingerprint_builder: canonical comparison keys
//! - catalog_api / transport: remote calls and their retry policy
//! - catalog_cache: indexed snapshot of the remote catalog
//! - detection_engine: per-track upload decision
//! - decision_log / reconciliation_orchestrator: run execution and audit trail

pub mod catalog_api;
pub mod catalog_cache;
pub mod decision_log;
pub mod detection_engine;
pub mod fingerprint_builder;
pub mod normalizer;
pub mod reconciliation_orchestrator;
pub mod transport;

pub use catalog_api::{CatalogApi, HttpCatalogApi};
pub use catalog_cache::{CacheSnapshot, CatalogCache};
pub use decision_log::{read_jsonl, DecisionLog, JsonlDecisionLog, MemoryDecisionLog};
pub use detection_engine::DetectionEngine;
pub use fingerprint_builder::FingerprintBuilder;
pub use normalizer::{normalize, normalize_global_id, normalize_metadata, normalize_path};
pub use reconciliation_orchestrator::{ReconciliationOrchestrator, RunOutcome, RunReport, RunStatistics};
pub use transport::{BackoffPolicy, RateLimitedTransport};
