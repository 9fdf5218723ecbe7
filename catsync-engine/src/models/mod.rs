//! Data models for catsync-engine
//!
//! - Local tracks (input, externally owned)
//! - Remote catalog records and indexed entries
//! - Upload decisions and decision log records

pub mod catalog;
pub mod decision;
pub mod track;

pub use catalog::{CatalogEntry, CatalogPage, Fingerprint, MetadataPatch, NormalizedMetadata, RemoteTrack};
pub use decision::{ActionOutcome, DecisionAction, DecisionRecord, DetectionStrategy, UploadDecision};
pub use track::{Loudness, Track};
