//! Fingerprint construction
//!
//! A fingerprint is `artist|album|title` over normalized fields. The same
//! builder must be used for local tracks and remote records so both sides of
//! every comparison go through identical canonicalization.

use crate::config::ReconcileConfig;
use crate::models::{Fingerprint, NormalizedMetadata, RemoteTrack, Track};
use crate::services::normalizer::normalize_metadata;

/// Builds fingerprints for local tracks and remote catalog records
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FingerprintBuilder {
    /// Compare trimmed raw strings instead of normalized ones
    legacy_exact_match: bool,
}

impl FingerprintBuilder {
    /// Builder using full normalization
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder that bypasses normalization (migration from exact-match tooling)
    pub fn legacy_exact() -> Self {
        Self {
            legacy_exact_match: true,
        }
    }

    pub fn from_config(config: &ReconcileConfig) -> Self {
        Self {
            legacy_exact_match: config.legacy_exact_match,
        }
    }

    pub fn is_legacy(&self) -> bool {
        self.legacy_exact_match
    }

    pub fn build(&self, track: &Track) -> Fingerprint {
        self.build_from_fields(&track.artist, &track.album, &track.title)
    }

    pub fn build_remote(&self, record: &RemoteTrack) -> Fingerprint {
        self.build_from_fields(&record.artist, &record.album, &record.title)
    }

    pub fn build_from_fields(&self, artist: &str, album: &str, title: &str) -> Fingerprint {
        Fingerprint::from(&self.metadata(artist, album, title))
    }

    /// Comparable metadata for the fields, honouring legacy mode
    pub fn metadata(&self, artist: &str, album: &str, title: &str) -> NormalizedMetadata {
        if self.legacy_exact_match {
            NormalizedMetadata {
                artist: artist.trim().to_string(),
                album: album.trim().to_string(),
                title: title.trim().to_string(),
            }
        } else {
            normalize_metadata(artist, album, title)
        }
    }
}
