//! Remote catalog models
//!
//! `RemoteTrack` is the record as the catalog API lists it. `CatalogEntry` is
//! the indexed form held by a cache snapshot: keys are precomputed and the
//! value is never mutated after the snapshot is built.

use crate::models::Loudness;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Normalized artist/album/title triple
///
/// Equality and fingerprints are defined over this type; raw metadata strings
/// are never compared directly.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NormalizedMetadata {
    pub artist: String,
    pub album: String,
    pub title: String,
}

/// Composite duplicate-detection key: `artist|album|title`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Join already-normalized fields into a fingerprint
    pub fn from_parts(artist: &str, album: &str, title: &str) -> Self {
        Self(format!("{}|{}|{}", artist, album, title))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&NormalizedMetadata> for Fingerprint {
    fn from(meta: &NormalizedMetadata) -> Self {
        Self::from_parts(&meta.artist, &meta.album, &meta.title)
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One catalog record as returned by the listing endpoint
///
/// Every field except `id` may be missing; absent values never match.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteTrack {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub artist: String,
    #[serde(default)]
    pub album: String,
    #[serde(default)]
    pub duration_seconds: Option<f64>,
    #[serde(default)]
    pub global_id: Option<String>,
    #[serde(default)]
    pub has_loudness: bool,
    #[serde(default)]
    pub source_path: Option<String>,
}

impl RemoteTrack {
    /// Duration rounded to whole seconds; negative or non-finite values are absent
    pub fn duration_whole_seconds(&self) -> Option<u32> {
        self.duration_seconds
            .filter(|d| d.is_finite() && *d >= 0.0)
            .map(|d| d.round().min(u32::MAX as f64) as u32)
    }
}

/// One page of the catalog listing
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CatalogPage {
    pub entries: Vec<RemoteTrack>,
    /// Cursor for the next page; `None` on the last page
    #[serde(default)]
    pub next_cursor: Option<String>,
}

/// Indexed remote entry held by a cache snapshot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogEntry {
    pub remote_id: String,
    /// Normalized global identifier
    pub global_id: Option<String>,
    pub fingerprint: Fingerprint,
    /// Duration in whole seconds
    pub duration: Option<u32>,
    /// Remote side already has computed loudness metadata
    pub has_loudness: bool,
    /// Normalized source path
    pub path: Option<String>,
}

/// Fields sent by a metadata-only update
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetadataPatch {
    pub loudness: Loudness,
}
