//! Local track model
//!
//! Tracks are supplied by the local library client and never mutated here.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Loudness analysis attached to a track (ReplayGain-style values)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Loudness {
    /// Gain adjustment in dB
    pub gain_db: f64,
    /// Sample peak (linear, 1.0 = full scale)
    pub peak: f64,
}

/// One locally-known track
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Track {
    /// Local identifier (unique within one run)
    pub id: String,
    pub title: String,
    pub artist: String,
    pub album: String,
    /// Duration in whole seconds
    pub duration: u32,
    /// Catalog-wide recording identifier (ISRC, MBID, ...)
    #[serde(default)]
    pub global_id: Option<String>,
    /// Source audio file
    #[serde(default)]
    pub path: Option<PathBuf>,
    #[serde(default)]
    pub loudness: Option<Loudness>,
}

impl Track {
    pub fn new(
        id: impl Into<String>,
        artist: impl Into<String>,
        album: impl Into<String>,
        title: impl Into<String>,
        duration: u32,
    ) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            artist: artist.into(),
            album: album.into(),
            duration,
            global_id: None,
            path: None,
            loudness: None,
        }
    }

    pub fn with_global_id(mut self, global_id: impl Into<String>) -> Self {
        self.global_id = Some(global_id.into());
        self
    }

    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn with_loudness(mut self, loudness: Loudness) -> Self {
        self.loudness = Some(loudness);
        self
    }
}
