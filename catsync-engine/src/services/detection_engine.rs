//! Duplicate detection
//!
//! Classifies one local track against a catalog snapshot. Pure: the snapshot
//! is passed in explicitly and nothing is mutated.
//!
//! **Strategy order** (first match wins):
//! 1. Global id
//! 2. Fingerprint, gated on duration (closest candidate wins)
//! 3. Source path
//! 4. No match → upload
//!
//! A matched entry is updated only to add loudness the remote side lacks;
//! existing remote loudness is never overwritten.

use crate::config::ReconcileConfig;
use crate::models::{CatalogEntry, DecisionAction, DetectionStrategy, Track, UploadDecision};
use crate::services::catalog_cache::CacheSnapshot;
use crate::services::fingerprint_builder::FingerprintBuilder;

/// Default maximum duration difference for a fingerprint match (seconds)
pub const DEFAULT_DURATION_TOLERANCE_SECS: u32 = 5;

/// Reason prefix for a fingerprint match chosen among several candidates
pub const AMBIGUOUS_MATCH: &str = "ambiguous fingerprint match";

#[derive(Debug, Clone, Copy)]
pub struct DetectionEngine {
    builder: FingerprintBuilder,
    tolerance_secs: u32,
}

impl Default for DetectionEngine {
    fn default() -> Self {
        Self::new(FingerprintBuilder::new(), DEFAULT_DURATION_TOLERANCE_SECS)
    }
}

impl DetectionEngine {
    pub fn new(builder: FingerprintBuilder, tolerance_secs: u32) -> Self {
        Self {
            builder,
            tolerance_secs,
        }
    }

    pub fn from_config(config: &ReconcileConfig) -> Self {
        Self::new(FingerprintBuilder::from_config(config), config.duration_tolerance_secs)
    }

    pub fn builder(&self) -> &FingerprintBuilder {
        &self.builder
    }

    pub fn tolerance_secs(&self) -> u32 {
        self.tolerance_secs
    }

    /// Decide what to do with `track` given the current catalog view
    pub fn classify(&self, track: &Track, snapshot: &CacheSnapshot) -> UploadDecision {
        let decision = self.classify_inner(track, snapshot);
        tracing::debug!(
            track_id = %track.id,
            strategy = %decision.strategy,
            action = %decision.action,
            remote_id = ?decision.matched_remote_id,
            "Track classified"
        );
        decision
    }

    fn classify_inner(&self, track: &Track, snapshot: &CacheSnapshot) -> UploadDecision {
        if let Some(global_id) = track.global_id.as_deref() {
            if let Some(entry) = snapshot.lookup_by_global_id(global_id) {
                return matched(
                    track,
                    DetectionStrategy::GlobalId,
                    entry,
                    format!("global id {} matches remote {}", global_id.trim(), entry.remote_id),
                );
            }
        }

        let fingerprint = self.builder.build(track);
        let candidates = snapshot.lookup_by_fingerprint(&fingerprint);

        let (mut passing, rejected): (Vec<(u32, &CatalogEntry)>, Vec<&CatalogEntry>) =
            candidates.into_iter().fold((Vec::new(), Vec::new()), |(mut pass, mut fail), entry| {
                match entry.duration.map(|d| d.abs_diff(track.duration)) {
                    Some(delta) if delta <= self.tolerance_secs => pass.push((delta, entry)),
                    _ => fail.push(entry),
                }
                (pass, fail)
            });

        passing.sort_by(|(da, a), (db, b)| da.cmp(db).then_with(|| a.remote_id.cmp(&b.remote_id)));

        if let Some(&(delta, best)) = passing.first() {
            let reason = if passing.len() == 1 {
                format!("fingerprint matches remote {} (duration off by {}s)", best.remote_id, delta)
            } else {
                let ids: Vec<&str> = passing.iter().map(|(_, e)| e.remote_id.as_str()).collect();
                format!(
                    "{}: {} candidates within {}s ({}); chose closest {} (duration off by {}s)",
                    AMBIGUOUS_MATCH,
                    passing.len(),
                    self.tolerance_secs,
                    ids.join(", "),
                    best.remote_id,
                    delta
                )
            };
            return matched(track, DetectionStrategy::Fingerprint, best, reason);
        }

        if let Some(path) = track.path.as_deref() {
            if let Some(entry) = snapshot.lookup_by_path(&path.to_string_lossy()) {
                return matched(
                    track,
                    DetectionStrategy::Path,
                    entry,
                    format!("source path matches remote {}", entry.remote_id),
                );
            }
        }

        let reason = if rejected.is_empty() {
            "no remote entry matches".to_string()
        } else {
            let described: Vec<String> = rejected
                .iter()
                .map(|e| match e.duration {
                    Some(d) => format!("{} ({}s)", e.remote_id, d),
                    None => format!("{} (no duration)", e.remote_id),
                })
                .collect();
            format!(
                "no remote entry matches; fingerprint candidates rejected by {}s duration gate for local {}s: {}",
                self.tolerance_secs,
                track.duration,
                described.join(", ")
            )
        };

        UploadDecision::upload(&track.id, reason)
    }
}

fn matched(track: &Track, strategy: DetectionStrategy, entry: &CatalogEntry, reason: String) -> UploadDecision {
    let needs_loudness = track.loudness.is_some() && !entry.has_loudness;
    let (action, reason) = if needs_loudness {
        (DecisionAction::UpdateMetadataOnly, format!("{}; remote lacks loudness", reason))
    } else {
        (DecisionAction::Skip, reason)
    };

    UploadDecision::matched(&track.id, strategy, action, &entry.remote_id, reason)
}
