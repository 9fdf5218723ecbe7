//! Reconciliation run statistics
//!
//! Accumulated by the orchestrator as decision records are produced and
//! rendered as the end-of-run summary.

use crate::models::{ActionOutcome, DecisionAction, DecisionRecord, DetectionStrategy};
use catsync_common::human_time::format_elapsed;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// A track whose remote operation failed after retries
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedTrack {
    pub track_id: String,
    pub reason: String,
}

/// **Run Statistics**
///
/// Display: "N of M tracks processed", then per-strategy and per-action
/// counts, remote calls and failed tracks
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunStatistics {
    /// Tracks supplied to the run
    pub tracks_total: usize,
    /// Tracks with a decision record
    pub tracks_processed: usize,
    pub by_strategy: HashMap<DetectionStrategy, usize>,
    pub by_action: HashMap<DecisionAction, usize>,
    /// Successful uploads
    pub uploaded: usize,
    /// Successful metadata-only updates
    pub updated: usize,
    /// Fingerprint matches chosen among several candidates
    pub ambiguous_matches: usize,
    /// Tracks skipped as duplicates of an earlier track in the same run
    pub in_run_duplicates: usize,
    /// Uploads whose post-upload verification found a problem
    pub verification_warnings: usize,
    pub failed: Vec<FailedTrack>,
    /// Decision records that could not be written to the log
    pub log_write_failures: usize,
    /// Remote call attempts, including retries
    pub remote_calls: u64,
    pub throttled_responses: u64,
    /// Catalog listings fetched during the run
    pub catalog_refreshes: u64,
    pub elapsed: Duration,
}

impl RunStatistics {
    pub fn new(tracks_total: usize) -> Self {
        Self {
            tracks_total,
            ..Default::default()
        }
    }

    /// Account for one decision record
    pub fn record(&mut self, record: &DecisionRecord, ambiguous: bool, duplicate: bool) {
        let decision = &record.decision;
        self.tracks_processed += 1;
        *self.by_strategy.entry(decision.strategy).or_default() += 1;
        *self.by_action.entry(decision.action).or_default() += 1;

        if ambiguous {
            self.ambiguous_matches += 1;
        }
        if duplicate {
            self.in_run_duplicates += 1;
        }

        match &record.outcome {
            ActionOutcome::NotRequired => {}
            ActionOutcome::Applied { verification, .. } => {
                match decision.action {
                    DecisionAction::Upload => self.uploaded += 1,
                    DecisionAction::UpdateMetadataOnly => self.updated += 1,
                    DecisionAction::Skip => {}
                }
                if verification.as_deref().is_some_and(|v| v != super::VERIFIED) {
                    self.verification_warnings += 1;
                }
            }
            ActionOutcome::Failed { error } => self.failed.push(FailedTrack {
                track_id: decision.track_id.clone(),
                reason: error.clone(),
            }),
        }
    }

    pub fn strategy_count(&self, strategy: DetectionStrategy) -> usize {
        self.by_strategy.get(&strategy).copied().unwrap_or(0)
    }

    pub fn action_count(&self, action: DecisionAction) -> usize {
        self.by_action.get(&action).copied().unwrap_or(0)
    }

    /// Tracks never dispatched (cancellation or abort)
    pub fn unprocessed(&self) -> usize {
        self.tracks_total.saturating_sub(self.tracks_processed)
    }

    pub fn display_lines(&self) -> Vec<String> {
        let mut lines = vec![format!(
            "{} of {} tracks processed in {}",
            self.tracks_processed,
            self.tracks_total,
            format_elapsed(self.elapsed)
        )];

        let strategies: Vec<String> = DetectionStrategy::ALL
            .iter()
            .map(|s| format!("{} {}", self.strategy_count(*s), s))
            .collect();
        lines.push(format!("Matched by: {}", strategies.join(", ")));

        let actions: Vec<String> = DecisionAction::ALL
            .iter()
            .map(|a| format!("{} {}", self.action_count(*a), a))
            .collect();
        lines.push(format!("Decisions: {}", actions.join(", ")));

        lines.push(format!(
            "{} uploaded, {} updated, {} failed",
            self.uploaded,
            self.updated,
            self.failed.len()
        ));
        lines.push(format!(
            "{} remote calls ({} throttled), {} catalog refreshes",
            self.remote_calls, self.throttled_responses, self.catalog_refreshes
        ));

        if self.ambiguous_matches > 0 {
            lines.push(format!("{} ambiguous fingerprint matches", self.ambiguous_matches));
        }
        if self.in_run_duplicates > 0 {
            lines.push(format!("{} duplicates within this run skipped", self.in_run_duplicates));
        }
        if self.verification_warnings > 0 {
            lines.push(format!("{} uploads failed verification", self.verification_warnings));
        }
        if self.log_write_failures > 0 {
            lines.push(format!("{} decision records could not be logged", self.log_write_failures));
        }
        if self.unprocessed() > 0 {
            lines.push(format!("{} tracks not processed", self.unprocessed()));
        }

        lines.extend(
            self.failed
                .iter()
                .map(|f| format!("FAILED {}: {}", f.track_id, f.reason)),
        );

        lines
    }
}
