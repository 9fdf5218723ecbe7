//! Upload decisions and the records written to the decision log

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Which detection step produced a decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionStrategy {
    /// Matched by global recording identifier
    GlobalId,
    /// Matched by normalized fingerprint plus duration gate
    Fingerprint,
    /// Matched by source file path
    Path,
    /// No remote counterpart found
    None,
}

impl DetectionStrategy {
    pub const ALL: [DetectionStrategy; 4] = [
        DetectionStrategy::GlobalId,
        DetectionStrategy::Fingerprint,
        DetectionStrategy::Path,
        DetectionStrategy::None,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DetectionStrategy::GlobalId => "global_id",
            DetectionStrategy::Fingerprint => "fingerprint",
            DetectionStrategy::Path => "path",
            DetectionStrategy::None => "none",
        }
    }
}

impl fmt::Display for DetectionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the orchestrator must do with a track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionAction {
    /// Remote entry exists and needs nothing
    Skip,
    /// Remote entry exists but lacks loudness metadata the local track has
    UpdateMetadataOnly,
    /// No remote entry; upload as new
    Upload,
}

impl DecisionAction {
    pub const ALL: [DecisionAction; 3] = [
        DecisionAction::Skip,
        DecisionAction::UpdateMetadataOnly,
        DecisionAction::Upload,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DecisionAction::Skip => "skip",
            DecisionAction::UpdateMetadataOnly => "update_metadata_only",
            DecisionAction::Upload => "upload",
        }
    }
}

impl fmt::Display for DecisionAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classification result for one track
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadDecision {
    pub track_id: String,
    pub strategy: DetectionStrategy,
    pub action: DecisionAction,
    /// Human-readable explanation (records ambiguity and rejected candidates)
    pub reason: String,
    pub matched_remote_id: Option<String>,
}

impl UploadDecision {
    pub fn matched(
        track_id: impl Into<String>,
        strategy: DetectionStrategy,
        action: DecisionAction,
        remote_id: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            track_id: track_id.into(),
            strategy,
            action,
            reason: reason.into(),
            matched_remote_id: Some(remote_id.into()),
        }
    }

    pub fn upload(track_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            track_id: track_id.into(),
            strategy: DetectionStrategy::None,
            action: DecisionAction::Upload,
            reason: reason.into(),
            matched_remote_id: None,
        }
    }
}

/// What the orchestrator did with a decision
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ActionOutcome {
    /// Skip: no remote call was needed
    NotRequired,
    /// Upload or metadata patch succeeded
    Applied {
        remote_id: String,
        /// Post-upload verification note, when verification ran
        #[serde(default, skip_serializing_if = "Option::is_none")]
        verification: Option<String>,
    },
    /// Remote call failed after retries; the track was skipped
    Failed { error: String },
}

/// One line of the decision log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionRecord {
    pub run_id: Uuid,
    pub recorded_at: DateTime<Utc>,
    pub decision: UploadDecision,
    pub outcome: ActionOutcome,
}

impl DecisionRecord {
    pub fn new(run_id: Uuid, decision: UploadDecision, outcome: ActionOutcome) -> Self {
        Self {
            run_id,
            recorded_at: Utc::now(),
            decision,
            outcome,
        }
    }
}
