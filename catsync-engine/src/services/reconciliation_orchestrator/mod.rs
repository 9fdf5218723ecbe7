//! Reconciliation orchestrator
//!
//! Drives one reconciliation run: local tracks in, decision records out.
//!
//! **Run Algorithm:**
//! 1. Warm the catalog cache (forced when `force_refresh`); failure aborts the run
//! 2. Classify tracks in input order against the current snapshot, refreshing
//!    it when expired; a later upload of a recording already claimed in this
//!    run waits for the earlier upload and becomes a skip if it succeeded
//! 3. Execute decisions on a bounded pool (`classify_concurrency` tracks in
//!    flight, `action_concurrency` remote writes at once)
//! 4. Append one decision record per track and accumulate statistics
//!
//! Per-track failures are recorded and the run continues. Cancellation stops
//! dispatching new tracks; in-flight tracks complete and are logged. A
//! `RunReport` is returned in every case.

pub mod statistics;

pub use statistics::{FailedTrack, RunStatistics};

use crate::config::ReconcileConfig;
use crate::error::ReconcileError;
use crate::models::{
    ActionOutcome, DecisionAction, DecisionRecord, DetectionStrategy, Fingerprint, MetadataPatch, Track,
    UploadDecision,
};
use crate::services::catalog_api::CatalogApi;
use crate::services::catalog_cache::{CacheSnapshot, CatalogCache};
use crate::services::decision_log::DecisionLog;
use crate::services::detection_engine::{DetectionEngine, AMBIGUOUS_MATCH};
use crate::services::normalizer::normalize_global_id;
use crate::services::transport::RateLimitedTransport;
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard, Semaphore};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Verification note for an upload confirmed by the refreshed catalog
pub const VERIFIED: &str = "verified";

/// How a run ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum RunOutcome {
    /// Every track has a decision record
    Completed,
    /// Stopped early by the caller
    Cancelled,
    /// The catalog became unavailable; no further tracks were dispatched
    Aborted(String),
}

impl fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunOutcome::Completed => f.write_str("completed"),
            RunOutcome::Cancelled => f.write_str("cancelled"),
            RunOutcome::Aborted(reason) => write!(f, "aborted: {}", reason),
        }
    }
}

/// Summary returned by every run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub outcome: RunOutcome,
    pub statistics: RunStatistics,
}

impl RunReport {
    pub fn is_aborted(&self) -> bool {
        matches!(self.outcome, RunOutcome::Aborted(_))
    }

    pub fn display_lines(&self) -> Vec<String> {
        let mut lines = vec![format!("Run {} {}", self.run_id, self.outcome)];
        lines.extend(self.statistics.display_lines());
        lines
    }
}

/// Track that first uploaded a recording in this run
#[derive(Debug, Clone, PartialEq, Eq)]
struct InRunUpload {
    track_id: String,
    remote_id: String,
}

/// Shared upload result for one recording
///
/// The track holding the lock owns the upload. Later tracks with the same
/// recording queue on the lock and skip only once an upload has succeeded.
type RecordingSlot = Arc<Mutex<Option<InRunUpload>>>;

/// Claim on a recording, decided at classification time
enum Claim {
    /// Not an upload, or nothing to key the recording on
    Unclaimed,
    /// First track of the recording in this run
    Holder(OwnedMutexGuard<Option<InRunUpload>>),
    /// An earlier track holds the recording
    Waiter {
        strategy: DetectionStrategy,
        slot: RecordingSlot,
    },
}

/// Recordings already scheduled for upload in this run
#[derive(Default)]
struct InRunGuard {
    by_global_id: HashMap<String, RecordingSlot>,
    by_fingerprint: HashMap<Fingerprint, Vec<(u32, RecordingSlot)>>,
}

impl InRunGuard {
    /// Claim the track's recording, or join the queue behind the earlier track that holds it
    fn claim(&mut self, track: &Track, engine: &DetectionEngine) -> Claim {
        let global_id = track.global_id.as_deref().and_then(normalize_global_id);
        if let Some(slot) = global_id.as_ref().and_then(|id| self.by_global_id.get(id)) {
            return Claim::Waiter {
                strategy: DetectionStrategy::GlobalId,
                slot: slot.clone(),
            };
        }

        let meta = engine.builder().metadata(&track.artist, &track.album, &track.title);
        let indexable = !(meta.artist.is_empty() && meta.title.is_empty());
        let fingerprint = Fingerprint::from(&meta);

        if indexable {
            let earlier = self.by_fingerprint.get(&fingerprint).and_then(|claims| {
                claims
                    .iter()
                    .find(|(duration, _)| duration.abs_diff(track.duration) <= engine.tolerance_secs())
            });
            if let Some((_, slot)) = earlier {
                return Claim::Waiter {
                    strategy: DetectionStrategy::Fingerprint,
                    slot: slot.clone(),
                };
            }
        }

        if global_id.is_none() && !indexable {
            return Claim::Unclaimed;
        }

        let slot: RecordingSlot = Arc::new(Mutex::new(None));
        let Ok(held) = slot.clone().try_lock_owned() else {
            return Claim::Unclaimed;
        };
        if let Some(id) = global_id {
            self.by_global_id.insert(id, slot.clone());
        }
        if indexable {
            self.by_fingerprint
                .entry(fingerprint)
                .or_default()
                .push((track.duration, slot));
        }
        Claim::Holder(held)
    }
}

/// Output of the classification stage
enum TrackStep {
    Dispatch {
        track: Track,
        decision: UploadDecision,
        ambiguous: bool,
        claim: Claim,
    },
    /// Catalog refresh failed; the track was not classified
    Halted,
}

struct TrackResult {
    record: DecisionRecord,
    ambiguous: bool,
    duplicate: bool,
    logged: bool,
}

/// Counter values at run start
struct Baseline {
    started: Instant,
    remote_calls: u64,
    throttled_responses: u64,
    catalog_refreshes: u64,
}

pub struct ReconciliationOrchestrator {
    api: Arc<dyn CatalogApi>,
    transport: RateLimitedTransport,
    cache: CatalogCache,
    engine: DetectionEngine,
    config: ReconcileConfig,
}

impl ReconciliationOrchestrator {
    pub fn new(api: Arc<dyn CatalogApi>, transport: RateLimitedTransport, config: ReconcileConfig) -> Self {
        let engine = DetectionEngine::from_config(&config);
        let cache = CatalogCache::new(api.clone(), transport.clone(), *engine.builder(), config.cache_ttl());

        Self {
            api,
            transport,
            cache,
            engine,
            config,
        }
    }

    /// Start from a prebuilt catalog snapshot instead of fetching one
    ///
    /// Ignored when `force_refresh` is set.
    pub fn with_snapshot(mut self, snapshot: Arc<CacheSnapshot>) -> Self {
        self.cache = self.cache.seeded(snapshot);
        self
    }

    pub fn cache(&self) -> &CatalogCache {
        &self.cache
    }

    pub fn engine(&self) -> &DetectionEngine {
        &self.engine
    }

    /// Reconcile `tracks` against the remote catalog
    ///
    /// # Arguments
    /// * `tracks` - Local tracks, processed in order
    /// * `log` - Sink receiving one record per processed track
    /// * `cancel` - Stops dispatch of further tracks when cancelled
    pub async fn run(&self, tracks: Vec<Track>, log: &dyn DecisionLog, cancel: CancellationToken) -> RunReport {
        let run_id = Uuid::new_v4();
        let baseline = self.baseline();
        let mut stats = RunStatistics::new(tracks.len());

        tracing::info!(
            run_id = %run_id,
            tracks = tracks.len(),
            force_refresh = self.config.force_refresh,
            legacy_exact_match = self.config.legacy_exact_match,
            "Reconciliation run started"
        );

        if cancel.is_cancelled() {
            return self.finish(run_id, RunOutcome::Cancelled, stats, baseline);
        }

        let warmed = if self.config.force_refresh {
            self.cache.refresh().await
        } else {
            self.cache.warm().await
        };
        if let Err(err) = warmed {
            tracing::error!(run_id = %run_id, error = %err, "Cannot reconcile without the remote catalog");
            return self.finish(run_id, RunOutcome::Aborted(err.to_string()), stats, baseline);
        }

        let stop = cancel.child_token();
        let abort_reason: Mutex<Option<String>> = Mutex::new(None);
        let guard = Mutex::new(InRunGuard::default());
        let permits = Semaphore::new(self.config.action_concurrency.max(1));

        {
            let (stop_ref, abort_ref, guard_ref, permits_ref) = (&stop, &abort_reason, &guard, &permits);

            let results = stream::iter(tracks)
                .take_until(stop.cancelled())
                .then(move |track| self.classify_step(track, guard_ref, stop_ref, abort_ref))
                .map(move |step| self.execute_step(run_id, step, permits_ref, log))
                .buffered(self.config.classify_concurrency.max(1));
            futures::pin_mut!(results);

            while let Some(result) = results.next().await {
                let Some(result) = result else { continue };
                stats.record(&result.record, result.ambiguous, result.duplicate);
                if !result.logged {
                    stats.log_write_failures += 1;
                }
            }
        }

        let outcome = match abort_reason.lock().await.take() {
            Some(reason) => RunOutcome::Aborted(reason),
            None if cancel.is_cancelled() && stats.unprocessed() > 0 => RunOutcome::Cancelled,
            None => RunOutcome::Completed,
        };

        self.finish(run_id, outcome, stats, baseline)
    }

    async fn classify_step(
        &self,
        track: Track,
        guard: &Mutex<InRunGuard>,
        stop: &CancellationToken,
        abort_reason: &Mutex<Option<String>>,
    ) -> TrackStep {
        let snapshot = match self.cache.current().await {
            Ok(snapshot) => snapshot,
            Err(err) => {
                tracing::error!(
                    track_id = %track.id,
                    error = %err,
                    "Catalog refresh failed mid-run, stopping dispatch"
                );
                *abort_reason.lock().await = Some(err.to_string());
                stop.cancel();
                return TrackStep::Halted;
            }
        };

        let decision = self.engine.classify(&track, &snapshot);
        let ambiguous = decision.reason.starts_with(AMBIGUOUS_MATCH);

        let claim = if decision.action == DecisionAction::Upload {
            guard.lock().await.claim(&track, &self.engine)
        } else {
            Claim::Unclaimed
        };

        TrackStep::Dispatch {
            track,
            decision,
            ambiguous,
            claim,
        }
    }

    async fn execute_step(
        &self,
        run_id: Uuid,
        step: TrackStep,
        permits: &Semaphore,
        log: &dyn DecisionLog,
    ) -> Option<TrackResult> {
        let TrackStep::Dispatch {
            track,
            decision,
            ambiguous,
            claim,
        } = step
        else {
            return None;
        };

        let mut held = match claim {
            Claim::Unclaimed => None,
            Claim::Holder(held) => Some(held),
            Claim::Waiter { strategy, slot } => {
                let held = slot.lock_owned().await;
                let earlier = (*held).clone();
                match earlier {
                    Some(upload) => {
                        let record = self.in_run_duplicate(run_id, &track, strategy, upload);
                        return Some(self.append(log, record, ambiguous, true).await);
                    }
                    None => {
                        tracing::info!(track_id = %track.id, "Earlier upload of this recording failed, uploading");
                        Some(held)
                    }
                }
            }
        };

        let outcome = self.apply(&track, &decision, permits).await;
        if let (Some(held), ActionOutcome::Applied { remote_id, .. }) = (held.as_mut(), &outcome) {
            **held = Some(InRunUpload {
                track_id: track.id.clone(),
                remote_id: remote_id.clone(),
            });
        }
        drop(held);

        let record = DecisionRecord::new(run_id, decision, outcome);
        Some(self.append(log, record, ambiguous, false).await)
    }

    /// Skip record for a track whose recording an earlier track already uploaded
    fn in_run_duplicate(
        &self,
        run_id: Uuid,
        track: &Track,
        strategy: DetectionStrategy,
        upload: InRunUpload,
    ) -> DecisionRecord {
        tracing::info!(
            track_id = %track.id,
            first = %upload.track_id,
            remote_id = %upload.remote_id,
            "Duplicate of an earlier track in this run"
        );
        let decision = UploadDecision {
            track_id: track.id.clone(),
            strategy,
            action: DecisionAction::Skip,
            reason: format!("duplicate of local track {} in this run", upload.track_id),
            matched_remote_id: Some(upload.remote_id),
        };
        DecisionRecord::new(run_id, decision, ActionOutcome::NotRequired)
    }

    async fn append(
        &self,
        log: &dyn DecisionLog,
        record: DecisionRecord,
        ambiguous: bool,
        duplicate: bool,
    ) -> TrackResult {
        let logged = match log.append(&record).await {
            Ok(()) => true,
            Err(err) => {
                tracing::warn!(track_id = %record.decision.track_id, error = %err, "Failed to write decision record");
                false
            }
        };

        TrackResult {
            record,
            ambiguous,
            duplicate,
            logged,
        }
    }

    async fn apply(&self, track: &Track, decision: &UploadDecision, permits: &Semaphore) -> ActionOutcome {
        let api: &dyn CatalogApi = self.api.as_ref();

        match decision.action {
            DecisionAction::Skip => ActionOutcome::NotRequired,

            DecisionAction::UpdateMetadataOnly => {
                let (Some(remote_id), Some(loudness)) = (decision.matched_remote_id.as_deref(), track.loudness) else {
                    return ActionOutcome::Failed {
                        error: "metadata update needs a remote entry and local loudness".to_string(),
                    };
                };
                let Ok(_permit) = permits.acquire().await else {
                    return ActionOutcome::Failed {
                        error: "action pool closed".to_string(),
                    };
                };

                let patch = MetadataPatch { loudness };
                let patch_ref = &patch;
                let result = self
                    .transport
                    .execute("patch metadata", move || api.patch_metadata(remote_id, patch_ref))
                    .await;

                match result {
                    Ok(()) => {
                        tracing::info!(track_id = %track.id, remote_id, "Loudness metadata added to remote entry");
                        ActionOutcome::Applied {
                            remote_id: remote_id.to_string(),
                            verification: None,
                        }
                    }
                    Err(source) => track_failed(track, source),
                }
            }

            DecisionAction::Upload => {
                let Ok(permit) = permits.acquire().await else {
                    return ActionOutcome::Failed {
                        error: "action pool closed".to_string(),
                    };
                };
                let result = self.transport.execute("upload", move || api.upload(track)).await;
                drop(permit);

                match result {
                    Ok(remote_id) => {
                        tracing::info!(track_id = %track.id, remote_id = %remote_id, "Track uploaded");
                        let verification = if self.config.verify_uploads {
                            Some(self.verify_upload(track, &remote_id).await)
                        } else {
                            None
                        };
                        ActionOutcome::Applied {
                            remote_id,
                            verification,
                        }
                    }
                    Err(source) => track_failed(track, source),
                }
            }
        }
    }

    /// Refresh the catalog and confirm exactly one entry now matches the upload
    async fn verify_upload(&self, track: &Track, remote_id: &str) -> String {
        let snapshot = match self.cache.refresh().await {
            Ok(snapshot) => snapshot,
            Err(err) => {
                tracing::warn!(track_id = %track.id, error = %err, "Upload verification skipped");
                return format!("verification skipped: {}", err);
            }
        };

        let fingerprint = self.engine.builder().build(track);
        let tolerance = self.engine.tolerance_secs();
        let matching: Vec<&str> = snapshot
            .lookup_by_fingerprint(&fingerprint)
            .into_iter()
            .filter(|e| e.duration.is_some_and(|d| d.abs_diff(track.duration) <= tolerance))
            .map(|e| e.remote_id.as_str())
            .collect();

        let note = match matching.as_slice() {
            [only] if *only == remote_id => return VERIFIED.to_string(),
            [] => format!("uploaded entry {} not found in refreshed catalog", remote_id),
            [other] => format!("refreshed catalog lists {} instead of {}", other, remote_id),
            many => format!("{} remote entries match after upload: {}", many.len(), many.join(", ")),
        };

        tracing::warn!(track_id = %track.id, remote_id, note = %note, "Upload verification found a problem");
        note
    }

    fn baseline(&self) -> Baseline {
        Baseline {
            started: Instant::now(),
            remote_calls: self.transport.remote_calls(),
            throttled_responses: self.transport.throttled_responses(),
            catalog_refreshes: self.cache.refresh_count(),
        }
    }

    fn finish(&self, run_id: Uuid, outcome: RunOutcome, mut stats: RunStatistics, baseline: Baseline) -> RunReport {
        stats.elapsed = baseline.started.elapsed();
        stats.remote_calls = self.transport.remote_calls().saturating_sub(baseline.remote_calls);
        stats.throttled_responses = self
            .transport
            .throttled_responses()
            .saturating_sub(baseline.throttled_responses);
        stats.catalog_refreshes = self.cache.refresh_count().saturating_sub(baseline.catalog_refreshes);

        tracing::info!(
            run_id = %run_id,
            outcome = %outcome,
            processed = stats.tracks_processed,
            uploaded = stats.uploaded,
            updated = stats.updated,
            failed = stats.failed.len(),
            remote_calls = stats.remote_calls,
            "Reconciliation run finished"
        );

        RunReport {
            run_id,
            outcome,
            statistics: stats,
        }
    }
}

fn track_failed(track: &Track, source: crate::error::TransportError) -> ActionOutcome {
    let error = source.to_string();
    let err = ReconcileError::TrackOperationFailed {
        track_id: track.id.clone(),
        source,
    };
    tracing::warn!(error = %err, "Track skipped after remote failure");
    ActionOutcome::Failed { error }
}
