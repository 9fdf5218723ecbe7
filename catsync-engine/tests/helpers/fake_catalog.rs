//! In-memory remote catalog
//!
//! Implements `CatalogApi` over a `Vec<RemoteTrack>` with cursor paging.
//! Failures and delays are scripted per test.

#![allow(dead_code)]

use async_trait::async_trait;
use catsync_engine::error::TransportError;
use catsync_engine::models::{CatalogPage, MetadataPatch, RemoteTrack, Track};
use catsync_engine::services::{BackoffPolicy, CatalogApi, RateLimitedTransport};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Transport with millisecond back-off so retrying tests stay fast
pub fn fast_transport() -> RateLimitedTransport {
    RateLimitedTransport::new(BackoffPolicy {
        base: Duration::from_millis(5),
        cap: Duration::from_millis(20),
        max_attempts: 3,
    })
}

pub fn remote_track(id: &str, artist: &str, album: &str, title: &str, duration: f64) -> RemoteTrack {
    RemoteTrack {
        id: id.to_string(),
        title: title.to_string(),
        artist: artist.to_string(),
        album: album.to_string(),
        duration_seconds: Some(duration),
        global_id: None,
        has_loudness: false,
        source_path: None,
    }
}

#[derive(Default)]
struct FakeState {
    entries: Vec<RemoteTrack>,
    next_id: u64,
    list_calls: usize,
    /// Errors returned by the next listing calls, in order
    listing_errors: VecDeque<TransportError>,
    /// Listing calls allowed before every further one fails
    listing_budget: Option<usize>,
    /// Permanent upload failures by local track id
    upload_errors: HashMap<String, TransportError>,
    uploads: Vec<String>,
    patches: Vec<(String, MetadataPatch)>,
    upload_delay: Option<Duration>,
    /// Cancel this token once the given number of uploads has completed
    cancel_after_uploads: Option<(usize, CancellationToken)>,
    /// Catalog entries created per accepted upload (default 1)
    listed_copies: Option<usize>,
    /// Last page points back to the first instead of ending the listing
    cycle_cursors: bool,
}

pub struct FakeCatalog {
    state: Mutex<FakeState>,
    page_size: usize,
}

impl FakeCatalog {
    pub fn new(entries: Vec<RemoteTrack>) -> Arc<Self> {
        Self::with_page_size(entries, 2)
    }

    pub fn with_page_size(entries: Vec<RemoteTrack>, page_size: usize) -> Arc<Self> {
        let next_id = entries.len() as u64 + 1;
        Arc::new(Self {
            state: Mutex::new(FakeState {
                entries,
                next_id,
                ..Default::default()
            }),
            page_size,
        })
    }

    pub fn fail_next_listing(&self, err: TransportError) {
        self.state.lock().unwrap().listing_errors.push_back(err);
    }

    pub fn limit_listings(&self, allowed: usize) {
        self.state.lock().unwrap().listing_budget = Some(allowed);
    }

    pub fn fail_uploads_for(&self, track_id: &str, err: TransportError) {
        self.state
            .lock()
            .unwrap()
            .upload_errors
            .insert(track_id.to_string(), err);
    }

    pub fn delay_uploads(&self, delay: Duration) {
        self.state.lock().unwrap().upload_delay = Some(delay);
    }

    /// Each accepted upload shows up `copies` times in later listings (0 hides it)
    pub fn list_uploads_as(&self, copies: usize) {
        self.state.lock().unwrap().listed_copies = Some(copies);
    }

    pub fn cycle_cursors(&self) {
        self.state.lock().unwrap().cycle_cursors = true;
    }

    pub fn cancel_after_uploads(&self, uploads: usize, token: CancellationToken) {
        self.state.lock().unwrap().cancel_after_uploads = Some((uploads, token));
    }

    /// Local track ids uploaded so far
    pub fn uploads(&self) -> Vec<String> {
        self.state.lock().unwrap().uploads.clone()
    }

    pub fn patches(&self) -> Vec<(String, MetadataPatch)> {
        self.state.lock().unwrap().patches.clone()
    }

    pub fn list_calls(&self) -> usize {
        self.state.lock().unwrap().list_calls
    }

    pub fn entries(&self) -> Vec<RemoteTrack> {
        self.state.lock().unwrap().entries.clone()
    }
}

#[async_trait]
impl CatalogApi for FakeCatalog {
    async fn list_catalog_page(&self, cursor: Option<&str>) -> Result<CatalogPage, TransportError> {
        let mut state = self.state.lock().unwrap();
        state.list_calls += 1;

        if let Some(err) = state.listing_errors.pop_front() {
            return Err(err);
        }
        if let Some(budget) = state.listing_budget {
            if state.list_calls > budget {
                return Err(TransportError::Unavailable("catalog offline".to_string()));
            }
        }

        let offset: usize = match cursor {
            Some(c) => c
                .parse()
                .map_err(|_| TransportError::Rejected(format!("bad cursor {}", c)))?,
            None => 0,
        };
        let end = (offset + self.page_size).min(state.entries.len());
        let entries = state.entries.get(offset..end).unwrap_or_default().to_vec();
        let next_cursor = if end < state.entries.len() {
            Some(end.to_string())
        } else if state.cycle_cursors {
            Some("0".to_string())
        } else {
            None
        };

        Ok(CatalogPage { entries, next_cursor })
    }

    async fn upload(&self, track: &Track) -> Result<String, TransportError> {
        let delay = self.state.lock().unwrap().upload_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state.lock().unwrap();
        if let Some(err) = state.upload_errors.get(&track.id) {
            return Err(err.clone());
        }

        let remote_id = format!("remote-{}", state.next_id);
        for copy in 0..state.listed_copies.unwrap_or(1) {
            let id = format!("remote-{}", state.next_id + copy as u64);
            state.entries.push(RemoteTrack {
                id,
                title: track.title.clone(),
                artist: track.artist.clone(),
                album: track.album.clone(),
                duration_seconds: Some(track.duration as f64),
                global_id: track.global_id.clone(),
                has_loudness: track.loudness.is_some(),
                source_path: track.path.as_ref().map(|p| p.to_string_lossy().into_owned()),
            });
        }
        state.next_id += state.listed_copies.unwrap_or(1).max(1) as u64;
        state.uploads.push(track.id.clone());

        let uploaded = state.uploads.len();
        if let Some((after, token)) = &state.cancel_after_uploads {
            if uploaded >= *after {
                token.cancel();
            }
        }

        Ok(remote_id)
    }

    async fn patch_metadata(&self, remote_id: &str, patch: &MetadataPatch) -> Result<(), TransportError> {
        let mut state = self.state.lock().unwrap();
        let entry = state
            .entries
            .iter_mut()
            .find(|e| e.id == remote_id)
            .ok_or_else(|| TransportError::Rejected(format!("no remote entry {}", remote_id)))?;
        entry.has_loudness = true;
        state.patches.push((remote_id.to_string(), patch.clone()));
        Ok(())
    }
}
