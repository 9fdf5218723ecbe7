//! Session-scoped view of the remote catalog
//!
//! A `CacheSnapshot` is built from the complete listing and is immutable
//! afterwards. `CatalogCache` owns the current snapshot and replaces it
//! wholesale: readers see either the previous snapshot or the new one, never
//! a partially indexed listing.
//!
//! **Refresh Algorithm:**
//! 1. Serialize refreshes (single-flight); a lookup that waited for another
//!    caller's refresh reuses its result
//! 2. Fetch listing pages through the transport until `next_cursor` is `None`
//! 3. Build all indices, then swap the snapshot in
//! 4. Any page failure leaves the prior snapshot untouched

use crate::error::{ReconcileError, ReconcileResult, TransportError};
use crate::models::{CatalogEntry, Fingerprint, RemoteTrack};
use crate::services::catalog_api::CatalogApi;
use crate::services::fingerprint_builder::FingerprintBuilder;
use crate::services::normalizer::{normalize_global_id, normalize_path};
use crate::services::transport::RateLimitedTransport;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;

/// Immutable, fully indexed catalog listing
#[derive(Debug)]
pub struct CacheSnapshot {
    entries: Vec<CatalogEntry>,
    by_global_id: HashMap<String, usize>,
    by_fingerprint: HashMap<Fingerprint, Vec<usize>>,
    by_path: HashMap<String, usize>,
    fetched_at: Instant,
    fetched_at_utc: DateTime<Utc>,
    ttl: Duration,
}

impl CacheSnapshot {
    /// Index a complete listing
    ///
    /// Records without any artist or title are not fingerprint-indexed. When
    /// two records share a global id or path, the first listed one is indexed.
    pub fn build(records: &[RemoteTrack], builder: &FingerprintBuilder, ttl: Duration) -> Self {
        let mut entries = Vec::with_capacity(records.len());
        let mut by_global_id: HashMap<String, usize> = HashMap::new();
        let mut by_fingerprint: HashMap<Fingerprint, Vec<usize>> = HashMap::new();
        let mut by_path: HashMap<String, usize> = HashMap::new();

        for record in records {
            let idx = entries.len();
            let meta = builder.metadata(&record.artist, &record.album, &record.title);
            let fingerprint = Fingerprint::from(&meta);
            let global_id = record.global_id.as_deref().and_then(normalize_global_id);
            let path = record.source_path.as_deref().and_then(normalize_path);

            if let Some(id) = &global_id {
                if let Some(&first) = by_global_id.get(id) {
                    tracing::debug!(
                        global_id = %id,
                        kept = %records[first].id,
                        ignored = %record.id,
                        "Duplicate global id in catalog listing"
                    );
                } else {
                    by_global_id.insert(id.clone(), idx);
                }
            }

            if !(meta.artist.is_empty() && meta.title.is_empty()) {
                by_fingerprint.entry(fingerprint.clone()).or_default().push(idx);
            }

            if let Some(p) = &path {
                by_path.entry(p.clone()).or_insert(idx);
            }

            entries.push(CatalogEntry {
                remote_id: record.id.clone(),
                global_id,
                fingerprint,
                duration: record.duration_whole_seconds(),
                has_loudness: record.has_loudness,
                path,
            });
        }

        Self {
            entries,
            by_global_id,
            by_fingerprint,
            by_path,
            fetched_at: Instant::now(),
            fetched_at_utc: Utc::now(),
            ttl,
        }
    }

    pub fn entries(&self) -> &[CatalogEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Wall-clock time the listing was fetched
    pub fn fetched_at(&self) -> DateTime<Utc> {
        self.fetched_at_utc
    }

    pub fn age(&self) -> Duration {
        self.fetched_at.elapsed()
    }

    pub fn is_expired(&self) -> bool {
        self.age() > self.ttl
    }

    /// Entry with this global id (raw or normalized form)
    pub fn lookup_by_global_id(&self, global_id: &str) -> Option<&CatalogEntry> {
        let key = normalize_global_id(global_id)?;
        self.by_global_id.get(&key).map(|&idx| &self.entries[idx])
    }

    /// All entries sharing this fingerprint, in listing order
    pub fn lookup_by_fingerprint(&self, fingerprint: &Fingerprint) -> Vec<&CatalogEntry> {
        self.by_fingerprint
            .get(fingerprint)
            .map(|indices| indices.iter().map(|&idx| &self.entries[idx]).collect())
            .unwrap_or_default()
    }

    /// Entry uploaded from this source path (separators normalized)
    pub fn lookup_by_path(&self, path: &str) -> Option<&CatalogEntry> {
        let key = normalize_path(path)?;
        self.by_path.get(&key).map(|&idx| &self.entries[idx])
    }
}

/// TTL-bounded holder of the current catalog snapshot
pub struct CatalogCache {
    api: Arc<dyn CatalogApi>,
    transport: RateLimitedTransport,
    builder: FingerprintBuilder,
    ttl: Duration,
    snapshot: RwLock<Option<Arc<CacheSnapshot>>>,
    refresh_lock: Mutex<()>,
    /// Completed refreshes
    generation: AtomicU64,
}

impl CatalogCache {
    pub fn new(
        api: Arc<dyn CatalogApi>,
        transport: RateLimitedTransport,
        builder: FingerprintBuilder,
        ttl: Duration,
    ) -> Self {
        Self {
            api,
            transport,
            builder,
            ttl,
            snapshot: RwLock::new(None),
            refresh_lock: Mutex::new(()),
            generation: AtomicU64::new(0),
        }
    }

    /// Prime the cache with a prebuilt snapshot (e.g. from a catalog dump)
    pub fn seeded(self, snapshot: Arc<CacheSnapshot>) -> Self {
        Self {
            snapshot: RwLock::new(Some(snapshot)),
            ..self
        }
    }

    pub fn builder(&self) -> &FingerprintBuilder {
        &self.builder
    }

    /// Number of listings fetched by this cache
    pub fn refresh_count(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Current snapshot without refreshing
    pub async fn snapshot(&self) -> Option<Arc<CacheSnapshot>> {
        self.snapshot.read().await.clone()
    }

    /// True when there is no snapshot or it has outlived its TTL
    pub async fn is_expired(&self) -> bool {
        self.snapshot
            .read()
            .await
            .as_ref()
            .map_or(true, |snapshot| snapshot.is_expired())
    }

    /// Drop the snapshot; the next lookup fetches the listing again
    pub async fn invalidate(&self) {
        *self.snapshot.write().await = None;
        tracing::debug!("Catalog cache invalidated");
    }

    /// Ensure a valid snapshot exists, fetching the listing only if needed
    pub async fn warm(&self) -> ReconcileResult<Arc<CacheSnapshot>> {
        if let Some(snapshot) = self.fresh_snapshot().await {
            return Ok(snapshot);
        }

        let seen = self.generation.load(Ordering::Acquire);
        let _guard = self.refresh_lock.lock().await;

        // Another caller may have refreshed while we waited
        if self.generation.load(Ordering::Acquire) != seen {
            if let Some(snapshot) = self.fresh_snapshot().await {
                return Ok(snapshot);
            }
        }

        self.fetch_and_swap().await
    }

    /// Snapshot for lookups; refreshes synchronously when missing or expired
    pub async fn current(&self) -> ReconcileResult<Arc<CacheSnapshot>> {
        self.warm().await
    }

    /// Fetch the listing regardless of the current snapshot's age
    ///
    /// Never reuses a listing that started before this call, so the result
    /// reflects every remote write that completed before it.
    pub async fn refresh(&self) -> ReconcileResult<Arc<CacheSnapshot>> {
        let _guard = self.refresh_lock.lock().await;
        self.fetch_and_swap().await
    }

    pub async fn lookup_by_global_id(&self, global_id: &str) -> ReconcileResult<Option<CatalogEntry>> {
        Ok(self.current().await?.lookup_by_global_id(global_id).cloned())
    }

    pub async fn lookup_by_fingerprint(&self, fingerprint: &Fingerprint) -> ReconcileResult<Vec<CatalogEntry>> {
        let snapshot = self.current().await?;
        let entries = snapshot
            .lookup_by_fingerprint(fingerprint)
            .into_iter()
            .cloned()
            .collect();
        Ok(entries)
    }

    pub async fn lookup_by_path(&self, path: &str) -> ReconcileResult<Option<CatalogEntry>> {
        Ok(self.current().await?.lookup_by_path(path).cloned())
    }

    async fn fresh_snapshot(&self) -> Option<Arc<CacheSnapshot>> {
        self.snapshot().await.filter(|snapshot| !snapshot.is_expired())
    }

    /// Caller must hold `refresh_lock`
    async fn fetch_and_swap(&self) -> ReconcileResult<Arc<CacheSnapshot>> {
        let started = Instant::now();
        let (records, pages) = self.fetch_listing().await.map_err(|err| {
            tracing::error!(code = err.code(), error = %err, "Catalog listing failed, keeping previous snapshot");
            ReconcileError::UpstreamUnavailable(err)
        })?;

        let snapshot = Arc::new(CacheSnapshot::build(&records, &self.builder, self.ttl));
        *self.snapshot.write().await = Some(snapshot.clone());
        self.generation.fetch_add(1, Ordering::AcqRel);

        tracing::info!(
            entries = snapshot.len(),
            pages,
            fetched_at = %snapshot.fetched_at().to_rfc3339(),
            ttl_secs = snapshot.ttl().as_secs(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Catalog snapshot refreshed"
        );

        Ok(snapshot)
    }

    async fn fetch_listing(&self) -> Result<(Vec<RemoteTrack>, u32), TransportError> {
        let api: &dyn CatalogApi = self.api.as_ref();
        let mut records = Vec::new();
        let mut cursor: Option<String> = None;
        let mut seen_cursors = HashSet::new();
        let mut pages = 0u32;

        loop {
            let page_cursor = cursor.as_deref();
            let page = self
                .transport
                .execute("list catalog page", move || api.list_catalog_page(page_cursor))
                .await?;
            pages += 1;

            tracing::debug!(page = pages, entries = page.entries.len(), "Fetched catalog page");
            records.extend(page.entries);

            match page.next_cursor {
                Some(next) if !seen_cursors.insert(next.clone()) => {
                    return Err(TransportError::Protocol(format!(
                        "Catalog listing returned cursor {} twice after {} pages",
                        next, pages
                    )));
                }
                Some(next) => cursor = Some(next),
                None => return Ok((records, pages)),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CatalogPage, MetadataPatch, Track};
    use crate::services::transport::BackoffPolicy;
    use async_trait::async_trait;
    use std::collections::VecDeque;

    fn remote(id: &str, artist: &str, title: &str, duration: Option<f64>) -> RemoteTrack {
        RemoteTrack {
            id: id.to_string(),
            title: title.to_string(),
            artist: artist.to_string(),
            album: "Abbey Road".to_string(),
            duration_seconds: duration,
            global_id: None,
            has_loudness: false,
            source_path: None,
        }
    }

    fn page(entries: Vec<RemoteTrack>, next: Option<&str>) -> Result<CatalogPage, TransportError> {
        Ok(CatalogPage {
            entries,
            next_cursor: next.map(str::to_string),
        })
    }

    /// Serves scripted listing responses in order
    struct ScriptedApi {
        responses: std::sync::Mutex<VecDeque<Result<CatalogPage, TransportError>>>,
        calls: AtomicU64,
    }

    impl ScriptedApi {
        fn new(responses: Vec<Result<CatalogPage, TransportError>>) -> Arc<Self> {
            Arc::new(Self {
                responses: std::sync::Mutex::new(responses.into()),
                calls: AtomicU64::new(0),
            })
        }

        fn push(&self, response: Result<CatalogPage, TransportError>) {
            self.responses.lock().unwrap().push_back(response);
        }
    }

    #[async_trait]
    impl CatalogApi for ScriptedApi {
        async fn list_catalog_page(&self, _cursor: Option<&str>) -> Result<CatalogPage, TransportError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(TransportError::Unavailable("script exhausted".to_string())))
        }

        async fn upload(&self, _track: &Track) -> Result<String, TransportError> {
            unreachable!("listing only")
        }

        async fn patch_metadata(&self, _remote_id: &str, _patch: &MetadataPatch) -> Result<(), TransportError> {
            unreachable!("listing only")
        }
    }

    fn cache(api: Arc<ScriptedApi>, ttl: Duration) -> CatalogCache {
        let transport = RateLimitedTransport::new(BackoffPolicy {
            base: Duration::from_millis(10),
            cap: Duration::from_millis(40),
            max_attempts: 3,
        });
        CatalogCache::new(api, transport, FingerprintBuilder::new(), ttl)
    }

    #[tokio::test]
    async fn test_snapshot_indices() {
        let mut with_id = remote("r1", "The Beatles", "Come Together", Some(259.4));
        with_id.global_id = Some("gb-aye-69-00001".to_string());
        with_id.source_path = Some("C:\\Music\\come.flac".to_string());
        let live = remote("r2", "Beatles", "Come Together", None);
        let blank = remote("r3", "", "", Some(10.0));

        let snapshot = CacheSnapshot::build(&[with_id, live, blank], &FingerprintBuilder::new(), Duration::from_secs(60));

        assert_eq!(snapshot.len(), 3);
        assert_eq!(snapshot.lookup_by_global_id("GBAYE6900001").unwrap().remote_id, "r1");
        assert_eq!(snapshot.lookup_by_path("C:/Music/come.flac").unwrap().remote_id, "r1");

        let fp = FingerprintBuilder::new().build_from_fields("beatles", "abbey road", "come together");
        let candidates = snapshot.lookup_by_fingerprint(&fp);
        assert_eq!(candidates.len(), 2);
        assert_eq!(candidates[0].duration, Some(259));
        assert_eq!(candidates[1].duration, None);

        assert!(snapshot.lookup_by_fingerprint(&Fingerprint::from_parts("", "abbey road", "")).is_empty());
    }

    #[tokio::test]
    async fn test_warm_fetches_every_page_once() {
        let api = ScriptedApi::new(vec![
            page(vec![remote("r1", "A", "One", Some(100.0))], Some("c1")),
            page(vec![remote("r2", "B", "Two", Some(200.0))], None),
        ]);
        let cache = cache(api.clone(), Duration::from_secs(300));

        let snapshot = cache.warm().await.unwrap();
        assert_eq!(snapshot.len(), 2);

        let again = cache.warm().await.unwrap();
        assert!(Arc::ptr_eq(&snapshot, &again));
        assert_eq!(api.calls.load(Ordering::SeqCst), 2);
        assert_eq!(cache.refresh_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_listing_keeps_previous_snapshot() {
        let api = ScriptedApi::new(vec![page(vec![remote("r1", "A", "One", Some(100.0))], None)]);
        let cache = cache(api.clone(), Duration::from_secs(300));
        let before = cache.warm().await.unwrap();

        api.push(page(vec![remote("r9", "Z", "New", Some(1.0))], Some("c1")));
        // Second page never succeeds
        for _ in 0..3 {
            api.push(Err(TransportError::Unavailable("connection reset".to_string())));
        }

        let result = cache.refresh().await;
        assert!(matches!(result, Err(ReconcileError::UpstreamUnavailable(TransportError::Unavailable(_)))));

        let after = cache.snapshot().await.unwrap();
        assert!(Arc::ptr_eq(&before, &after));
        assert_eq!(after.entries()[0].remote_id, "r1");
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_snapshot_refreshes_on_lookup() {
        let api = ScriptedApi::new(vec![
            page(vec![remote("r1", "A", "One", Some(100.0))], None),
            page(vec![remote("r2", "A", "One", Some(100.0))], None),
        ]);
        let cache = cache(api.clone(), Duration::from_secs(300));
        let fp = FingerprintBuilder::new().build_from_fields("a", "abbey road", "one");

        assert!(cache.is_expired().await);
        assert_eq!(cache.lookup_by_fingerprint(&fp).await.unwrap()[0].remote_id, "r1");
        assert!(!cache.is_expired().await);

        tokio::time::advance(Duration::from_secs(301)).await;
        assert!(cache.is_expired().await);

        assert_eq!(cache.lookup_by_fingerprint(&fp).await.unwrap()[0].remote_id, "r2");
        assert_eq!(cache.refresh_count(), 2);
    }

    #[tokio::test]
    async fn test_seeded_snapshot_avoids_fetch() {
        let api = ScriptedApi::new(vec![]);
        let seed = Arc::new(CacheSnapshot::build(
            &[remote("r1", "A", "One", Some(100.0))],
            &FingerprintBuilder::new(),
            Duration::from_secs(300),
        ));
        let cache = cache(api.clone(), Duration::from_secs(300)).seeded(seed.clone());

        let snapshot = cache.warm().await.unwrap();
        assert!(Arc::ptr_eq(&seed, &snapshot));
        assert_eq!(api.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_repeated_cursor_is_a_protocol_error() {
        let api = ScriptedApi::new(vec![page(vec![], Some("c1")), page(vec![], Some("c1"))]);
        let cache = cache(api, Duration::from_secs(300));

        let result = cache.warm().await;
        assert!(matches!(result, Err(ReconcileError::UpstreamUnavailable(TransportError::Protocol(_)))));
    }

    #[tokio::test]
    async fn test_cursor_cycle_is_a_protocol_error() {
        let api = ScriptedApi::new(vec![
            page(vec![remote("r1", "A", "One", Some(100.0))], Some("a")),
            page(vec![remote("r2", "B", "Two", Some(200.0))], Some("b")),
            page(vec![remote("r1", "A", "One", Some(100.0))], Some("a")),
            page(vec![remote("r2", "B", "Two", Some(200.0))], Some("b")),
        ]);
        let cache = cache(api.clone(), Duration::from_secs(300));

        let result = cache.warm().await;
        assert!(matches!(result, Err(ReconcileError::UpstreamUnavailable(TransportError::Protocol(_)))));
        assert_eq!(api.calls.load(Ordering::SeqCst), 3);
        assert!(cache.snapshot().await.is_none());
    }

    #[tokio::test]
    async fn test_snapshot_records_fetch_time_and_ttl() {
        let before = Utc::now();
        let snapshot = CacheSnapshot::build(&[], &FingerprintBuilder::new(), Duration::from_secs(42));

        assert_eq!(snapshot.ttl(), Duration::from_secs(42));
        assert!(snapshot.fetched_at() >= before);
        assert!(snapshot.is_empty());
    }

    #[tokio::test]
    async fn test_invalidate_forces_refetch() {
        let api = ScriptedApi::new(vec![page(vec![], None), page(vec![], None)]);
        let cache = cache(api.clone(), Duration::from_secs(300));

        cache.warm().await.unwrap();
        cache.invalidate().await;
        assert!(cache.snapshot().await.is_none());

        cache.warm().await.unwrap();
        assert_eq!(api.calls.load(Ordering::SeqCst), 2);
    }
}
