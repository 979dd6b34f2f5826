//! In-memory mirror of one identity's Snapshot Store.
//!
//! All upstream calls happen before the state lock is taken; the lock only
//! guards the synchronous read-modify-write of the movie list and busy flags.
//! Disk writes are serialized by a separate async lock and always persist the
//! latest in-memory state, so the files trail memory but converge to it.

use crate::cache::delta::Delta;
use crate::cache::identity::Identity;
use crate::cache::model::{FilterOptions, FilterQuery, MovieRecord, WatchStatus};
use crate::cache::progress::{BuildEvent, ProgressChannel};
use crate::cache::store::{SnapshotKind, SnapshotStore, StoreError};
use crate::cache::verify::{self, Verdict};
use crate::provider::{LibraryProvider, ProviderError, WatchScope};
use crate::utils::fmt_duration;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use indexmap::IndexMap;
use parking_lot::Mutex;
use rand::seq::IndexedRandom;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;
use tokio::sync::{MutexGuard, broadcast};
use tracing::{debug, error, info, warn};

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("upstream unavailable: {0}")]
    Upstream(#[from] ProviderError),
    #[error("snapshot persistence failed: {0}")]
    Store(#[from] StoreError),
}

/// How the all-movies rebuild is run after a full unwatched build.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CatalogMode {
    /// Spawn the catalog build and return immediately.
    Detached,
    /// Run the catalog build before returning.
    Blocking,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildOutcome {
    /// `catalog_synced` is set when the all-movies snapshot was rebuilt
    /// before returning.
    Built { movies: usize, catalog_synced: bool },
    AlreadyRunning,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// Another build or reconciliation held the instance.
    Skipped,
    /// There is no snapshot to diff against; a full build is required.
    NeedsBuild,
    Unchanged,
    Changed { removed: usize, added: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CatalogOutcome {
    Built { movies: usize },
    AlreadyRunning,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResumeOutcome {
    /// No usable snapshot existed, or it failed verification; a build ran.
    Rebuilt(BuildOutcome),
    /// The on-disk snapshot passed verification and was reconciled.
    Verified(ReconcileOutcome),
    /// Verification could not reach upstream; the snapshot is served as-is.
    Unverified,
    /// The instance was already live; a regular reconciliation ran.
    Reconciled(ReconcileOutcome),
}

/// Point-in-time view of an instance for status endpoints.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheSummary {
    pub identity: Identity,
    pub movies: usize,
    pub last_update: Option<DateTime<Utc>>,
    pub last_catalog_build: Option<DateTime<Utc>>,
    pub needs_build: bool,
    pub is_updating: bool,
    pub is_initializing: bool,
    pub building_catalog: bool,
}

struct CacheState {
    movies: IndexMap<String, MovieRecord>,
    last_update: Option<DateTime<Utc>>,
    last_catalog_build: Option<DateTime<Utc>>,
    needs_build: bool,
    /// Set while the list came from disk and has not yet been verified.
    unverified: bool,
    is_updating: bool,
    is_initializing: bool,
}

#[derive(Clone, Copy)]
enum Busy {
    Updating,
    Initializing,
}

/// Clears its busy flag when dropped, including on early return.
struct BusyGuard<'a> {
    state: &'a Mutex<CacheState>,
    busy: Busy,
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        let mut state = self.state.lock();
        match self.busy {
            Busy::Updating => state.is_updating = false,
            Busy::Initializing => state.is_initializing = false,
        }
    }
}

/// Raises an `AtomicBool` for its lifetime.
struct FlagGuard<'a>(&'a AtomicBool);

impl<'a> FlagGuard<'a> {
    fn raise(flag: &'a AtomicBool) -> Self {
        flag.store(true, Ordering::Release);
        FlagGuard(flag)
    }
}

impl Drop for FlagGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct CacheInstance {
    identity: Identity,
    owner: Arc<dyn LibraryProvider>,
    /// Successfully switched perspective, reused across operations.
    perspective: Mutex<Option<Arc<dyn LibraryProvider>>>,
    store: SnapshotStore,
    state: Mutex<CacheState>,
    io_lock: tokio::sync::Mutex<()>,
    /// Held for the whole of a full catalog build.
    catalog_build: tokio::sync::Mutex<()>,
    /// Serializes writes to the all-movies snapshot.
    catalog_io: tokio::sync::Mutex<()>,
    /// Raised while a full catalog build runs; patches yield to it.
    catalog_busy: AtomicBool,
    progress: ProgressChannel,
    detail_concurrency: usize,
}

impl CacheInstance {
    /// Load the unwatched snapshot from `store` into memory.
    ///
    /// Never touches the network. A missing, empty or corrupt snapshot leaves
    /// the instance empty and marked as needing a build.
    pub async fn open(
        identity: Identity,
        owner: Arc<dyn LibraryProvider>,
        store: SnapshotStore,
        detail_concurrency: usize,
    ) -> Self {
        let loaded = store.load_or_empty(SnapshotKind::Unwatched).await;
        let mut movies = IndexMap::with_capacity(loaded.len());
        for movie in loaded {
            movies.entry(movie.id.clone()).or_insert(movie);
        }

        let last_catalog_build = tokio::fs::metadata(store.path(SnapshotKind::AllMovies))
            .await
            .ok()
            .and_then(|m| m.modified().ok())
            .map(DateTime::<Utc>::from);

        let needs_build = movies.is_empty();
        if needs_build {
            info!(identity = %identity, "No usable snapshot on disk, build required");
        } else {
            info!(identity = %identity, movies = movies.len(), "Loaded snapshot from disk");
        }

        Self {
            identity,
            owner,
            perspective: Mutex::new(None),
            store,
            state: Mutex::new(CacheState {
                movies,
                last_update: None,
                last_catalog_build,
                needs_build,
                unverified: !needs_build,
                is_updating: false,
                is_initializing: false,
            }),
            io_lock: tokio::sync::Mutex::new(()),
            catalog_build: tokio::sync::Mutex::new(()),
            catalog_io: tokio::sync::Mutex::new(()),
            catalog_busy: AtomicBool::new(false),
            progress: ProgressChannel::new(),
            detail_concurrency: detail_concurrency.max(1),
        }
    }

    /// Answer as `provider` instead of switching perspective on first use.
    pub fn with_perspective(self, provider: Option<Arc<dyn LibraryProvider>>) -> Self {
        *self.perspective.lock() = provider;
        self
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn store(&self) -> &SnapshotStore {
        &self.store
    }

    /// Register an observer for build progress.
    pub fn subscribe(&self) -> broadcast::Receiver<BuildEvent> {
        self.progress.subscribe()
    }

    pub fn get_cached_movies(&self) -> Vec<MovieRecord> {
        self.state.lock().movies.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.state.lock().movies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn needs_build(&self) -> bool {
        self.state.lock().needs_build
    }

    pub fn last_update(&self) -> Option<DateTime<Utc>> {
        self.state.lock().last_update
    }

    pub fn last_catalog_build(&self) -> Option<DateTime<Utc>> {
        self.state.lock().last_catalog_build
    }

    pub fn summary(&self) -> CacheSummary {
        let state = self.state.lock();
        CacheSummary {
            identity: self.identity.clone(),
            movies: state.movies.len(),
            last_update: state.last_update,
            last_catalog_build: state.last_catalog_build,
            needs_build: state.needs_build,
            is_updating: state.is_updating,
            is_initializing: state.is_initializing,
            building_catalog: self.catalog_busy.load(Ordering::Acquire),
        }
    }

    pub fn filter_options(&self) -> FilterOptions {
        FilterOptions::collect(self.state.lock().movies.values())
    }

    fn try_begin(&self, busy: Busy) -> Option<BusyGuard<'_>> {
        let mut state = self.state.lock();
        if state.is_updating || state.is_initializing {
            return None;
        }
        match busy {
            Busy::Updating => state.is_updating = true,
            Busy::Initializing => state.is_initializing = true,
        }
        Some(BusyGuard {
            state: &self.state,
            busy,
        })
    }

    /// The provider answering as this identity.
    ///
    /// A failed switch degrades to the owner perspective instead of failing
    /// the operation. The switched handle is kept for later calls.
    async fn perspective(&self) -> Arc<dyn LibraryProvider> {
        if !self.identity.kind.needs_perspective_switch() {
            return Arc::clone(&self.owner);
        }

        let cached = self.perspective.lock().clone();
        if let Some(provider) = cached {
            return provider;
        }

        match self.owner.switch_perspective(&self.identity).await {
            Ok(provider) => {
                *self.perspective.lock() = Some(Arc::clone(&provider));
                provider
            }
            Err(e) => {
                warn!(
                    identity = %self.identity,
                    error = %e,
                    "Perspective switch failed, using owner perspective; watch state may be attributed to the owner"
                );
                Arc::clone(&self.owner)
            }
        }
    }

    async fn persist_unwatched(&self) -> Result<(), StoreError> {
        let _io = self.io_lock.lock().await;
        let snapshot = self.get_cached_movies();
        self.store.save(SnapshotKind::Unwatched, &snapshot).await
    }

    /// Rebuild the unwatched list from the full upstream listing.
    ///
    /// A no-op returning [`BuildOutcome::AlreadyRunning`] if a build or
    /// reconciliation is already in progress. On failure the previous list
    /// and snapshot are kept and the error is pushed to observers.
    #[tracing::instrument(skip_all, fields(identity = %self.identity))]
    pub async fn start_cache_build(
        self: &Arc<Self>,
        catalog: CatalogMode,
    ) -> Result<BuildOutcome, CacheError> {
        let Some(guard) = self.try_begin(Busy::Initializing) else {
            debug!("Cache build already in progress, ignoring trigger");
            return Ok(BuildOutcome::AlreadyRunning);
        };

        let start = Instant::now();
        let count = match self.run_full_build().await {
            Ok(count) => count,
            Err(e) => {
                error!(error = ?e, "Cache build failed, keeping previous snapshot");
                self.progress.emit(BuildEvent::Error {
                    message: e.to_string(),
                });
                return Err(e);
            }
        };
        drop(guard);

        info!(
            movies = count,
            duration = fmt_duration(start.elapsed()),
            "Cache build complete"
        );
        self.progress
            .emit(BuildEvent::LoadingComplete { movies: count });

        let catalog_synced = match catalog {
            CatalogMode::Detached => {
                self.spawn_catalog_build();
                false
            }
            CatalogMode::Blocking => match self.sync_all_movies().await {
                Ok(_) => true,
                Err(e) => {
                    warn!(error = ?e, "Catalog build after cache build failed");
                    false
                }
            },
        };

        Ok(BuildOutcome::Built {
            movies: count,
            catalog_synced,
        })
    }

    async fn run_full_build(&self) -> Result<usize, CacheError> {
        let provider = self.perspective().await;
        let sections = provider.list_sections().await?;
        let total = sections.len();
        self.progress
            .emit(BuildEvent::progress(0, total, "Listing library sections"));

        let mut collected: IndexMap<String, MovieRecord> = IndexMap::new();
        for (i, section) in sections.iter().enumerate() {
            let movies = provider
                .list_section_movies(section, WatchScope::Unwatched)
                .await?;
            for movie in movies.into_iter().filter(|m| !m.watched) {
                collected.entry(movie.id.clone()).or_insert(movie);
            }
            self.progress.emit(BuildEvent::progress(
                i + 1,
                total,
                format!("Scanned {} ({} movies found)", section.title, collected.len()),
            ));
        }

        let snapshot: Vec<MovieRecord> = collected.values().cloned().collect();
        let count = snapshot.len();

        // Disk first: if the write fails, memory still matches the old file.
        let _io = self.io_lock.lock().await;
        self.store.save(SnapshotKind::Unwatched, &snapshot).await?;
        {
            let mut state = self.state.lock();
            state.movies = collected;
            state.needs_build = false;
            state.unverified = false;
            state.last_update = Some(Utc::now());
        }
        Ok(count)
    }

    /// Diff the cached unwatched ids against upstream and patch the delta.
    ///
    /// Upstream calls are bounded by the size of the delta. When nothing
    /// changed no file is written, but `last_update` still advances. Failures
    /// are pushed to observers like build failures.
    #[tracing::instrument(skip_all, fields(identity = %self.identity))]
    pub async fn check_for_changes(&self) -> Result<ReconcileOutcome, CacheError> {
        let Some(_guard) = self.try_begin(Busy::Updating) else {
            debug!("Cache busy, skipping reconciliation");
            return Ok(ReconcileOutcome::Skipped);
        };
        if self.needs_build() {
            debug!("No snapshot to reconcile against");
            return Ok(ReconcileOutcome::NeedsBuild);
        }

        match self.reconcile().await {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                error!(error = ?e, "Reconciliation failed, keeping current snapshot");
                self.progress.emit(BuildEvent::Error {
                    message: e.to_string(),
                });
                Err(e)
            }
        }
    }

    async fn reconcile(&self) -> Result<ReconcileOutcome, CacheError> {
        let provider = self.perspective().await;
        let upstream = provider.list_unwatched_identifiers().await?;

        let delta = {
            let state = self.state.lock();
            Delta::between(state.movies.keys().map(String::as_str), &upstream)
        };

        if delta.is_empty() {
            self.state.lock().last_update = Some(Utc::now());
            debug!(movies = upstream.len(), "No changes upstream");
            return Ok(ReconcileOutcome::Unchanged);
        }

        let fetched = self.fetch_details(&provider, &delta.newly_unwatched).await;

        let (removed, added) = {
            let mut state = self.state.lock();
            let mut removed = 0;
            for id in &delta.newly_watched {
                if state.movies.shift_remove(id).is_some() {
                    removed += 1;
                }
            }
            let mut added = 0;
            for record in fetched.iter() {
                if !state.movies.contains_key(&record.id) {
                    state.movies.insert(record.id.clone(), record.clone());
                    added += 1;
                }
            }
            state.last_update = Some(Utc::now());
            (removed, added)
        };

        if removed + added > 0 {
            self.persist_unwatched().await?;
            self.patch_catalog(&delta.newly_watched, &fetched).await;
        }

        info!(removed, added, "Reconciled with upstream");
        Ok(ReconcileOutcome::Changed { removed, added })
    }

    /// Fetch full records for `ids`, skipping items that vanished, turned out
    /// watched, or failed to load (they are retried on the next pass).
    async fn fetch_details(
        &self,
        provider: &Arc<dyn LibraryProvider>,
        ids: &[String],
    ) -> Vec<MovieRecord> {
        let results: Vec<(String, Result<Option<MovieRecord>, ProviderError>)> =
            futures::stream::iter(ids.iter().cloned())
                .map(|id| {
                    let provider = Arc::clone(provider);
                    async move {
                        let result = provider.fetch_item_detail(&id).await;
                        (id, result)
                    }
                })
                .buffered(self.detail_concurrency)
                .collect()
                .await;

        results
            .into_iter()
            .filter_map(|(id, result)| match result {
                Ok(Some(record)) if !record.watched => Some(record),
                Ok(Some(_)) => {
                    debug!(id = %id, "Item was watched before its detail was fetched");
                    None
                }
                Ok(None) => {
                    debug!(id = %id, "Item disappeared before its detail was fetched");
                    None
                }
                Err(e) => {
                    warn!(id = %id, error = %e, "Failed to fetch item detail");
                    None
                }
            })
            .collect()
    }

    /// Flip `watched` flags in the all-movies snapshot for a reconciled delta.
    ///
    /// Skipped while a catalog build runs; that build supersedes the patch.
    async fn patch_catalog(&self, newly_watched: &[String], newly_unwatched: &[MovieRecord]) {
        if self.catalog_busy.load(Ordering::Acquire) {
            debug!("Catalog build in flight, not patching all-movies snapshot");
            return;
        }
        let _io = self.catalog_io.lock().await;

        let mut all = match self.store.load(SnapshotKind::AllMovies).await {
            Ok(Some(all)) => all,
            Ok(None) => return,
            Err(e) => {
                warn!(error = ?e, "All-movies snapshot unreadable, leaving it for the next catalog build");
                return;
            }
        };

        let watched: HashSet<&str> = newly_watched.iter().map(String::as_str).collect();
        let mut known: HashSet<String> = HashSet::with_capacity(all.len());
        let mut changed = false;
        for movie in all.iter_mut() {
            let should_be_watched = if watched.contains(movie.id.as_str()) {
                true
            } else if newly_unwatched.iter().any(|r| r.id == movie.id) {
                false
            } else {
                movie.watched
            };
            if movie.watched != should_be_watched {
                movie.watched = should_be_watched;
                changed = true;
            }
            known.insert(movie.id.clone());
        }
        for record in newly_unwatched {
            if !known.contains(&record.id) {
                all.push(record.clone());
                changed = true;
            }
        }

        if changed && let Err(e) = self.store.save(SnapshotKind::AllMovies, &all).await {
            warn!(error = ?e, "Failed to patch all-movies snapshot");
        }
    }

    /// Rebuild the all-movies snapshot from every section, watched or not.
    ///
    /// Returns [`CatalogOutcome::AlreadyRunning`] without waiting if another
    /// catalog build holds the instance.
    #[tracing::instrument(skip_all, fields(identity = %self.identity))]
    pub async fn cache_all_movies(&self) -> Result<CatalogOutcome, CacheError> {
        let Ok(build) = self.catalog_build.try_lock() else {
            debug!("Catalog build already running");
            return Ok(CatalogOutcome::AlreadyRunning);
        };
        let movies = self.build_catalog(build).await?;
        Ok(CatalogOutcome::Built { movies })
    }

    /// Rebuild the all-movies snapshot, waiting out any build in flight so the
    /// result reflects upstream as of this call.
    #[tracing::instrument(skip_all, fields(identity = %self.identity))]
    pub async fn sync_all_movies(&self) -> Result<usize, CacheError> {
        let build = self.catalog_build.lock().await;
        self.build_catalog(build).await
    }

    async fn build_catalog(&self, _build: MutexGuard<'_, ()>) -> Result<usize, CacheError> {
        let _busy = FlagGuard::raise(&self.catalog_busy);
        let start = Instant::now();
        let provider = self.perspective().await;
        let mut all: IndexMap<String, MovieRecord> = IndexMap::new();
        for section in provider.list_sections().await? {
            let movies = provider.list_section_movies(&section, WatchScope::All).await?;
            for movie in movies {
                all.entry(movie.id.clone()).or_insert(movie);
            }
        }

        let snapshot: Vec<MovieRecord> = all.into_values().collect();
        {
            let _io = self.catalog_io.lock().await;
            self.store.save(SnapshotKind::AllMovies, &snapshot).await?;
        }
        self.state.lock().last_catalog_build = Some(Utc::now());

        info!(
            movies = snapshot.len(),
            duration = fmt_duration(start.elapsed()),
            "Catalog build complete"
        );
        Ok(snapshot.len())
    }

    /// Run [`Self::cache_all_movies`] on a detached task.
    pub fn spawn_catalog_build(self: &Arc<Self>) {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = this.cache_all_movies().await {
                warn!(identity = %this.identity, error = ?e, "Background catalog build failed");
            }
        });
    }

    /// Spot-check a sample of cached records against upstream.
    pub async fn verify_snapshot(&self) -> Verdict {
        let sample = {
            let state = self.state.lock();
            verify::sample_ids(state.movies.values())
        };
        let provider = self.perspective().await;
        verify::verify_sample(provider.as_ref(), &sample).await
    }

    /// Drop the unwatched list from memory and disk and mark the instance
    /// for a full build.
    pub async fn discard(&self) -> Result<(), StoreError> {
        let _io = self.io_lock.lock().await;
        {
            let mut state = self.state.lock();
            state.movies.clear();
            state.needs_build = true;
            state.unverified = false;
        }
        self.store.save(SnapshotKind::Unwatched, &[]).await
    }

    /// Bring the instance up to date: build when nothing usable is cached,
    /// verify a snapshot freshly loaded from disk, otherwise reconcile.
    pub async fn resume(self: &Arc<Self>) -> Result<ResumeOutcome, CacheError> {
        let (needs_build, unverified) = {
            let state = self.state.lock();
            (state.needs_build, state.unverified)
        };

        if needs_build {
            let outcome = self.start_cache_build(CatalogMode::Detached).await?;
            return Ok(ResumeOutcome::Rebuilt(outcome));
        }

        if !unverified {
            return Ok(ResumeOutcome::Reconciled(self.check_for_changes().await?));
        }

        match self.verify_snapshot().await {
            Verdict::Accepted { sampled } => {
                self.state.lock().unverified = false;
                info!(identity = %self.identity, sampled, "Snapshot passed verification");
                if self.last_catalog_build().is_none() {
                    self.spawn_catalog_build();
                }
                Ok(ResumeOutcome::Verified(self.check_for_changes().await?))
            }
            Verdict::Rejected { id, reason } => {
                warn!(identity = %self.identity, id = %id, reason = ?reason, "Snapshot failed verification, rebuilding");
                self.discard().await?;
                let outcome = self.start_cache_build(CatalogMode::Blocking).await?;
                Ok(ResumeOutcome::Rebuilt(outcome))
            }
            Verdict::Inconclusive(e) => {
                warn!(identity = %self.identity, error = %e, "Could not verify snapshot, serving it unverified");
                Ok(ResumeOutcome::Unverified)
            }
        }
    }

    /// Drop one movie from the unwatched list, e.g. after the user watched it.
    ///
    /// Returns whether the movie was cached.
    pub async fn remove_movie(&self, id: &str) -> Result<bool, CacheError> {
        let removed = self.state.lock().movies.shift_remove(id);
        let Some(record) = removed else {
            return Ok(false);
        };
        self.persist_unwatched().await?;
        self.patch_catalog(&[record.id], &[]).await;
        Ok(true)
    }

    /// Count snapshot records matching `filters`, reading the snapshot from disk.
    ///
    /// Any read or parse failure counts as zero.
    pub async fn get_filtered_movie_count(&self, filters: &FilterQuery) -> usize {
        let kind = match filters.watch_status {
            WatchStatus::Unwatched => SnapshotKind::Unwatched,
            WatchStatus::Watched | WatchStatus::All => SnapshotKind::AllMovies,
        };
        match self.store.load(kind).await {
            Ok(Some(movies)) => movies.iter().filter(|m| filters.matches(m)).count(),
            Ok(None) => 0,
            Err(e) => {
                debug!(identity = %self.identity, error = ?e, "Counting against unreadable snapshot");
                0
            }
        }
    }

    /// A uniformly random movie matching `filters`.
    pub async fn random_movie(&self, filters: &FilterQuery) -> Option<MovieRecord> {
        if filters.watch_status == WatchStatus::Unwatched {
            let state = self.state.lock();
            let matching: Vec<&MovieRecord> =
                state.movies.values().filter(|m| filters.matches(m)).collect();
            return matching.choose(&mut rand::rng()).map(|m| (*m).clone());
        }

        let all = self.store.load_or_empty(SnapshotKind::AllMovies).await;
        let matching: Vec<&MovieRecord> = all.iter().filter(|m| filters.matches(m)).collect();
        matching.choose(&mut rand::rng()).map(|m| (*m).clone())
    }
}
