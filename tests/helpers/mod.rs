//! Shared fixtures: an in-memory media library and a registry rooted in a
//! temporary directory.
#![allow(dead_code)]

use async_trait::async_trait;
use reelpick::cache::refresh::RefreshSettings;
use reelpick::cache::{CacheRegistry, CacheSettings, Identity, MovieRecord};
use reelpick::provider::{Backend, LibraryProvider, LibrarySection, ProviderError, WatchScope};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tempfile::TempDir;

pub fn movie(id: &str, year: Option<i32>, genres: &[&str]) -> MovieRecord {
    MovieRecord {
        id: id.to_string(),
        title: format!("Movie {id}"),
        year,
        genres: genres.iter().map(|g| g.to_string()).collect(),
        content_rating: Some("PG".to_string()),
        watched: false,
        tmdb_id: None,
    }
}

#[derive(Default)]
struct Library {
    movies: BTreeMap<String, MovieRecord>,
    /// Listed by the section scan but missing from detail lookups.
    vanished: HashSet<String>,
    perspectives: HashMap<String, MemoryProvider>,
}

#[derive(Default)]
struct Inner {
    library: parking_lot::Mutex<Library>,
    failing: AtomicBool,
    switch_failing: AtomicBool,
    detail_calls: AtomicUsize,
    list_calls: AtomicUsize,
}

/// A single-section library whose contents tests mutate between calls.
#[derive(Clone, Default)]
pub struct MemoryProvider {
    inner: Arc<Inner>,
}

impl MemoryProvider {
    pub fn with_movies(movies: impl IntoIterator<Item = MovieRecord>) -> Self {
        let provider = Self::default();
        for m in movies {
            provider.insert(m);
        }
        provider
    }

    pub fn insert(&self, movie: MovieRecord) {
        self.inner
            .library
            .lock()
            .movies
            .insert(movie.id.clone(), movie);
    }

    pub fn remove(&self, id: &str) {
        self.inner.library.lock().movies.remove(id);
    }

    pub fn set_watched(&self, id: &str, watched: bool) {
        if let Some(m) = self.inner.library.lock().movies.get_mut(id) {
            m.watched = watched;
        }
    }

    /// Detail lookups for `id` report the item as gone while listings still show it.
    pub fn set_vanished(&self, id: &str) {
        self.inner.library.lock().vanished.insert(id.to_string());
    }

    /// Every call fails with a 503 while set.
    pub fn set_failing(&self, failing: bool) {
        self.inner.failing.store(failing, Ordering::SeqCst);
    }

    pub fn set_switch_failing(&self, failing: bool) {
        self.inner.switch_failing.store(failing, Ordering::SeqCst);
    }

    /// Answer perspective switches to `external_id` with `provider`.
    pub fn add_perspective(&self, external_id: &str, provider: MemoryProvider) {
        self.inner
            .library
            .lock()
            .perspectives
            .insert(external_id.to_string(), provider);
    }

    pub fn detail_calls(&self) -> usize {
        self.inner.detail_calls.load(Ordering::SeqCst)
    }

    pub fn list_calls(&self) -> usize {
        self.inner.list_calls.load(Ordering::SeqCst)
    }

    fn check(&self) -> Result<(), ProviderError> {
        if self.inner.failing.load(Ordering::SeqCst) {
            return Err(ProviderError::Status {
                status: 503,
                url: "/memory".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl LibraryProvider for MemoryProvider {
    fn backend(&self) -> Backend {
        Backend::Plex
    }

    async fn list_sections(&self) -> Result<Vec<LibrarySection>, ProviderError> {
        self.check()?;
        Ok(vec![LibrarySection {
            id: "1".to_string(),
            title: "Movies".to_string(),
        }])
    }

    async fn list_section_movies(
        &self,
        _section: &LibrarySection,
        scope: WatchScope,
    ) -> Result<Vec<MovieRecord>, ProviderError> {
        self.check()?;
        self.inner.list_calls.fetch_add(1, Ordering::SeqCst);
        // Give concurrent operations a chance to interleave, like a real request would.
        tokio::task::yield_now().await;
        let library = self.inner.library.lock();
        Ok(library
            .movies
            .values()
            .filter(|m| scope == WatchScope::All || !m.watched)
            .cloned()
            .collect())
    }

    async fn fetch_item_detail(&self, id: &str) -> Result<Option<MovieRecord>, ProviderError> {
        self.check()?;
        self.inner.detail_calls.fetch_add(1, Ordering::SeqCst);
        let library = self.inner.library.lock();
        if library.vanished.contains(id) {
            return Ok(None);
        }
        Ok(library.movies.get(id).cloned())
    }

    async fn switch_perspective(
        &self,
        identity: &Identity,
    ) -> Result<Arc<dyn LibraryProvider>, ProviderError> {
        if self.inner.switch_failing.load(Ordering::SeqCst) {
            return Err(ProviderError::UnknownUser(identity.external_id.clone()));
        }
        let library = self.inner.library.lock();
        match library.perspectives.get(&identity.external_id) {
            Some(provider) => Ok(Arc::new(provider.clone())),
            None => Err(ProviderError::UnknownUser(identity.external_id.clone())),
        }
    }
}

/// A registry over `provider` with refresh loops disabled.
pub fn registry(provider: &MemoryProvider) -> (TempDir, CacheRegistry) {
    registry_with(provider, |_| {})
}

pub fn registry_with(
    provider: &MemoryProvider,
    configure: impl FnOnce(&mut CacheSettings),
) -> (TempDir, CacheRegistry) {
    let dir = tempfile::tempdir().unwrap();
    let mut settings = CacheSettings::new(dir.path());
    settings.auto_refresh = false;
    settings.refresh = RefreshSettings {
        interval: Duration::from_millis(20),
        jitter: Duration::ZERO,
        catalog_interval: Duration::from_secs(3600),
    };
    configure(&mut settings);
    let registry = CacheRegistry::new(Arc::new(provider.clone()), settings);
    (dir, registry)
}

pub fn ids(movies: &[MovieRecord]) -> Vec<String> {
    let mut ids: Vec<String> = movies.iter().map(|m| m.id.clone()).collect();
    ids.sort();
    ids
}
