//! Process-wide map from identity to its live cache instance.

use crate::cache::identity::Identity;
use crate::cache::instance::CacheInstance;
use crate::cache::refresh::{RefreshLoop, RefreshSettings};
use crate::cache::store::{SnapshotStore, StoreError};
use crate::provider::{LibraryProvider, ProviderError};
use dashmap::DashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct CacheSettings {
    /// Snapshot Store root; each identity gets a subdirectory.
    pub root: PathBuf,
    pub refresh: RefreshSettings,
    pub detail_concurrency: usize,
    /// Start a refresh loop for every new instance.
    pub auto_refresh: bool,
}

impl CacheSettings {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            refresh: RefreshSettings {
                interval: Duration::from_secs(5 * 60),
                jitter: Duration::from_secs(30),
                catalog_interval: Duration::from_secs(6 * 60 * 60),
            },
            detail_concurrency: 4,
            auto_refresh: true,
        }
    }
}

struct RegistryEntry {
    instance: Arc<CacheInstance>,
    cancel: CancellationToken,
}

struct RegistryInner {
    entries: DashMap<Identity, RegistryEntry>,
    provider: Arc<dyn LibraryProvider>,
    settings: CacheSettings,
    /// Parent of every per-instance token.
    shutdown: CancellationToken,
    tasks: parking_lot::Mutex<Vec<JoinHandle<()>>>,
    /// Serializes instance creation so a key is opened at most once.
    creating: tokio::sync::Mutex<()>,
}

/// Shared handle; clones refer to the same registry.
#[derive(Clone)]
pub struct CacheRegistry {
    inner: Arc<RegistryInner>,
}

impl CacheRegistry {
    pub fn new(provider: Arc<dyn LibraryProvider>, settings: CacheSettings) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                entries: DashMap::new(),
                provider,
                settings,
                shutdown: CancellationToken::new(),
                tasks: parking_lot::Mutex::new(Vec::new()),
                creating: tokio::sync::Mutex::new(()),
            }),
        }
    }

    pub fn settings(&self) -> &CacheSettings {
        &self.inner.settings
    }

    pub fn provider(&self) -> &Arc<dyn LibraryProvider> {
        &self.inner.provider
    }

    pub fn store_for(&self, identity: &Identity) -> SnapshotStore {
        SnapshotStore::new(identity.storage_dir(&self.inner.settings.root))
    }

    pub fn get(&self, identity: &Identity) -> Option<Arc<CacheInstance>> {
        self.inner
            .entries
            .get(identity)
            .map(|entry| Arc::clone(&entry.instance))
    }

    /// Return the instance for `identity`, creating it on first use.
    ///
    /// Identities that need a perspective switch are resolved upstream first;
    /// one that does not resolve is never registered. Creation then loads the
    /// snapshot from disk and, when auto-refresh is on, starts the refresh
    /// loop. Concurrent callers for the same identity all receive the same
    /// instance.
    pub async fn get_or_create(
        &self,
        identity: &Identity,
    ) -> Result<Arc<CacheInstance>, ProviderError> {
        if let Some(instance) = self.get(identity) {
            return Ok(instance);
        }

        let _creating = self.inner.creating.lock().await;
        if let Some(instance) = self.get(identity) {
            return Ok(instance);
        }

        let perspective = if identity.kind.needs_perspective_switch() {
            match self.inner.provider.switch_perspective(identity).await {
                Ok(provider) => Some(provider),
                Err(e) => {
                    warn!(identity = %identity, error = %e, "Refusing to create cache for unresolved identity");
                    return Err(e);
                }
            }
        } else {
            None
        };

        let instance = Arc::new(
            CacheInstance::open(
                identity.clone(),
                Arc::clone(&self.inner.provider),
                self.store_for(identity),
                self.inner.settings.detail_concurrency,
            )
            .await
            .with_perspective(perspective),
        );
        let cancel = self.inner.shutdown.child_token();

        if self.inner.settings.auto_refresh && !self.inner.shutdown.is_cancelled() {
            let refresh = RefreshLoop::new(
                Arc::clone(&instance),
                self.inner.settings.refresh,
                cancel.clone(),
            );
            let handle = tokio::spawn(refresh.run());
            let mut tasks = self.inner.tasks.lock();
            tasks.retain(|h| !h.is_finished());
            tasks.push(handle);
        }

        self.inner.entries.insert(
            identity.clone(),
            RegistryEntry {
                instance: Arc::clone(&instance),
                cancel,
            },
        );
        info!(identity = %identity, "Cache instance created");
        Ok(instance)
    }

    /// Every live instance, in no particular order.
    pub fn instances(&self) -> Vec<Arc<CacheInstance>> {
        self.inner
            .entries
            .iter()
            .map(|entry| Arc::clone(&entry.value().instance))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.entries.is_empty()
    }

    /// Stop the identity's refresh loop, forget its instance and delete its
    /// snapshot files. The next request creates a fresh instance.
    pub async fn invalidate(&self, identity: &Identity) -> Result<bool, StoreError> {
        let removed = self.inner.entries.remove(identity);
        let existed = removed.is_some();
        if let Some((_, entry)) = removed {
            entry.cancel.cancel();
            entry.instance.discard().await?;
        }
        self.store_for(identity).clear().await?;
        info!(identity = %identity, existed, "Cache invalidated");
        Ok(existed)
    }

    /// Cancel every refresh loop and wait up to `timeout` for them to exit.
    pub async fn shutdown(&self, timeout: Duration) {
        self.inner.shutdown.cancel();
        let handles: Vec<_> = std::mem::take(&mut *self.inner.tasks.lock());
        if handles.is_empty() {
            return;
        }

        let count = handles.len();
        match tokio::time::timeout(timeout, futures::future::join_all(handles)).await {
            Ok(_) => info!(loops = count, "Refresh loops stopped"),
            Err(_) => warn!(loops = count, timeout = ?timeout, "Refresh loops did not stop in time"),
        }
    }
}
