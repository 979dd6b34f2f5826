//! Per-instance background refresh task.

use crate::cache::instance::{BuildOutcome, CacheInstance, CatalogMode, ReconcileOutcome};
use chrono::{DateTime, Utc};
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, info_span, warn};

#[derive(Debug, Clone, Copy)]
pub struct RefreshSettings {
    pub interval: Duration,
    /// Upper bound of the random delay added to each sleep.
    pub jitter: Duration,
    pub catalog_interval: Duration,
}

/// Keeps one instance in step with upstream until cancelled.
///
/// The first pass resumes from whatever was loaded off disk; every later pass
/// builds if the instance needs it, otherwise reconciles. Cancellation is
/// observed only while sleeping, so a pass in progress always completes.
pub struct RefreshLoop {
    instance: Arc<CacheInstance>,
    settings: RefreshSettings,
    cancel: CancellationToken,
}

impl RefreshLoop {
    pub fn new(
        instance: Arc<CacheInstance>,
        settings: RefreshSettings,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            instance,
            settings,
            cancel,
        }
    }

    pub async fn run(self) {
        let span = info_span!("refresh", identity = %self.instance.identity());
        async move {
            info!("Refresh loop started");
            if !self.cancel.is_cancelled() {
                self.resume().await;
            }

            loop {
                let delay = jittered(self.settings.interval, self.settings.jitter);
                tokio::select! {
                    _ = self.cancel.cancelled() => break,
                    _ = time::sleep(delay) => {}
                }
                self.tick().await;
            }
            info!("Refresh loop stopped");
        }
        .instrument(span)
        .await
    }

    async fn resume(&self) {
        match self.instance.resume().await {
            Ok(outcome) => debug!(?outcome, "Resumed cache"),
            Err(e) => warn!(error = ?e, "Initial refresh failed, retrying next interval"),
        }
    }

    async fn tick(&self) {
        if self.instance.needs_build() {
            match self.instance.start_cache_build(CatalogMode::Detached).await {
                Ok(BuildOutcome::Built { movies, .. }) => debug!(movies, "Scheduled build finished"),
                Ok(BuildOutcome::AlreadyRunning) => {}
                Err(e) => warn!(error = ?e, "Scheduled build failed"),
            }
            // A successful build dispatches its own catalog refresh.
            return;
        }

        match self.instance.check_for_changes().await {
            Ok(ReconcileOutcome::Skipped) => debug!("Reconciliation skipped, instance busy"),
            Ok(_) => {}
            Err(e) => warn!(error = ?e, "Reconciliation failed"),
        }

        if catalog_due(
            self.instance.last_catalog_build(),
            Utc::now(),
            self.settings.catalog_interval,
        ) {
            debug!("Catalog snapshot is stale, rebuilding in background");
            self.instance.spawn_catalog_build();
        }
    }
}

/// `interval` plus a uniformly random delay in `[0, jitter]`.
fn jittered(interval: Duration, jitter: Duration) -> Duration {
    let max = u64::try_from(jitter.as_millis()).unwrap_or(u64::MAX);
    interval + Duration::from_millis(rand::rng().random_range(0..=max))
}

fn catalog_due(last: Option<DateTime<Utc>>, now: DateTime<Utc>, interval: Duration) -> bool {
    match last {
        None => true,
        // A timestamp in the future (clock skew) is treated as fresh.
        Some(ts) => (now - ts).to_std().is_ok_and(|age| age >= interval),
    }
}
