//! Build, reconcile and verification behavior of cache instances.

mod helpers;

use helpers::{MemoryProvider, ids, movie, registry};
use reelpick::cache::store::{SnapshotKind, SnapshotStore, UNWATCHED_FILE};
use reelpick::cache::verify::Verdict;
use reelpick::cache::{
    BuildEvent, BuildOutcome, CacheError, CacheInstance, CatalogMode, CatalogOutcome, FilterQuery,
    Identity, ReconcileOutcome, ResumeOutcome, UserKind, WatchStatus,
};
use reelpick::provider::ProviderError;
use std::sync::Arc;
use std::time::Duration;

fn library(ids: &[&str]) -> MemoryProvider {
    MemoryProvider::with_movies(ids.iter().map(|id| movie(id, Some(2000), &["Drama"])))
}

#[tokio::test]
async fn registry_hands_out_one_instance_per_identity() {
    let provider = library(&["1"]);
    provider.add_perspective("kids", library(&["1"]));
    let (_dir, registry) = registry(&provider);
    let identity = Identity::new(UserKind::SubAccount, "kids");

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let registry = registry.clone();
            let identity = identity.clone();
            tokio::spawn(async move { registry.get_or_create(&identity).await })
        })
        .collect();

    let mut instances = Vec::new();
    for handle in handles {
        instances.push(handle.await.unwrap().unwrap());
    }
    assert!(instances.iter().all(|i| Arc::ptr_eq(i, &instances[0])));
    assert_eq!(registry.len(), 1);

    let global = registry.get_or_create(&Identity::global()).await.unwrap();
    assert!(!Arc::ptr_eq(&global, &instances[0]));
    assert_eq!(registry.len(), 2);
}

#[tokio::test]
async fn reconcile_applies_upstream_delta() {
    let provider = library(&["1", "2", "3"]);
    let (_dir, registry) = registry(&provider);
    let cache = registry.get_or_create(&Identity::global()).await.unwrap();

    let outcome = cache.start_cache_build(CatalogMode::Blocking).await.unwrap();
    assert_eq!(
        outcome,
        BuildOutcome::Built {
            movies: 3,
            catalog_synced: true
        }
    );

    provider.set_watched("1", true);
    provider.insert(movie("4", Some(2021), &["Comedy"]));

    let outcome = cache.check_for_changes().await.unwrap();
    assert_eq!(outcome, ReconcileOutcome::Changed { removed: 1, added: 1 });
    assert_eq!(ids(&cache.get_cached_movies()), vec!["2", "3", "4"]);
    // Only the newly unwatched item needed a detail fetch.
    assert_eq!(provider.detail_calls(), 1);

    let on_disk = cache.store().load(SnapshotKind::Unwatched).await.unwrap().unwrap();
    assert_eq!(ids(&on_disk), vec!["2", "3", "4"]);
}

#[tokio::test]
async fn reconcile_never_duplicates_records() {
    let provider = library(&["1", "2"]);
    let (_dir, registry) = registry(&provider);
    let cache = registry.get_or_create(&Identity::global()).await.unwrap();
    cache.start_cache_build(CatalogMode::Blocking).await.unwrap();

    provider.insert(movie("3", None, &[]));
    let (a, b) = tokio::join!(cache.check_for_changes(), cache.check_for_changes());
    a.unwrap();
    b.unwrap();
    cache.check_for_changes().await.unwrap();

    let movies = cache.get_cached_movies();
    assert_eq!(movies.len(), 3);
    assert_eq!(ids(&movies), vec!["1", "2", "3"]);
}

#[tokio::test]
async fn unchanged_reconcile_skips_the_write_but_advances_last_update() {
    let provider = library(&["1", "2"]);
    let (_dir, registry) = registry(&provider);
    let cache = registry.get_or_create(&Identity::global()).await.unwrap();
    cache.start_cache_build(CatalogMode::Blocking).await.unwrap();

    let path = cache.store().dir().join(UNWATCHED_FILE);
    let before_mtime = std::fs::metadata(&path).unwrap().modified().unwrap();
    let before_update = cache.last_update().unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;

    let outcome = cache.check_for_changes().await.unwrap();
    assert_eq!(outcome, ReconcileOutcome::Unchanged);
    assert_eq!(std::fs::metadata(&path).unwrap().modified().unwrap(), before_mtime);
    assert!(cache.last_update().unwrap() > before_update);
}

#[tokio::test]
async fn ids_that_vanish_before_detail_fetch_are_retried_later() {
    let provider = library(&["1"]);
    let (_dir, registry) = registry(&provider);
    let cache = registry.get_or_create(&Identity::global()).await.unwrap();
    cache.start_cache_build(CatalogMode::Blocking).await.unwrap();

    provider.insert(movie("2", None, &[]));
    provider.set_vanished("2");
    provider.insert(movie("3", None, &[]));

    let outcome = cache.check_for_changes().await.unwrap();
    assert_eq!(outcome, ReconcileOutcome::Changed { removed: 0, added: 1 });
    assert_eq!(ids(&cache.get_cached_movies()), vec!["1", "3"]);

    // Still listed upstream and still missing locally, so it is fetched again.
    let before = provider.detail_calls();
    cache.check_for_changes().await.unwrap();
    assert_eq!(provider.detail_calls(), before + 1);
}

#[tokio::test]
async fn filtered_count_reads_the_snapshot() {
    let provider = MemoryProvider::with_movies([
        movie("1", Some(1999), &["Drama"]),
        movie("2", Some(2001), &["Comedy"]),
        movie("3", Some(2010), &["Drama"]),
        movie("4", Some(2010), &["Horror"]),
        movie("5", None, &["Drama"]),
    ]);
    provider.set_watched("4", true);
    let (_dir, registry) = registry(&provider);
    let cache = registry.get_or_create(&Identity::global()).await.unwrap();
    cache.start_cache_build(CatalogMode::Blocking).await.unwrap();

    let by_year = FilterQuery {
        years: vec![2001, 2010],
        ..Default::default()
    };
    assert_eq!(cache.get_filtered_movie_count(&by_year).await, 2);

    let only_2010 = FilterQuery {
        years: vec![2010],
        ..Default::default()
    };
    assert_eq!(cache.get_filtered_movie_count(&only_2010).await, 1);
    assert_eq!(cache.get_filtered_movie_count(&FilterQuery::default()).await, 4);

    let watched_2010 = FilterQuery {
        years: vec![2010],
        watch_status: WatchStatus::Watched,
        ..Default::default()
    };
    assert_eq!(cache.get_filtered_movie_count(&watched_2010).await, 1);

    let drama = FilterQuery {
        genres: vec!["drama".to_string()],
        ..Default::default()
    };
    assert_eq!(cache.get_filtered_movie_count(&drama).await, 3);
}

#[tokio::test]
async fn filtered_count_is_zero_for_unreadable_snapshot() {
    let provider = library(&["1"]);
    let (_dir, registry) = registry(&provider);
    let cache = registry.get_or_create(&Identity::global()).await.unwrap();

    assert_eq!(cache.get_filtered_movie_count(&FilterQuery::default()).await, 0);

    std::fs::create_dir_all(cache.store().dir()).unwrap();
    std::fs::write(cache.store().path(SnapshotKind::Unwatched), "[{\"id\":").unwrap();
    assert_eq!(cache.get_filtered_movie_count(&FilterQuery::default()).await, 0);
}

#[tokio::test]
async fn stale_snapshot_is_rejected_and_rebuilt() {
    let provider = library(&["1", "2"]);
    provider.set_watched("1", true);
    let (_dir, registry) = registry(&provider);

    let identity = Identity::global();
    registry
        .store_for(&identity)
        .save(SnapshotKind::Unwatched, &[movie("1", None, &[]), movie("2", None, &[])])
        .await
        .unwrap();

    let cache = registry.get_or_create(&identity).await.unwrap();
    assert_eq!(cache.len(), 2);
    assert!(!cache.needs_build());

    let outcome = cache.resume().await.unwrap();
    assert_eq!(
        outcome,
        ResumeOutcome::Rebuilt(BuildOutcome::Built {
            movies: 1,
            catalog_synced: true
        })
    );
    assert_eq!(ids(&cache.get_cached_movies()), vec!["2"]);
}

#[tokio::test]
async fn verifier_rejects_missing_items() {
    let provider = library(&["2"]);
    let (_dir, registry) = registry(&provider);
    let identity = Identity::global();
    registry
        .store_for(&identity)
        .save(SnapshotKind::Unwatched, &[movie("9", None, &[])])
        .await
        .unwrap();

    let cache = registry.get_or_create(&identity).await.unwrap();
    assert!(cache.verify_snapshot().await.is_rejected());
}

#[tokio::test]
async fn valid_snapshot_is_kept_and_reconciled() {
    let provider = library(&["1", "2"]);
    let (_dir, registry) = registry(&provider);
    let identity = Identity::global();
    registry
        .store_for(&identity)
        .save(SnapshotKind::Unwatched, &[movie("1", Some(2000), &["Drama"]), movie("2", Some(2000), &["Drama"])])
        .await
        .unwrap();

    let cache = registry.get_or_create(&identity).await.unwrap();
    let outcome = cache.resume().await.unwrap();
    assert_eq!(outcome, ResumeOutcome::Verified(ReconcileOutcome::Unchanged));
    assert_eq!(ids(&cache.get_cached_movies()), vec!["1", "2"]);
    // One detail lookup per sampled record, none for the empty delta.
    assert_eq!(provider.detail_calls(), 2);
}

#[tokio::test]
async fn unreachable_upstream_leaves_snapshot_unverified() {
    let provider = library(&["1"]);
    let (_dir, registry) = registry(&provider);
    let identity = Identity::global();
    registry
        .store_for(&identity)
        .save(SnapshotKind::Unwatched, &[movie("1", None, &[])])
        .await
        .unwrap();
    provider.set_failing(true);

    let cache = registry.get_or_create(&identity).await.unwrap();
    assert!(matches!(cache.verify_snapshot().await, Verdict::Inconclusive(_)));
    assert_eq!(cache.resume().await.unwrap(), ResumeOutcome::Unverified);
    assert_eq!(cache.len(), 1);
}

#[tokio::test]
async fn corrupt_snapshot_opens_empty_and_needs_build() {
    let provider = library(&["1"]);
    let (_dir, registry) = registry(&provider);
    let identity = Identity::new(UserKind::Owner, "alice");
    let store = registry.store_for(&identity);
    std::fs::create_dir_all(store.dir()).unwrap();
    std::fs::write(store.path(SnapshotKind::Unwatched), "not json").unwrap();

    let cache = registry.get_or_create(&identity).await.unwrap();
    assert!(cache.is_empty());
    assert!(cache.needs_build());
    assert_eq!(provider.list_calls(), 0);
}

#[tokio::test]
async fn failed_build_keeps_previous_state_and_reports_error() {
    let provider = library(&["1", "2"]);
    let (_dir, registry) = registry(&provider);
    let cache = registry.get_or_create(&Identity::global()).await.unwrap();
    cache.start_cache_build(CatalogMode::Blocking).await.unwrap();

    let mut events = cache.subscribe();
    provider.set_failing(true);
    let result = cache.start_cache_build(CatalogMode::Blocking).await;
    assert!(matches!(result, Err(CacheError::Upstream(_))));
    assert_eq!(ids(&cache.get_cached_movies()), vec!["1", "2"]);

    let on_disk = cache.store().load(SnapshotKind::Unwatched).await.unwrap().unwrap();
    assert_eq!(ids(&on_disk), vec!["1", "2"]);

    let event = events.recv().await.unwrap();
    assert!(matches!(event, BuildEvent::Error { .. }));

    // The busy flag was released on the error path.
    provider.set_failing(false);
    assert!(matches!(
        cache.start_cache_build(CatalogMode::Blocking).await,
        Ok(BuildOutcome::Built { movies: 2, .. })
    ));
}

#[tokio::test]
async fn failed_reconciliation_keeps_state_and_reports_error() {
    let provider = library(&["1", "2"]);
    let (_dir, registry) = registry(&provider);
    let cache = registry.get_or_create(&Identity::global()).await.unwrap();
    cache.start_cache_build(CatalogMode::Blocking).await.unwrap();

    let mut events = cache.subscribe();
    provider.set_failing(true);
    let result = cache.check_for_changes().await;
    assert!(matches!(result, Err(CacheError::Upstream(_))));
    assert_eq!(ids(&cache.get_cached_movies()), vec!["1", "2"]);
    assert!(matches!(events.try_recv(), Ok(BuildEvent::Error { .. })));

    // The busy flag was released on the error path.
    provider.set_failing(false);
    assert_eq!(cache.check_for_changes().await.unwrap(), ReconcileOutcome::Unchanged);
}

#[tokio::test]
async fn reconcile_without_snapshot_defers_to_build() {
    let provider = library(&["1", "2", "3"]);
    let (_dir, registry) = registry(&provider);
    let cache = registry.get_or_create(&Identity::global()).await.unwrap();
    assert!(cache.needs_build());

    assert_eq!(cache.check_for_changes().await.unwrap(), ReconcileOutcome::NeedsBuild);
    assert_eq!(provider.detail_calls(), 0);
    assert!(cache.is_empty());
}

#[tokio::test]
async fn discarded_snapshot_no_longer_counts() {
    let provider = library(&["1", "2"]);
    provider.set_watched("1", true);
    let (_dir, registry) = registry(&provider);
    let identity = Identity::global();
    registry
        .store_for(&identity)
        .save(SnapshotKind::Unwatched, &[movie("1", None, &[]), movie("2", None, &[])])
        .await
        .unwrap();

    let cache = registry.get_or_create(&identity).await.unwrap();
    assert_eq!(cache.get_filtered_movie_count(&FilterQuery::default()).await, 2);
    assert!(cache.verify_snapshot().await.is_rejected());

    cache.discard().await.unwrap();
    assert!(cache.is_empty());
    assert!(cache.needs_build());
    assert_eq!(cache.get_filtered_movie_count(&FilterQuery::default()).await, 0);

    // A restart does not resurrect the rejected records either.
    let reopened = CacheInstance::open(
        identity.clone(),
        Arc::new(provider.clone()),
        registry.store_for(&identity),
        2,
    )
    .await;
    assert!(reopened.needs_build());
}

#[tokio::test]
async fn blocking_build_waits_for_running_catalog_build() {
    let provider = library(&["1", "2"]);
    let (_dir, registry) = registry(&provider);
    let cache = registry.get_or_create(&Identity::global()).await.unwrap();

    let (background, built) = tokio::join!(
        cache.cache_all_movies(),
        cache.start_cache_build(CatalogMode::Blocking)
    );
    assert_eq!(background.unwrap(), CatalogOutcome::Built { movies: 2 });
    assert!(matches!(
        built,
        Ok(BuildOutcome::Built {
            movies: 2,
            catalog_synced: true
        })
    ));
    assert!(cache.last_catalog_build().is_some());
}

#[tokio::test]
async fn catalog_patch_does_not_preempt_blocking_build() {
    let provider = library(&["1", "2", "3"]);
    let (_dir, registry) = registry(&provider);
    let cache = registry.get_or_create(&Identity::global()).await.unwrap();
    cache.start_cache_build(CatalogMode::Blocking).await.unwrap();

    provider.set_watched("1", true);
    let (removed, built) = tokio::join!(
        cache.remove_movie("1"),
        cache.start_cache_build(CatalogMode::Blocking)
    );
    assert!(removed.is_ok());
    assert!(matches!(
        built,
        Ok(BuildOutcome::Built {
            catalog_synced: true,
            ..
        })
    ));

    let all = cache.store().load(SnapshotKind::AllMovies).await.unwrap().unwrap();
    assert_eq!(all.len(), 3);
    assert!(all.iter().find(|m| m.id == "1").unwrap().watched);
}

#[tokio::test]
async fn build_reports_progress_then_completion() {
    let provider = library(&["1", "2", "3"]);
    let (_dir, registry) = registry(&provider);
    let cache = registry.get_or_create(&Identity::global()).await.unwrap();
    let mut events = cache.subscribe();

    cache.start_cache_build(CatalogMode::Blocking).await.unwrap();

    let mut received = Vec::new();
    while let Ok(event) = events.try_recv() {
        received.push(event);
    }
    assert!(matches!(received.first(), Some(BuildEvent::Progress { current: 0, .. })));
    assert_eq!(received.last(), Some(&BuildEvent::LoadingComplete { movies: 3 }));
}

#[tokio::test]
async fn failed_perspective_switch_falls_back_to_owner() {
    let provider = library(&["1", "2"]);
    provider.set_switch_failing(true);
    let dir = tempfile::tempdir().unwrap();
    let cache = Arc::new(
        CacheInstance::open(
            Identity::new(UserKind::SubAccount, "kids"),
            Arc::new(provider.clone()),
            SnapshotStore::new(dir.path()),
            2,
        )
        .await,
    );

    cache.start_cache_build(CatalogMode::Blocking).await.unwrap();
    assert_eq!(ids(&cache.get_cached_movies()), vec!["1", "2"]);
}

#[tokio::test]
async fn unresolved_sub_accounts_are_never_registered() {
    let provider = library(&["1"]);
    let (_dir, registry) = registry(&provider);

    for n in 0..20 {
        let identity = Identity::new(UserKind::SubAccount, format!("nobody{n}"));
        let result = registry.get_or_create(&identity).await;
        assert!(matches!(result, Err(ProviderError::UnknownUser(_))));
    }
    assert!(registry.is_empty());
    assert_eq!(provider.list_calls(), 0);
}

#[tokio::test]
async fn switched_perspective_sees_its_own_watch_state() {
    let owner = library(&["1", "2"]);
    let kids = library(&["1", "2"]);
    kids.set_watched("2", true);
    owner.add_perspective("kids", kids.clone());
    let (_dir, registry) = registry(&owner);

    let kids_cache = registry
        .get_or_create(&Identity::new(UserKind::SubAccount, "kids"))
        .await
        .unwrap();
    kids_cache.start_cache_build(CatalogMode::Blocking).await.unwrap();
    assert_eq!(ids(&kids_cache.get_cached_movies()), vec!["1"]);

    let global = registry.get_or_create(&Identity::global()).await.unwrap();
    global.start_cache_build(CatalogMode::Blocking).await.unwrap();
    assert_eq!(ids(&global.get_cached_movies()), vec!["1", "2"]);
    assert_ne!(kids_cache.store().dir(), global.store().dir());
}

#[tokio::test]
async fn remove_movie_updates_both_snapshots() {
    let provider = library(&["1", "2"]);
    let (_dir, registry) = registry(&provider);
    let cache = registry.get_or_create(&Identity::global()).await.unwrap();
    cache.start_cache_build(CatalogMode::Blocking).await.unwrap();

    assert!(cache.remove_movie("1").await.unwrap());
    assert!(!cache.remove_movie("1").await.unwrap());
    assert_eq!(ids(&cache.get_cached_movies()), vec!["2"]);

    let all = cache.store().load(SnapshotKind::AllMovies).await.unwrap().unwrap();
    let first = all.iter().find(|m| m.id == "1").unwrap();
    assert!(first.watched);
}

#[tokio::test]
async fn reconcile_patches_watched_flag_in_catalog() {
    let provider = library(&["1", "2"]);
    let (_dir, registry) = registry(&provider);
    let cache = registry.get_or_create(&Identity::global()).await.unwrap();
    cache.start_cache_build(CatalogMode::Blocking).await.unwrap();

    provider.set_watched("2", true);
    cache.check_for_changes().await.unwrap();

    let all = cache.store().load(SnapshotKind::AllMovies).await.unwrap().unwrap();
    assert_eq!(all.len(), 2);
    assert!(all.iter().find(|m| m.id == "2").unwrap().watched);
    assert!(!all.iter().find(|m| m.id == "1").unwrap().watched);
}

#[tokio::test]
async fn random_movie_respects_filters() {
    let provider = MemoryProvider::with_movies([
        movie("1", Some(1999), &["Drama"]),
        movie("2", Some(2010), &["Comedy"]),
    ]);
    let (_dir, registry) = registry(&provider);
    let cache = registry.get_or_create(&Identity::global()).await.unwrap();
    cache.start_cache_build(CatalogMode::Blocking).await.unwrap();

    let comedy = FilterQuery {
        genres: vec!["Comedy".to_string()],
        ..Default::default()
    };
    assert_eq!(cache.random_movie(&comedy).await.unwrap().id, "2");

    let none = FilterQuery {
        years: vec![1950],
        ..Default::default()
    };
    assert!(cache.random_movie(&none).await.is_none());
}
