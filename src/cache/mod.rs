//! Per-identity snapshot of the media library's unwatched movies.

pub mod delta;
pub mod identity;
pub mod instance;
pub mod model;
pub mod progress;
pub mod refresh;
pub mod registry;
pub mod store;
pub mod verify;

pub use identity::{Identity, UserKind};
pub use instance::{
    BuildOutcome, CacheError, CacheInstance, CacheSummary, CatalogMode, CatalogOutcome,
    ReconcileOutcome, ResumeOutcome,
};
pub use model::{FilterOptions, FilterQuery, MovieRecord, WatchStatus};
pub use progress::BuildEvent;
pub use registry::{CacheRegistry, CacheSettings};
pub use store::{SnapshotKind, SnapshotStore, StoreError};
