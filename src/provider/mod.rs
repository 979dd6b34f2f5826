//! Upstream media-server backends.
//!
//! Every backend implements [`LibraryProvider`]. The cache only ever talks to
//! the trait, so adding a backend never touches reconciliation logic.

pub mod client;
pub mod errors;
pub mod jellyfin;
pub mod json;
pub mod plex;

pub use errors::ProviderError;
pub use jellyfin::{JellyfinFlavor, JellyfinProvider};
pub use plex::PlexProvider;

use crate::cache::identity::Identity;
use crate::cache::model::MovieRecord;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;

/// Which media server the application talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    #[default]
    Plex,
    Jellyfin,
    Emby,
}

impl Backend {
    pub fn as_str(&self) -> &'static str {
        match self {
            Backend::Plex => "plex",
            Backend::Jellyfin => "jellyfin",
            Backend::Emby => "emby",
        }
    }
}

/// A movie library on the media server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LibrarySection {
    pub id: String,
    pub title: String,
}

/// Which items a section listing should return.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchScope {
    Unwatched,
    All,
}

/// Read access to a media library from one user's perspective.
#[async_trait]
pub trait LibraryProvider: Send + Sync {
    fn backend(&self) -> Backend;

    /// Movie sections visible to this perspective.
    async fn list_sections(&self) -> Result<Vec<LibrarySection>, ProviderError>;

    /// Movies in one section, with `watched` set from this perspective.
    async fn list_section_movies(
        &self,
        section: &LibrarySection,
        scope: WatchScope,
    ) -> Result<Vec<MovieRecord>, ProviderError>;

    /// Identifiers of every unwatched movie across all sections.
    async fn list_unwatched_identifiers(&self) -> Result<HashSet<String>, ProviderError> {
        let mut ids = HashSet::new();
        for section in self.list_sections().await? {
            let movies = self
                .list_section_movies(&section, WatchScope::Unwatched)
                .await?;
            ids.extend(movies.into_iter().map(|m| m.id));
        }
        Ok(ids)
    }

    /// Full detail for one item, or `None` if it no longer exists.
    async fn fetch_item_detail(&self, id: &str) -> Result<Option<MovieRecord>, ProviderError>;

    /// A handle answering queries as `identity`.
    async fn switch_perspective(
        &self,
        identity: &Identity,
    ) -> Result<Arc<dyn LibraryProvider>, ProviderError>;
}
