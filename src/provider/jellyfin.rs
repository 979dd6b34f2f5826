//! Jellyfin and Emby backend.
//!
//! Both servers speak the same user-scoped REST dialect, so one client serves
//! both. A perspective is simply a different user id with the same API key.

use super::client::UpstreamClient;
use super::errors::ProviderError;
use super::{Backend, LibraryProvider, LibrarySection, WatchScope};
use crate::cache::identity::{Identity, UserKind};
use crate::cache::model::MovieRecord;
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

pub const AUTH_HEADER: &str = "x-emby-token";
const PAGE_SIZE: usize = 500;
const ITEM_FIELDS: &str = "Genres,ProviderIds,OfficialRating";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JellyfinFlavor {
    Jellyfin,
    Emby,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ItemsPage {
    #[serde(default)]
    items: Vec<JellyfinItem>,
    #[serde(default)]
    total_record_count: Option<usize>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct JellyfinItem {
    id: String,
    name: String,
    #[serde(default)]
    collection_type: Option<String>,
    #[serde(default)]
    production_year: Option<i32>,
    #[serde(default)]
    genres: Option<Vec<String>>,
    #[serde(default)]
    official_rating: Option<String>,
    #[serde(default)]
    provider_ids: Option<HashMap<String, String>>,
    #[serde(default)]
    user_data: Option<UserData>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct UserData {
    #[serde(default)]
    played: bool,
}

impl From<JellyfinItem> for MovieRecord {
    fn from(item: JellyfinItem) -> Self {
        let tmdb_id = item.provider_ids.and_then(|ids| {
            ids.into_iter()
                .find(|(k, _)| k.eq_ignore_ascii_case("tmdb"))
                .map(|(_, v)| v)
        });
        MovieRecord {
            id: item.id,
            title: item.name,
            year: item.production_year,
            genres: item.genres.unwrap_or_default(),
            content_rating: item.official_rating,
            watched: item.user_data.is_some_and(|d| d.played),
            tmdb_id,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ServerUser {
    id: String,
    name: String,
}

#[derive(Clone)]
pub struct JellyfinProvider {
    client: UpstreamClient,
    flavor: JellyfinFlavor,
    user_id: String,
}

impl JellyfinProvider {
    pub fn new(client: UpstreamClient, flavor: JellyfinFlavor, user_id: impl Into<String>) -> Self {
        Self {
            client,
            flavor,
            user_id: user_id.into(),
        }
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    async fn items_page(
        &self,
        query: &[(&str, &str)],
        start: usize,
    ) -> Result<ItemsPage, ProviderError> {
        let path = format!("/Users/{}/Items", self.user_id);
        let start = start.to_string();
        let limit = PAGE_SIZE.to_string();
        let mut params = query.to_vec();
        params.push(("StartIndex", &start));
        params.push(("Limit", &limit));
        self.client.get_json(&path, &params).await
    }
}

#[async_trait]
impl LibraryProvider for JellyfinProvider {
    fn backend(&self) -> Backend {
        match self.flavor {
            JellyfinFlavor::Jellyfin => Backend::Jellyfin,
            JellyfinFlavor::Emby => Backend::Emby,
        }
    }

    async fn list_sections(&self) -> Result<Vec<LibrarySection>, ProviderError> {
        let path = format!("/Users/{}/Views", self.user_id);
        let views: ItemsPage = self.client.get_json(&path, &[]).await?;
        Ok(views
            .items
            .into_iter()
            .filter(|v| v.collection_type.as_deref() == Some("movies"))
            .map(|v| LibrarySection {
                id: v.id,
                title: v.name,
            })
            .collect())
    }

    async fn list_section_movies(
        &self,
        section: &LibrarySection,
        scope: WatchScope,
    ) -> Result<Vec<MovieRecord>, ProviderError> {
        let mut query = vec![
            ("ParentId", section.id.as_str()),
            ("IncludeItemTypes", "Movie"),
            ("Recursive", "true"),
            ("Fields", ITEM_FIELDS),
        ];
        if scope == WatchScope::Unwatched {
            query.push(("Filters", "IsUnplayed"));
        }

        let mut movies = Vec::new();
        loop {
            let page = self.items_page(&query, movies.len()).await?;
            let fetched = page.items.len();
            movies.extend(page.items.into_iter().map(MovieRecord::from));

            let total = page.total_record_count.unwrap_or(movies.len());
            if fetched < PAGE_SIZE || movies.len() >= total {
                break;
            }
        }

        debug!(
            section = %section.title,
            items = movies.len(),
            "Listed Jellyfin section"
        );
        Ok(movies)
    }

    async fn fetch_item_detail(&self, id: &str) -> Result<Option<MovieRecord>, ProviderError> {
        let path = format!("/Users/{}/Items/{}", self.user_id, urlencoding::encode(id));
        match self.client.get_json::<JellyfinItem>(&path, &[]).await {
            Ok(item) => Ok(Some(item.into())),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn switch_perspective(
        &self,
        identity: &Identity,
    ) -> Result<Arc<dyn LibraryProvider>, ProviderError> {
        match identity.kind {
            UserKind::Global | UserKind::Owner => return Ok(Arc::new(self.clone())),
            UserKind::Managed => {
                return Err(ProviderError::PerspectiveUnsupported {
                    backend: self.backend().as_str(),
                    identity: identity.to_string(),
                });
            }
            UserKind::SubAccount => {}
        }

        let users: Vec<ServerUser> = self.client.get_json("/Users", &[]).await?;
        let user = users
            .into_iter()
            .find(|u| u.id == identity.external_id || u.name.eq_ignore_ascii_case(&identity.external_id))
            .ok_or_else(|| ProviderError::UnknownUser(identity.external_id.clone()))?;

        info!(identity = %identity, user_id = %user.id, "Switched Jellyfin perspective");
        Ok(Arc::new(JellyfinProvider {
            client: self.client.clone(),
            flavor: self.flavor,
            user_id: user.id,
        }))
    }
}
