//! Plex Media Server backend.
//!
//! Library reads go to the server with the current token. Perspective
//! switches go through plex.tv: switch to the home user, then exchange the
//! user token for that user's access token to this server.

use super::client::UpstreamClient;
use super::errors::ProviderError;
use super::{Backend, LibraryProvider, LibrarySection, WatchScope};
use crate::cache::identity::{Identity, UserKind};
use crate::cache::model::MovieRecord;
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, info};

pub const AUTH_HEADER: &str = "x-plex-token";
const CLIENT_IDENTIFIER: &str = "reelpick";
/// Plex media type code for movies.
const MOVIE_TYPE: &str = "1";

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    #[serde(rename = "MediaContainer")]
    container: T,
}

#[derive(Debug, Deserialize)]
struct SectionsContainer {
    #[serde(rename = "Directory", default)]
    directories: Vec<Directory>,
}

#[derive(Debug, Deserialize)]
struct Directory {
    key: String,
    title: String,
    #[serde(rename = "type")]
    kind: String,
}

#[derive(Debug, Deserialize)]
struct MetadataContainer {
    #[serde(rename = "Metadata", default)]
    metadata: Vec<PlexItem>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlexItem {
    rating_key: String,
    title: String,
    #[serde(default)]
    year: Option<i32>,
    #[serde(default)]
    content_rating: Option<String>,
    #[serde(default)]
    view_count: Option<u32>,
    #[serde(rename = "Genre", default)]
    genres: Vec<Tag>,
    #[serde(rename = "Guid", default)]
    guids: Vec<GuidRef>,
}

#[derive(Debug, Deserialize)]
struct Tag {
    tag: String,
}

#[derive(Debug, Deserialize)]
struct GuidRef {
    id: String,
}

impl From<PlexItem> for MovieRecord {
    fn from(item: PlexItem) -> Self {
        let tmdb_id = item
            .guids
            .iter()
            .find_map(|g| g.id.strip_prefix("tmdb://"))
            .map(str::to_string);
        MovieRecord {
            id: item.rating_key,
            title: item.title,
            year: item.year,
            genres: item.genres.into_iter().map(|g| g.tag).collect(),
            content_rating: item.content_rating,
            watched: item.view_count.unwrap_or(0) > 0,
            tmdb_id,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ServerIdentity {
    machine_identifier: String,
}

#[derive(Debug, Deserialize)]
struct HomeUsers {
    #[serde(default)]
    users: Vec<HomeUser>,
}

#[derive(Debug, Deserialize)]
struct HomeUser {
    id: u64,
    uuid: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    username: Option<String>,
}

impl HomeUser {
    fn matches(&self, external_id: &str) -> bool {
        self.uuid == external_id
            || self.id.to_string() == external_id
            || self.title.eq_ignore_ascii_case(external_id)
            || self
                .username
                .as_deref()
                .is_some_and(|u| u.eq_ignore_ascii_case(external_id))
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SwitchResponse {
    auth_token: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Resource {
    client_identifier: String,
    #[serde(default)]
    access_token: Option<String>,
    #[serde(default)]
    provides: String,
}

#[derive(Clone)]
pub struct PlexProvider {
    server: UpstreamClient,
    plex_tv: UpstreamClient,
}

impl PlexProvider {
    pub fn new(server: UpstreamClient, plex_tv: UpstreamClient) -> Self {
        Self { server, plex_tv }
    }

    async fn machine_identifier(&self) -> Result<String, ProviderError> {
        let identity: Envelope<ServerIdentity> = self.server.get_json("/identity", &[]).await?;
        Ok(identity.container.machine_identifier)
    }

    async fn find_home_user(&self, external_id: &str) -> Result<HomeUser, ProviderError> {
        let home: HomeUsers = self
            .plex_tv
            .get_json(
                "/api/v2/home/users",
                &[("X-Plex-Client-Identifier", CLIENT_IDENTIFIER)],
            )
            .await?;
        home.users
            .into_iter()
            .find(|u| u.matches(external_id))
            .ok_or_else(|| ProviderError::UnknownUser(external_id.to_string()))
    }

    /// Exchange a plex.tv user token for that user's token on this server.
    async fn server_token_for(&self, user_token: &str) -> Result<String, ProviderError> {
        let machine_id = self.machine_identifier().await?;
        let resources: Vec<Resource> = self
            .plex_tv
            .with_token(user_token)?
            .get_json(
                "/api/v2/resources",
                &[("X-Plex-Client-Identifier", CLIENT_IDENTIFIER)],
            )
            .await?;

        resources
            .into_iter()
            .find(|r| r.provides.contains("server") && r.client_identifier == machine_id)
            .and_then(|r| r.access_token)
            .ok_or_else(|| {
                ProviderError::Other(anyhow::anyhow!(
                    "server {machine_id} is not shared with the switched user"
                ))
            })
    }
}

#[async_trait]
impl LibraryProvider for PlexProvider {
    fn backend(&self) -> Backend {
        Backend::Plex
    }

    async fn list_sections(&self) -> Result<Vec<LibrarySection>, ProviderError> {
        let sections: Envelope<SectionsContainer> =
            self.server.get_json("/library/sections", &[]).await?;
        Ok(sections
            .container
            .directories
            .into_iter()
            .filter(|d| d.kind == "movie")
            .map(|d| LibrarySection {
                id: d.key,
                title: d.title,
            })
            .collect())
    }

    async fn list_section_movies(
        &self,
        section: &LibrarySection,
        scope: WatchScope,
    ) -> Result<Vec<MovieRecord>, ProviderError> {
        let path = format!("/library/sections/{}/all", section.id);
        let mut query = vec![("type", MOVIE_TYPE), ("includeGuids", "1")];
        if scope == WatchScope::Unwatched {
            query.push(("unwatched", "1"));
        }

        let listing: Envelope<MetadataContainer> = self.server.get_json(&path, &query).await?;
        debug!(
            section = %section.title,
            items = listing.container.metadata.len(),
            "Listed Plex section"
        );
        Ok(listing
            .container
            .metadata
            .into_iter()
            .map(MovieRecord::from)
            .collect())
    }

    async fn fetch_item_detail(&self, id: &str) -> Result<Option<MovieRecord>, ProviderError> {
        let path = format!("/library/metadata/{}", urlencoding::encode(id));
        match self
            .server
            .get_json::<Envelope<MetadataContainer>>(&path, &[])
            .await
        {
            Ok(detail) => Ok(detail
                .container
                .metadata
                .into_iter()
                .next()
                .map(MovieRecord::from)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn switch_perspective(
        &self,
        identity: &Identity,
    ) -> Result<Arc<dyn LibraryProvider>, ProviderError> {
        if !identity.kind.needs_perspective_switch() {
            return Ok(Arc::new(self.clone()));
        }

        let user = self.find_home_user(&identity.external_id).await?;
        let path = format!(
            "/api/v2/home/users/{}/switch?X-Plex-Client-Identifier={CLIENT_IDENTIFIER}",
            user.uuid
        );
        let switched: SwitchResponse = self.plex_tv.post_json(&path).await?;
        let server_token = self.server_token_for(&switched.auth_token).await?;

        info!(
            identity = %identity,
            plex_user = user.id,
            managed = identity.kind == UserKind::Managed,
            "Switched Plex perspective"
        );
        Ok(Arc::new(PlexProvider {
            server: self.server.with_token(&server_token)?,
            plex_tv: self.plex_tv.with_token(&switched.auth_token)?,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::json::parse_json_with_context;

    #[test]
    fn maps_plex_metadata_to_record() {
        let body = r#"{"MediaContainer": {"size": 2, "Metadata": [
            {"ratingKey": "101", "title": "Arrival", "year": 2016, "contentRating": "PG-13",
             "Genre": [{"tag": "Drama"}, {"tag": "Science Fiction"}],
             "Guid": [{"id": "imdb://tt2543164"}, {"id": "tmdb://329865"}]},
            {"ratingKey": "102", "title": "Heat", "viewCount": 2}
        ]}}"#;
        let parsed: Envelope<MetadataContainer> = parse_json_with_context(body).unwrap();
        let records: Vec<MovieRecord> = parsed
            .container
            .metadata
            .into_iter()
            .map(MovieRecord::from)
            .collect();

        assert_eq!(records[0].id, "101");
        assert_eq!(records[0].tmdb_id.as_deref(), Some("329865"));
        assert_eq!(records[0].genres, vec!["Drama", "Science Fiction"]);
        assert!(!records[0].watched);
        assert!(records[1].watched);
        assert_eq!(records[1].year, None);
        assert!(records[1].genres.is_empty());
    }

    #[test]
    fn only_movie_sections_are_kept() {
        let body = r#"{"MediaContainer": {"Directory": [
            {"key": "1", "title": "Movies", "type": "movie"},
            {"key": "2", "title": "Shows", "type": "show"}
        ]}}"#;
        let parsed: Envelope<SectionsContainer> = parse_json_with_context(body).unwrap();
        let movie_sections: Vec<_> = parsed
            .container
            .directories
            .iter()
            .filter(|d| d.kind == "movie")
            .collect();
        assert_eq!(movie_sections.len(), 1);
        assert_eq!(movie_sections[0].key, "1");
    }

    #[test]
    fn home_user_matches_any_handle() {
        let user = HomeUser {
            id: 42,
            uuid: "abc123".into(),
            title: "Kids".into(),
            username: Some("kidsroom".into()),
        };
        assert!(user.matches("42"));
        assert!(user.matches("abc123"));
        assert!(user.matches("kids"));
        assert!(user.matches("KidsRoom"));
        assert!(!user.matches("parents"));
    }
}
