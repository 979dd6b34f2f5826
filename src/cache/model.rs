//! Cached catalog types.

use serde::{Deserialize, Serialize};

/// One catalog item as it was seen at fetch time.
///
/// Records are replaced wholesale; the only field ever patched in place is
/// `watched`, and only in the all-movies snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MovieRecord {
    /// Source-specific stable identifier (Plex rating key, Jellyfin item id).
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub year: Option<i32>,
    #[serde(default)]
    pub genres: Vec<String>,
    #[serde(rename = "contentRating", default)]
    pub content_rating: Option<String>,
    #[serde(default)]
    pub watched: bool,
    /// Cross-reference used to correlate the title with request services.
    #[serde(default)]
    pub tmdb_id: Option<String>,
}

/// Which snapshot a query targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum WatchStatus {
    #[default]
    Unwatched,
    Watched,
    All,
}

/// Filter query consumed from the HTTP layer.
///
/// An empty list for a dimension imposes no constraint on that dimension.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterQuery {
    #[serde(default)]
    pub genres: Vec<String>,
    #[serde(default)]
    pub years: Vec<i32>,
    #[serde(default)]
    pub pg_ratings: Vec<String>,
    #[serde(default, rename = "watch_status")]
    pub watch_status: WatchStatus,
}

impl FilterQuery {
    /// Whether `movie` passes every non-empty dimension of this filter.
    ///
    /// Genre and rating comparisons ignore ASCII case; a movie without a
    /// year or rating never matches a non-empty year or rating set.
    pub fn matches(&self, movie: &MovieRecord) -> bool {
        if !self.genres.is_empty()
            && !movie
                .genres
                .iter()
                .any(|g| self.genres.iter().any(|f| f.eq_ignore_ascii_case(g)))
        {
            return false;
        }

        if !self.years.is_empty() {
            let Some(year) = movie.year else {
                return false;
            };
            if !self.years.contains(&year) {
                return false;
            }
        }

        if !self.pg_ratings.is_empty() {
            let Some(ref rating) = movie.content_rating else {
                return false;
            };
            if !self.pg_ratings.iter().any(|r| r.eq_ignore_ascii_case(rating)) {
                return false;
            }
        }

        match self.watch_status {
            WatchStatus::Watched => movie.watched,
            WatchStatus::Unwatched | WatchStatus::All => true,
        }
    }
}

/// Distinct filter values present in a snapshot, for building filter UIs.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterOptions {
    pub genres: Vec<String>,
    pub years: Vec<i32>,
    pub pg_ratings: Vec<String>,
}

impl FilterOptions {
    pub fn collect<'a>(movies: impl IntoIterator<Item = &'a MovieRecord>) -> Self {
        use std::collections::BTreeSet;

        let mut genres = BTreeSet::new();
        let mut years = BTreeSet::new();
        let mut ratings = BTreeSet::new();
        for movie in movies {
            genres.extend(movie.genres.iter().cloned());
            years.extend(movie.year);
            ratings.extend(movie.content_rating.iter().cloned());
        }

        Self {
            genres: genres.into_iter().collect(),
            years: years.into_iter().rev().collect(),
            pg_ratings: ratings.into_iter().collect(),
        }
    }
}
