//! Symmetric difference between the cached and upstream unwatched id sets.

use std::collections::HashSet;

/// What changed upstream since the snapshot was taken.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Delta {
    /// Cached ids no longer unwatched upstream.
    pub newly_watched: Vec<String>,
    /// Upstream unwatched ids missing from the cache.
    pub newly_unwatched: Vec<String>,
}

impl Delta {
    /// Compute `cached - upstream` and `upstream - cached`.
    ///
    /// Both sides are sorted so that reconciliation touches items in a
    /// deterministic order.
    pub fn between<'a, C>(cached: C, upstream: &HashSet<String>) -> Self
    where
        C: IntoIterator<Item = &'a str>,
    {
        let cached: HashSet<&str> = cached.into_iter().collect();

        let mut newly_watched: Vec<String> = cached
            .iter()
            .filter(|id| !upstream.contains(**id))
            .map(|id| id.to_string())
            .collect();
        let mut newly_unwatched: Vec<String> = upstream
            .iter()
            .filter(|id| !cached.contains(id.as_str()))
            .cloned()
            .collect();

        newly_watched.sort_unstable();
        newly_unwatched.sort_unstable();

        Self {
            newly_watched,
            newly_unwatched,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.newly_watched.is_empty() && self.newly_unwatched.is_empty()
    }
}
