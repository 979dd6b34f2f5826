//! Spot-check of a snapshot loaded from disk.
//!
//! A handful of cached records are re-resolved upstream. The snapshot is
//! accepted only if every sampled item still exists and is still unwatched;
//! a single failure rejects the whole snapshot.

use crate::cache::model::MovieRecord;
use crate::provider::{LibraryProvider, ProviderError};
use rand::seq::IndexedRandom;
use tracing::debug;

pub const SAMPLE_SIZE: usize = 5;

#[derive(Debug)]
pub enum Verdict {
    Accepted { sampled: usize },
    Rejected { id: String, reason: Rejection },
    /// The upstream could not be asked; the snapshot is neither trusted nor refuted.
    Inconclusive(ProviderError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    Missing,
    Watched,
}

impl Verdict {
    pub fn is_rejected(&self) -> bool {
        matches!(self, Verdict::Rejected { .. })
    }
}

/// Pick up to [`SAMPLE_SIZE`] distinct ids uniformly at random.
pub fn sample_ids<'a>(movies: impl IntoIterator<Item = &'a MovieRecord>) -> Vec<String> {
    let ids: Vec<&str> = movies.into_iter().map(|m| m.id.as_str()).collect();
    ids.choose_multiple(&mut rand::rng(), SAMPLE_SIZE)
        .map(|id| id.to_string())
        .collect()
}

/// Re-resolve each sampled id and decide whether the snapshot can be trusted.
pub async fn verify_sample(provider: &dyn LibraryProvider, sample: &[String]) -> Verdict {
    for id in sample {
        match provider.fetch_item_detail(id).await {
            Ok(Some(record)) if record.watched => {
                return Verdict::Rejected {
                    id: id.clone(),
                    reason: Rejection::Watched,
                };
            }
            Ok(Some(_)) => debug!(id = %id, "Sampled movie still unwatched"),
            Ok(None) => {
                return Verdict::Rejected {
                    id: id.clone(),
                    reason: Rejection::Missing,
                };
            }
            Err(e) => return Verdict::Inconclusive(e),
        }
    }
    Verdict::Accepted {
        sampled: sample.len(),
    }
}
