//! On-disk snapshot files for one identity.
//!
//! Each identity owns two JSON array files: the unwatched list and the
//! all-movies list. Writes go to a sibling `.tmp` file which is flushed and
//! then renamed over the destination, so readers never observe a partial file.

use crate::cache::model::MovieRecord;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

pub const UNWATCHED_FILE: &str = "unwatched_movies.json";
pub const ALL_MOVIES_FILE: &str = "all_movies.json";

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("failed to read {path}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write {path}")]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("snapshot {path} is not valid JSON")]
    Corrupt {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to serialize snapshot")]
    Serialize(#[from] serde_json::Error),
}

/// Which of the two snapshot files an operation targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotKind {
    Unwatched,
    AllMovies,
}

#[derive(Debug, Clone)]
pub struct SnapshotStore {
    dir: PathBuf,
}

impl SnapshotStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path(&self, kind: SnapshotKind) -> PathBuf {
        match kind {
            SnapshotKind::Unwatched => self.dir.join(UNWATCHED_FILE),
            SnapshotKind::AllMovies => self.dir.join(ALL_MOVIES_FILE),
        }
    }

    /// Read a snapshot.
    ///
    /// Returns `Ok(None)` when the file does not exist or is empty; a file
    /// that exists but does not parse is reported as [`StoreError::Corrupt`].
    pub async fn load(&self, kind: SnapshotKind) -> Result<Option<Vec<MovieRecord>>, StoreError> {
        let path = self.path(kind);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(StoreError::Read {
                    path: path.display().to_string(),
                    source,
                });
            }
        };

        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(None);
        }

        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|source| StoreError::Corrupt {
                path: path.display().to_string(),
                source,
            })
    }

    /// Read a snapshot, treating every failure as a cache miss.
    pub async fn load_or_empty(&self, kind: SnapshotKind) -> Vec<MovieRecord> {
        match self.load(kind).await {
            Ok(Some(movies)) => movies,
            Ok(None) => Vec::new(),
            Err(e) => {
                warn!(error = ?e, "Discarding unreadable snapshot");
                Vec::new()
            }
        }
    }

    /// Atomically replace a snapshot with `movies`.
    pub async fn save(&self, kind: SnapshotKind, movies: &[MovieRecord]) -> Result<(), StoreError> {
        let content = serde_json::to_vec(movies)?;
        let path = self.path(kind);
        write_atomic(&path, &content).await?;
        debug!(path = %path.display(), movies = movies.len(), "Snapshot written");
        Ok(())
    }

    /// Delete both snapshot files. Missing files are not an error.
    pub async fn clear(&self) -> Result<(), StoreError> {
        for kind in [SnapshotKind::Unwatched, SnapshotKind::AllMovies] {
            let path = self.path(kind);
            match tokio::fs::remove_file(&path).await {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(source) => {
                    return Err(StoreError::Write {
                        path: path.display().to_string(),
                        source,
                    });
                }
            }
        }
        Ok(())
    }
}

/// Path of the staging file used while replacing `path`.
pub fn temp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

fn write_err(path: &Path) -> impl FnOnce(std::io::Error) -> StoreError + use<> {
    let path = path.display().to_string();
    move |source| StoreError::Write { path, source }
}

async fn write_atomic(path: &Path, content: &[u8]) -> Result<(), StoreError> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(write_err(parent))?;
    }

    let tmp = temp_path(path);
    let mut file = tokio::fs::File::create(&tmp)
        .await
        .map_err(write_err(&tmp))?;
    file.write_all(content).await.map_err(write_err(&tmp))?;
    file.sync_all().await.map_err(write_err(&tmp))?;
    drop(file);

    tokio::fs::rename(&tmp, path)
        .await
        .map_err(write_err(path))
}
