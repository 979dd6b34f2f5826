//! Error types for the upstream media-server clients.

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("upstream request failed")]
    Request(#[from] reqwest::Error),
    #[error("upstream returned HTTP {status} for {url}")]
    Status { status: u16, url: String },
    #[error("Failed to parse response")]
    ParseFailed {
        status: u16,
        url: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("no such user: {0}")]
    UnknownUser(String),
    #[error("{backend} cannot answer as {identity}")]
    PerspectiveUnsupported { backend: &'static str, identity: String },
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ProviderError {
    /// Whether the upstream answered but said the item does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, ProviderError::Status { status: 404, .. })
    }
}
