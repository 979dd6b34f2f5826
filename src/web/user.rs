//! User context carried on every cache request.

use crate::cache::{Identity, UserKind};
use crate::web::error::{ApiError, ApiErrorCode};
use serde::Deserialize;

/// `?kind=sub_account&user=<id>`; no parameters selects the global cache.
///
/// The owner's view is answered by the global cache whatever username is
/// given, so `kind=owner` never creates an instance of its own.
#[derive(Debug, Default, Deserialize)]
pub struct UserQuery {
    #[serde(default)]
    pub kind: UserKind,
    #[serde(default)]
    pub user: Option<String>,
}

impl UserQuery {
    pub fn identity(&self) -> Result<Identity, ApiError> {
        if matches!(self.kind, UserKind::Global | UserKind::Owner) {
            return Ok(Identity::global());
        }
        match self.user.as_deref().map(str::trim) {
            Some(user) if !user.is_empty() => Ok(Identity::new(self.kind, user)),
            _ => Err(ApiError::new(
                ApiErrorCode::InvalidUser,
                format!("'user' is required for kind '{}'", self.kind.as_str()),
            )),
        }
    }
}
