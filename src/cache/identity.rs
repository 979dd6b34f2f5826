//! Typed user-context keys.
//!
//! An [`Identity`] names the perspective under which catalog visibility and
//! watch state are evaluated. It is used directly as the registry key and to
//! derive the Snapshot Store directory, so no string parsing is ever needed to
//! get back from a path to a user.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// The kind of account an [`Identity`] refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum UserKind {
    /// The process-wide default view, answered with the owner's credentials.
    #[default]
    Global,
    /// The account owner, addressed explicitly by username.
    Owner,
    /// A sub-account of the owner (Plex home user, Jellyfin user).
    SubAccount,
    /// A managed pseudo-account without its own credentials.
    Managed,
}

impl UserKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserKind::Global => "global",
            UserKind::Owner => "owner",
            UserKind::SubAccount => "sub_account",
            UserKind::Managed => "managed",
        }
    }

    /// Whether queries for this kind must be answered from a switched perspective.
    pub fn needs_perspective_switch(&self) -> bool {
        matches!(self, UserKind::SubAccount | UserKind::Managed)
    }
}

/// A `(kind, external_id)` pair identifying one Cache Instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Identity {
    pub kind: UserKind,
    /// Username or opaque sub-account id. Empty for [`UserKind::Global`].
    pub external_id: String,
}

impl Identity {
    pub fn global() -> Self {
        Self {
            kind: UserKind::Global,
            external_id: String::new(),
        }
    }

    pub fn new(kind: UserKind, external_id: impl Into<String>) -> Self {
        let external_id = match kind {
            UserKind::Global => String::new(),
            _ => external_id.into(),
        };
        Self { kind, external_id }
    }

    pub fn is_global(&self) -> bool {
        self.kind == UserKind::Global
    }

    /// Directory under `root` holding this identity's snapshot files.
    ///
    /// The external id is percent-encoded (dots included) so that no id can
    /// escape `root` or collide with another kind's directory.
    pub fn storage_dir(&self, root: &Path) -> PathBuf {
        match self.kind {
            UserKind::Global => root.join(UserKind::Global.as_str()),
            kind => root
                .join(kind.as_str())
                .join(encode_path_segment(&self.external_id)),
        }
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_global() {
            f.write_str("global")
        } else {
            write!(f, "{}:{}", self.kind.as_str(), self.external_id)
        }
    }
}

fn encode_path_segment(raw: &str) -> String {
    if raw.is_empty() {
        return "_".to_string();
    }
    urlencoding::encode(raw).replace('.', "%2E")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn global_ignores_external_id() {
        let id = Identity::new(UserKind::Global, "someone");
        assert_eq!(id, Identity::global());
        assert_eq!(id.to_string(), "global");
    }

    #[test]
    fn storage_dir_is_scoped_by_kind() {
        let root = Path::new("/cache");
        let sub = Identity::new(UserKind::SubAccount, "alice");
        let managed = Identity::new(UserKind::Managed, "alice");
        assert_eq!(sub.storage_dir(root), PathBuf::from("/cache/sub_account/alice"));
        assert_ne!(sub.storage_dir(root), managed.storage_dir(root));
        assert_eq!(Identity::global().storage_dir(root), PathBuf::from("/cache/global"));
    }

    #[test]
    fn storage_dir_cannot_escape_root() {
        let root = Path::new("/cache");
        let sneaky = Identity::new(UserKind::Owner, "../../etc");
        let dir = sneaky.storage_dir(root);
        assert!(dir.starts_with("/cache/owner"));
        assert_eq!(dir.components().count(), 4);

        let dots = Identity::new(UserKind::Owner, "..");
        assert_eq!(dots.storage_dir(root), PathBuf::from("/cache/owner/%2E%2E"));
    }

    #[test]
    fn kind_deserializes_snake_case() {
        let kind: UserKind = serde_json::from_str("\"sub_account\"").unwrap();
        assert_eq!(kind, UserKind::SubAccount);
        assert!(kind.needs_perspective_switch());
        assert!(!UserKind::Owner.needs_perspective_switch());
    }
}
