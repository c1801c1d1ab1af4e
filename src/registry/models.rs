//! Domain records for the registry
//!
//! Plain immutable data records; persistence shape lives in [`store`] and
//! wire shape in [`projection`]. None of these types know how to save or
//! serialize themselves beyond derived serde.
//!
//! [`store`]: crate::registry::store
//! [`projection`]: crate::registry::projection

use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use indexmap::IndexSet;
use regex::Regex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::{MODULE_NAME_MAX_LEN, MODULE_NAME_MIN_LEN};
use crate::registry::error::RegistryError;

/// Privilege tier of a user.
///
/// Elevated ranks (trusted, admin) self-verify their own releases, moderate
/// others' pending releases, and see hidden modules.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Rank {
    #[default]
    Default,
    Trusted,
    Admin,
}

impl Rank {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Default => "default",
            Self::Trusted => "trusted",
            Self::Admin => "admin",
        }
    }

    pub fn parse(text: &str) -> Result<Self, RegistryError> {
        match text {
            "default" => Ok(Self::Default),
            "trusted" => Ok(Self::Trusted),
            "admin" => Ok(Self::Admin),
            other => Err(RegistryError::InvalidParameter(format!(
                "unknown rank: {other}"
            ))),
        }
    }

    /// Trusted and admin ranks hold moderation privileges.
    pub fn is_elevated(&self) -> bool {
        !matches!(self, Self::Default)
    }
}

/// Opaque caller identity supplied by the external auth/session component.
///
/// Absence of a `Caller` means the request is anonymous.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caller {
    pub id: Uuid,
    pub name: String,
    pub rank: Rank,
    pub email_verified: bool,
}

impl Caller {
    pub fn is_elevated(&self) -> bool {
        self.rank.is_elevated()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    /// Opaque hash produced by the external auth component.
    pub password_hash: String,
    pub rank: Rank,
    pub email_verified: bool,
    pub verification_token: Option<String>,
    pub reset_token: Option<String>,
    pub image: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    pub fn caller(&self) -> Caller {
        Caller {
            id: self.id,
            name: self.name.clone(),
            rank: self.rank,
            email_verified: self.email_verified,
        }
    }
}

/// A publishable unit with an owner, metadata and a history of releases.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Module {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub name: String,
    pub summary: Option<String>,
    pub description: Option<String>,
    pub image: Option<String>,
    pub downloads: i64,
    /// Soft-hidden modules stay in the store but are visible only to the
    /// owner and elevated callers.
    pub hidden: bool,
    pub tags: IndexSet<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Module {
    /// Whether `caller` may see this module at all.
    pub fn visible_to(&self, caller: Option<&Caller>) -> bool {
        if !self.hidden {
            return true;
        }
        match caller {
            Some(c) => c.id == self.owner_id || c.is_elevated(),
            None => false,
        }
    }
}

/// One versioned artifact of a module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Release {
    pub id: Uuid,
    pub module_id: Uuid,
    /// Unique within the module by exact string comparison, so "1.0" and
    /// "1.0.0" are distinct releases.
    pub release_version: String,
    /// Runtime version this release targets; gates compatibility by major
    /// component only.
    pub mod_version: String,
    /// Game versions this release declares support for; matched exactly.
    pub game_versions: IndexSet<String>,
    pub changelog: Option<String>,
    pub downloads: i64,
    pub verified: bool,
    pub verified_by: Option<Uuid>,
    pub verified_at: Option<DateTime<Utc>>,
    /// Handle of the pending moderation announcement, kept so it can be
    /// retracted once the release is approved, rejected or deleted.
    pub announcement_handle: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A notification enqueued for a user by the verification workflow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub id: Uuid,
    pub user_id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub read: bool,
    pub created_at: DateTime<Utc>,
}

/// Input for minting a user record.
#[derive(Debug, Clone, Deserialize)]
pub struct NewUser {
    pub name: String,
    pub email: String,
    pub password_hash: String,
    #[serde(default)]
    pub rank: Rank,
    #[serde(default)]
    pub email_verified: bool,
}

/// Input for creating a module.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewModule {
    pub name: String,
    pub summary: Option<String>,
    pub description: Option<String>,
    pub image: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// Input for publishing a release.
#[derive(Debug, Clone, Deserialize)]
pub struct NewRelease {
    pub release_version: String,
    pub mod_version: String,
    pub game_versions: Vec<String>,
    pub changelog: Option<String>,
}

static MODULE_NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_]+$").expect("valid module name regex"));

/// Validate a module name: 3-64 characters, alphanumeric and underscore.
pub fn validate_module_name(name: &str) -> Result<(), RegistryError> {
    if name.len() < MODULE_NAME_MIN_LEN || name.len() > MODULE_NAME_MAX_LEN {
        return Err(RegistryError::InvalidParameter(format!(
            "module name must be {MODULE_NAME_MIN_LEN}-{MODULE_NAME_MAX_LEN} characters"
        )));
    }
    if !MODULE_NAME_RE.is_match(name) {
        return Err(RegistryError::InvalidParameter(
            "module name may only contain letters, digits and underscores".to_string(),
        ));
    }
    Ok(())
}


#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn caller(id: Uuid, rank: Rank) -> Caller {
        Caller {
            id,
            name: "someone".to_string(),
            rank,
            email_verified: true,
        }
    }

    #[rstest]
    #[case("abc")]
    #[case("my_module_2")]
    #[case("ABC123")]
    fn module_name_accepts_valid_names(#[case] name: &str) {
        assert!(validate_module_name(name).is_ok());
    }

    #[rstest]
    #[case("ab")] // too short
    #[case("")]
    #[case("my module")] // space
    #[case("my-module")] // dash
    #[case("módulo")] // non-ascii
    fn module_name_rejects_invalid_names(#[case] name: &str) {
        assert!(validate_module_name(name).is_err());
    }

    #[test]
    fn module_name_rejects_overlong_names() {
        let name = "a".repeat(MODULE_NAME_MAX_LEN + 1);
        assert!(validate_module_name(&name).is_err());
        assert!(validate_module_name(&"a".repeat(MODULE_NAME_MAX_LEN)).is_ok());
    }

    #[test]
    fn hidden_module_is_visible_to_owner_and_elevated_only() {
        let owner_id = Uuid::new_v4();
        let module = Module {
            id: Uuid::new_v4(),
            owner_id,
            name: "Hidden".to_string(),
            summary: None,
            description: None,
            image: None,
            downloads: 0,
            hidden: true,
            tags: IndexSet::new(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };

        assert!(!module.visible_to(None));
        assert!(!module.visible_to(Some(&caller(Uuid::new_v4(), Rank::Default))));
        assert!(module.visible_to(Some(&caller(owner_id, Rank::Default))));
        assert!(module.visible_to(Some(&caller(Uuid::new_v4(), Rank::Trusted))));
        assert!(module.visible_to(Some(&caller(Uuid::new_v4(), Rank::Admin))));
    }

    #[test]
    fn rank_parse_round_trips() {
        for rank in [Rank::Default, Rank::Trusted, Rank::Admin] {
            assert_eq!(Rank::parse(rank.as_str()).unwrap(), rank);
        }
        assert!(Rank::parse("root").is_err());
    }
}
