//! Public wire projections
//!
//! Free-standing projection functions that turn domain records into the
//! shapes returned to clients, keeping persistence shape and wire shape
//! decoupled. Timestamps are epoch milliseconds on the wire.

use serde::Serialize;
use uuid::Uuid;

use crate::registry::catalog::ReleaseCatalog;
use crate::registry::models::{Caller, Module, Release};

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ReleaseProjection {
    pub id: Uuid,
    pub release_version: String,
    pub mod_version: String,
    pub game_versions: Vec<String>,
    pub changelog: Option<String>,
    pub downloads: i64,
    pub verified: bool,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ModuleProjection {
    pub id: Uuid,
    pub owner: String,
    pub name: String,
    pub summary: Option<String>,
    pub description: Option<String>,
    pub image: Option<String>,
    pub downloads: i64,
    /// Surfaced only to the owner and elevated callers.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hidden: Option<bool>,
    pub tags: Vec<String>,
    pub releases: Vec<ReleaseProjection>,
    pub created_at: i64,
    pub updated_at: i64,
}

pub fn project_release(release: &Release) -> ReleaseProjection {
    ReleaseProjection {
        id: release.id,
        release_version: release.release_version.clone(),
        mod_version: release.mod_version.clone(),
        game_versions: release.game_versions.iter().cloned().collect(),
        changelog: release.changelog.clone(),
        downloads: release.downloads,
        verified: release.verified,
        created_at: release.created_at.timestamp_millis(),
        updated_at: release.updated_at.timestamp_millis(),
    }
}

/// Whether `caller` may see a module's private detail: its pending releases
/// and its hidden flag.
pub fn sees_private(module: &Module, caller: Option<&Caller>) -> bool {
    match caller {
        Some(c) => c.id == module.owner_id || c.is_elevated(),
        None => false,
    }
}

/// Project a module with its releases.
///
/// Releases come out newest-first; pending ones are included only when
/// `include_private` is set (owner or elevated viewer).
pub fn project_module(
    module: &Module,
    owner_name: &str,
    releases: &[Release],
    include_private: bool,
) -> ModuleProjection {
    let catalog = ReleaseCatalog::new(releases.to_vec());
    let releases: Vec<ReleaseProjection> = catalog
        .sorted_by_version_desc()
        .into_iter()
        .filter(|r| include_private || r.verified)
        .map(project_release)
        .collect();

    ModuleProjection {
        id: module.id,
        owner: owner_name.to_string(),
        name: module.name.clone(),
        summary: module.summary.clone(),
        description: module.description.clone(),
        image: module.image.clone(),
        downloads: module.downloads,
        hidden: include_private.then_some(module.hidden),
        tags: module.tags.iter().cloned().collect(),
        releases,
        created_at: module.created_at.timestamp_millis(),
        updated_at: module.updated_at.timestamp_millis(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::models::test_support::{new_module, new_release, new_user};
    use crate::registry::models::Rank;

    #[test]
    fn public_projection_filters_pending_releases_and_hides_the_flag() {
        let owner = new_user("alice", Rank::Default);
        let module = new_module(owner.id, "Foo");
        let mut verified = new_release(module.id, "1.0.0", "3.0.0", &["1.19.4"]);
        verified.verified = true;
        let pending = new_release(module.id, "1.1.0", "3.0.0", &["1.20.1"]);
        let releases = vec![verified, pending];

        let public = project_module(&module, &owner.name, &releases, false);
        assert_eq!(public.hidden, None);
        assert_eq!(public.releases.len(), 1);
        assert_eq!(public.releases[0].release_version, "1.0.0");

        let private = project_module(&module, &owner.name, &releases, true);
        assert_eq!(private.hidden, Some(false));
        assert_eq!(private.releases.len(), 2);
        // Newest release version first.
        assert_eq!(private.releases[0].release_version, "1.1.0");
    }

    #[test]
    fn timestamps_project_as_epoch_milliseconds() {
        let owner = new_user("alice", Rank::Default);
        let module = new_module(owner.id, "Foo");
        let projected = project_module(&module, &owner.name, &[], false);
        assert_eq!(projected.created_at, module.created_at.timestamp_millis());

        let json = serde_json::to_value(&projected).unwrap();
        assert!(json["created_at"].is_i64());
        // hidden is omitted entirely from the public wire shape.
        assert!(json.get("hidden").is_none());
    }

    #[test]
    fn sees_private_requires_owner_or_elevation() {
        let owner = new_user("alice", Rank::Default);
        let module = new_module(owner.id, "Foo");

        assert!(!sees_private(&module, None));
        assert!(sees_private(&module, Some(&owner.caller())));
        assert!(!sees_private(
            &module,
            Some(&new_user("bob", Rank::Default).caller())
        ));
        assert!(sees_private(
            &module,
            Some(&new_user("mod", Rank::Trusted).caller())
        ));
    }
}
