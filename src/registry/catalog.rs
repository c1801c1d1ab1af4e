//! Per-module release catalog
//!
//! An in-memory, queryable view of one module's release history, built from
//! store rows in insertion order. The duplicate-version rule here mirrors
//! the store's `UNIQUE(module_id, release_version)` index: comparison is by
//! exact string, so "1.0" and "1.0.0" are distinct releases.

use uuid::Uuid;

use crate::registry::error::RegistryError;
use crate::registry::models::Release;
use crate::version::Version;

#[derive(Debug, Default)]
pub struct ReleaseCatalog {
    releases: Vec<Release>,
}

impl ReleaseCatalog {
    pub fn new(releases: Vec<Release>) -> Self {
        Self { releases }
    }

    /// Add a release, rejecting an exact-string duplicate of an existing
    /// `release_version`.
    pub fn add(&mut self, release: Release) -> Result<(), RegistryError> {
        if self
            .releases
            .iter()
            .any(|r| r.release_version == release.release_version)
        {
            return Err(RegistryError::DuplicateVersion {
                version: release.release_version,
            });
        }
        self.releases.push(release);
        Ok(())
    }

    pub fn find_by_id(&self, id: Uuid) -> Option<&Release> {
        self.releases.iter().find(|r| r.id == id)
    }

    /// Releases served to ordinary consumers.
    pub fn verified(&self) -> Vec<&Release> {
        self.releases.iter().filter(|r| r.verified).collect()
    }

    /// All releases sorted by parsed `release_version` descending.
    ///
    /// The sort is stable: ties keep insertion order, and releases whose
    /// version string does not parse sort last.
    pub fn sorted_by_version_desc(&self) -> Vec<&Release> {
        let mut sorted: Vec<&Release> = self.releases.iter().collect();
        sorted.sort_by(|a, b| {
            let a = Version::parse(&a.release_version).ok();
            let b = Version::parse(&b.release_version).ok();
            // None sorts after Some under reversed Option ordering
            b.cmp(&a)
        });
        sorted
    }

    pub fn releases(&self) -> &[Release] {
        &self.releases
    }

    pub fn is_empty(&self) -> bool {
        self.releases.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::models::test_support::new_release;

    fn catalog_with(versions: &[&str]) -> (ReleaseCatalog, Uuid) {
        let module_id = Uuid::new_v4();
        let mut catalog = ReleaseCatalog::default();
        for version in versions {
            catalog
                .add(new_release(module_id, version, "3.0.0", &["1.19.4"]))
                .unwrap();
        }
        (catalog, module_id)
    }

    #[test]
    fn add_rejects_exact_string_duplicates() {
        let (mut catalog, module_id) = catalog_with(&["1.0.0"]);

        let err = catalog
            .add(new_release(module_id, "1.0.0", "3.1.0", &["1.20.1"]))
            .unwrap_err();
        assert!(matches!(err, RegistryError::DuplicateVersion { .. }));

        // Semantically equal but textually different versions are distinct.
        catalog
            .add(new_release(module_id, "1.0", "3.0.0", &["1.19.4"]))
            .unwrap();
    }

    #[test]
    fn find_by_id_returns_the_matching_release() {
        let (mut catalog, module_id) = catalog_with(&["1.0.0"]);
        let release = new_release(module_id, "2.0.0", "3.0.0", &[]);
        let id = release.id;
        catalog.add(release).unwrap();

        assert_eq!(catalog.find_by_id(id).unwrap().release_version, "2.0.0");
        assert!(catalog.find_by_id(Uuid::new_v4()).is_none());
    }

    #[test]
    fn verified_filters_out_pending_releases() {
        let module_id = Uuid::new_v4();
        let mut catalog = ReleaseCatalog::default();
        let mut verified = new_release(module_id, "1.0.0", "3.0.0", &[]);
        verified.verified = true;
        catalog.add(verified).unwrap();
        catalog
            .add(new_release(module_id, "1.1.0", "3.0.0", &[]))
            .unwrap();

        let verified: Vec<_> = catalog
            .verified()
            .iter()
            .map(|r| r.release_version.clone())
            .collect();
        assert_eq!(verified, ["1.0.0"]);
    }

    #[test]
    fn sorted_by_version_desc_is_semantic_and_stable() {
        let (catalog, _) = catalog_with(&["1.2.0", "1.10.0", "0.9.9", "2.0.0"]);

        let versions: Vec<&str> = catalog
            .sorted_by_version_desc()
            .iter()
            .map(|r| r.release_version.as_str())
            .collect();
        // 1.10.0 > 1.2.0 numerically, not lexically
        assert_eq!(versions, ["2.0.0", "1.10.0", "1.2.0", "0.9.9"]);
    }

    #[test]
    fn sorted_by_version_desc_puts_unparseable_versions_last() {
        let (catalog, _) = catalog_with(&["garbage", "1.0.0", "2.0"]);

        let versions: Vec<&str> = catalog
            .sorted_by_version_desc()
            .iter()
            .map(|r| r.release_version.as_str())
            .collect();
        assert_eq!(versions[0], "1.0.0");
        // Unparseable entries keep their relative insertion order at the tail.
        assert_eq!(versions[1..], ["garbage", "2.0"]);
    }
}
