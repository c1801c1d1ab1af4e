//! Registry core
//!
//! Everything between the transport layer and the database: module and
//! release lifecycle, the verification workflow, release matching and the
//! module query engine.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//! │    Query    │────▶│    Store    │◀────│   Matcher   │
//! │  (search)   │     │  (sqlite)   │     │ (resolve)   │
//! └─────────────┘     └─────────────┘     └─────────────┘
//!                            ▲
//!                            │
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//! │  Artifacts  │◀────│  Registry   │────▶│  Workflow   │
//! │ (zip blobs) │     │  (service)  │     │ (moderate)  │
//! └─────────────┘     └─────────────┘     └─────────────┘
//! ```
//!
//! # Modules
//!
//! - [`store`]: SQLite persistence with constraint-backed invariants
//! - [`catalog`]: per-module release view
//! - [`matcher`]: release selection for metadata and download requests
//! - [`workflow`]: verification state machine and side-effect seams
//! - [`query`]: module search, visibility and pagination
//! - [`projection`]: public wire shapes
//! - [`artifact`]: artifact storage and metadata.json rewriting
//! - [`cache`]: explicit TTL cache for derived lists
//! - [`collab`]: default moderation/notification collaborators
//! - [`error`]: error taxonomy
//! - [`models`]: domain records

pub mod artifact;
pub mod cache;
pub mod catalog;
pub mod collab;
pub mod error;
pub mod matcher;
pub mod models;
pub mod projection;
pub mod query;
pub mod store;
pub mod workflow;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::{self, MAX_TAGS, RegistryConfig};
use crate::registry::artifact::{ArtifactStore, CanonicalMetadata, LocalArtifactStore};
use crate::registry::cache::TtlCache;
use crate::registry::collab::{LogModerationChannel, StoreNotifier};
use crate::registry::error::RegistryError;
use crate::registry::models::{
    Caller, Module, NewModule, NewRelease, NewUser, Notification, Rank, Release, User,
    validate_module_name,
};
use crate::registry::projection::{ModuleProjection, project_module, sees_private};
use crate::registry::query::{ModulePage, ModuleQuery};
use crate::registry::store::{Store, StoreStats};
use crate::registry::workflow::{ModerationChannel, Notifier, Workflow};

/// Fields of a module an owner may change after creation.
#[derive(Debug, Clone, Default)]
pub struct ModuleUpdate {
    pub summary: Option<Option<String>>,
    pub description: Option<Option<String>>,
    pub image: Option<Option<String>>,
    pub tags: Option<Vec<String>>,
    pub hidden: Option<bool>,
}

/// The registry service: composition root for all core operations.
pub struct Registry {
    store: Arc<Store>,
    artifacts: Arc<dyn ArtifactStore>,
    workflow: Workflow,
    tags_cache: TtlCache<Vec<String>>,
    mod_versions_cache: TtlCache<Vec<String>>,
}

impl Registry {
    pub fn new(
        store: Arc<Store>,
        artifacts: Arc<dyn ArtifactStore>,
        moderation: Arc<dyn ModerationChannel>,
        notifier: Arc<dyn Notifier>,
        config: &RegistryConfig,
    ) -> Self {
        Self {
            workflow: Workflow::new(store.clone(), moderation, notifier),
            tags_cache: TtlCache::new(Duration::from_millis(config.cache.tags_ttl)),
            mod_versions_cache: TtlCache::new(Duration::from_millis(
                config.cache.mod_versions_ttl,
            )),
            store,
            artifacts,
        }
    }

    /// Registry over the local data directory with the default
    /// collaborators; what the admin CLI runs against.
    pub fn local(config: &RegistryConfig) -> Result<Self, RegistryError> {
        std::fs::create_dir_all(config::data_dir())
            .map_err(|e| RegistryError::Invariant(format!("cannot create data dir: {e}")))?;
        let store = Arc::new(Store::new(&config::db_path())?);
        let artifacts = Arc::new(LocalArtifactStore::new(config::artifacts_dir()));
        let notifier = Arc::new(StoreNotifier::new(store.clone()));
        Ok(Self::new(
            store,
            artifacts,
            Arc::new(LogModerationChannel),
            notifier,
            config,
        ))
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    // =========================================================================
    // Users
    // =========================================================================

    /// Mint a user record. Credential handling itself belongs to the
    /// external auth component; the hash is stored opaque.
    pub fn create_user(&self, new: NewUser) -> Result<User, RegistryError> {
        if new.name.trim().is_empty() || new.email.trim().is_empty() {
            return Err(RegistryError::InvalidParameter(
                "user name and email are required".to_string(),
            ));
        }
        let now = Utc::now();
        let user = User {
            id: Uuid::new_v4(),
            name: new.name,
            email: new.email,
            password_hash: new.password_hash,
            rank: new.rank,
            email_verified: new.email_verified,
            verification_token: None,
            reset_token: None,
            image: None,
            created_at: now,
            updated_at: now,
        };
        self.store.insert_user(&user)?;
        info!(user = %user.name, rank = user.rank.as_str(), "user created");
        Ok(user)
    }

    /// Toggle another user's trusted rank.
    ///
    /// Any elevated caller may promote a default-rank user; demotion and any
    /// change touching an admin require admin rank.
    pub fn set_user_trusted(
        &self,
        caller: Option<&Caller>,
        user_name: &str,
        trusted: bool,
    ) -> Result<User, RegistryError> {
        let caller = caller.ok_or(RegistryError::Unauthenticated)?;
        if !caller.is_elevated() {
            return Err(RegistryError::Forbidden);
        }
        let user = self
            .store
            .user_by_name(user_name)?
            .ok_or(RegistryError::NotFound("user not found"))?;
        if user.rank == Rank::Admin {
            return Err(RegistryError::Forbidden);
        }

        let new_rank = if trusted {
            if user.rank != Rank::Default {
                return Err(RegistryError::Conflict("user is already trusted".to_string()));
            }
            Rank::Trusted
        } else {
            if caller.rank != Rank::Admin {
                return Err(RegistryError::Forbidden);
            }
            Rank::Default
        };

        self.store.set_user_rank(user.id, new_rank)?;
        info!(user = %user.name, rank = new_rank.as_str(), by = %caller.name, "rank changed");
        self.store
            .user_by_id(user.id)?
            .ok_or_else(|| RegistryError::Invariant("user disappeared".to_string()))
    }

    // =========================================================================
    // Modules
    // =========================================================================

    pub fn create_module(
        &self,
        caller: Option<&Caller>,
        new: NewModule,
    ) -> Result<Module, RegistryError> {
        let caller = caller.ok_or(RegistryError::Unauthenticated)?;
        if !caller.email_verified {
            return Err(RegistryError::Forbidden);
        }
        validate_module_name(&new.name)?;
        if new.tags.len() > MAX_TAGS {
            return Err(RegistryError::InvalidParameter(format!(
                "a module may carry at most {MAX_TAGS} tags"
            )));
        }

        let now = Utc::now();
        let module = Module {
            id: Uuid::new_v4(),
            owner_id: caller.id,
            name: new.name,
            summary: new.summary,
            description: new.description,
            image: new.image,
            downloads: 0,
            hidden: false,
            tags: new.tags.into_iter().collect(),
            created_at: now,
            updated_at: now,
        };
        self.store.insert_module(&module)?;
        self.tags_cache.invalidate();
        info!(module = %module.name, owner = %caller.name, "module created");
        Ok(module)
    }

    /// Look a module up by name or id, as both appear in URLs.
    fn find_module(&self, ident: &str) -> Result<Module, RegistryError> {
        let module = match Uuid::parse_str(ident) {
            Ok(id) => self.store.module_by_id(id)?,
            Err(_) => self.store.module_by_name(ident)?,
        };
        module.ok_or(RegistryError::NotFound("module not found"))
    }

    /// Look a module up and enforce the hidden-visibility rule. A hidden
    /// module is indistinguishable from a missing one for outsiders.
    fn find_visible_module(
        &self,
        caller: Option<&Caller>,
        ident: &str,
    ) -> Result<Module, RegistryError> {
        let module = self.find_module(ident)?;
        if !module.visible_to(caller) {
            return Err(RegistryError::NotFound("module not found"));
        }
        Ok(module)
    }

    pub fn get_module(
        &self,
        caller: Option<&Caller>,
        ident: &str,
    ) -> Result<ModuleProjection, RegistryError> {
        let module = self.find_visible_module(caller, ident)?;
        self.project(&module, caller)
    }

    fn project(
        &self,
        module: &Module,
        caller: Option<&Caller>,
    ) -> Result<ModuleProjection, RegistryError> {
        let owner = self
            .store
            .user_by_id(module.owner_id)?
            .ok_or_else(|| RegistryError::Invariant("module has no owner".to_string()))?;
        let releases = self.store.releases_for_module(module.id)?;
        Ok(project_module(
            module,
            &owner.name,
            &releases,
            sees_private(module, caller),
        ))
    }

    pub fn update_module(
        &self,
        caller: Option<&Caller>,
        ident: &str,
        update: ModuleUpdate,
    ) -> Result<Module, RegistryError> {
        let caller = caller.ok_or(RegistryError::Unauthenticated)?;
        let mut module = self.find_module(ident)?;
        require_owner_or_elevated(caller, &module)?;

        if let Some(tags) = &update.tags
            && tags.len() > MAX_TAGS
        {
            return Err(RegistryError::InvalidParameter(format!(
                "a module may carry at most {MAX_TAGS} tags"
            )));
        }

        if let Some(summary) = update.summary {
            module.summary = summary;
        }
        if let Some(description) = update.description {
            module.description = description;
        }
        if let Some(image) = update.image {
            module.image = image;
        }
        if let Some(tags) = update.tags {
            module.tags = tags.into_iter().collect();
        }
        if let Some(hidden) = update.hidden {
            module.hidden = hidden;
        }

        self.store.update_module(&module)?;
        self.tags_cache.invalidate();
        Ok(module)
    }

    /// Delete a module, its releases and artifacts. Outstanding moderation
    /// announcements for pending releases are retracted best-effort.
    pub async fn delete_module(
        &self,
        caller: Option<&Caller>,
        ident: &str,
    ) -> Result<(), RegistryError> {
        let caller = caller.ok_or(RegistryError::Unauthenticated)?;
        let module = self.find_module(ident)?;
        require_owner_or_elevated(caller, &module)?;

        let releases = self.store.releases_for_module(module.id)?;
        self.workflow.retract_outstanding(&releases).await;
        for release in &releases {
            if let Err(e) = self.artifacts.delete(&module.name, release.id).await {
                warn!(release_id = %release.id, "artifact cleanup failed: {e}");
            }
        }

        self.store.delete_module(module.id)?;
        self.tags_cache.invalidate();
        info!(module = %module.name, by = %caller.name, "module deleted");
        Ok(())
    }

    // =========================================================================
    // Releases
    // =========================================================================

    /// Publish a release: validate, rewrite the artifact's metadata.json,
    /// store both, and enter the verification workflow.
    ///
    /// Elevated publishers are verified immediately; everyone else starts
    /// pending and a moderation announcement goes out.
    pub async fn publish_release(
        &self,
        caller: Option<&Caller>,
        module_ident: &str,
        new: NewRelease,
        artifact_bytes: &[u8],
    ) -> Result<Release, RegistryError> {
        let caller = caller.ok_or(RegistryError::Unauthenticated)?;
        let module = self.find_module(module_ident)?;
        require_owner_or_elevated(caller, &module)?;

        // All validation happens before any mutation.
        parse_version_field(&new.release_version, "release")?;
        parse_version_field(&new.mod_version, "mod")?;
        for game_version in &new.game_versions {
            parse_version_field(game_version, "game")?;
        }

        let owner = self
            .store
            .user_by_id(module.owner_id)?
            .ok_or_else(|| RegistryError::Invariant("module has no owner".to_string()))?;

        let verified = caller.is_elevated();
        let now = Utc::now();
        let release = Release {
            id: Uuid::new_v4(),
            module_id: module.id,
            release_version: new.release_version,
            mod_version: new.mod_version,
            game_versions: new.game_versions.into_iter().collect(),
            changelog: new.changelog,
            downloads: 0,
            verified,
            verified_by: verified.then_some(caller.id),
            verified_at: verified.then_some(now),
            announcement_handle: None,
            created_at: now,
            updated_at: now,
        };

        let rewritten = artifact::rewrite_metadata(
            artifact_bytes,
            &CanonicalMetadata {
                name: module.name.clone(),
                version: release.release_version.clone(),
                owner: owner.name.clone(),
                tags: module.tags.iter().cloned().collect(),
                image: module.image.clone(),
            },
        )?;

        self.store.insert_release(&release)?;
        if let Err(e) = self.artifacts.write(&module.name, release.id, &rewritten).await {
            // Keep row and artifact consistent: no artifact, no release.
            self.store.delete_release(release.id)?;
            return Err(e.into());
        }

        if verified {
            self.mod_versions_cache.invalidate();
        } else {
            self.workflow.announce_pending(&module, &release).await?;
        }

        info!(
            module = %module.name,
            version = %release.release_version,
            verified,
            "release published"
        );
        self.store
            .release_by_id(release.id)?
            .ok_or_else(|| RegistryError::Invariant("published release disappeared".to_string()))
    }

    pub async fn approve_release(
        &self,
        caller: Option<&Caller>,
        release_id: Uuid,
    ) -> Result<Release, RegistryError> {
        let caller = caller.ok_or(RegistryError::Unauthenticated)?;
        let release = self.workflow.approve(caller, release_id).await?;
        self.mod_versions_cache.invalidate();
        Ok(release)
    }

    pub async fn reject_release(
        &self,
        caller: Option<&Caller>,
        release_id: Uuid,
        reason: &str,
    ) -> Result<(), RegistryError> {
        let caller = caller.ok_or(RegistryError::Unauthenticated)?;
        let release = self
            .store
            .release_by_id(release_id)?
            .ok_or(RegistryError::NotFound("release not found"))?;
        let module = self
            .store
            .module_by_id(release.module_id)?
            .ok_or_else(|| RegistryError::Invariant("release has no module".to_string()))?;

        self.workflow.reject(caller, release_id, reason).await?;

        if let Err(e) = self.artifacts.delete(&module.name, release_id).await {
            warn!(release_id = %release_id, "artifact cleanup failed: {e}");
        }
        Ok(())
    }

    // =========================================================================
    // Download / metadata endpoints
    // =========================================================================

    /// Metadata-match endpoint: the rewritten `metadata.json` bytes of the
    /// best release for this mod version and game-version set.
    pub async fn match_metadata(
        &self,
        caller: Option<&Caller>,
        module_ident: &str,
        mod_version: &str,
        game_versions: &[String],
    ) -> Result<Vec<u8>, RegistryError> {
        let requested_mod = parse_version_field(mod_version, "mod")?;
        if game_versions.is_empty() {
            return Err(RegistryError::InvalidParameter(
                "at least one game version is required".to_string(),
            ));
        }
        let requested_game = game_versions
            .iter()
            .map(|v| parse_version_field(v, "game"))
            .collect::<Result<Vec<_>, _>>()?;

        let module = self.find_visible_module(caller, module_ident)?;
        let releases = self.store.releases_for_module(module.id)?;
        let release = matcher::match_release(&releases, requested_mod, &requested_game)
            .ok_or(RegistryError::NotFound("no matching release"))?;

        let bytes = self.artifacts.read(&module.name, release.id).await?;
        Ok(artifact::read_metadata(&bytes)?)
    }

    /// Bulk-download endpoint: zip bytes of the newest release compatible
    /// with the requested mod version, game versions ignored. Increments
    /// both download counters.
    pub async fn download_scripts(
        &self,
        caller: Option<&Caller>,
        module_ident: &str,
        mod_version: &str,
    ) -> Result<Vec<u8>, RegistryError> {
        let requested_mod = parse_version_field(mod_version, "mod")?;
        let module = self.find_visible_module(caller, module_ident)?;
        let releases = self.store.releases_for_module(module.id)?;
        let release = matcher::latest_compatible(&releases, requested_mod)
            .ok_or(RegistryError::NotFound("no matching release"))?;

        let bytes = self.artifacts.read(&module.name, release.id).await?;
        self.store.increment_module_downloads(module.id)?;
        self.store.increment_release_downloads(release.id)?;
        Ok(bytes)
    }

    // =========================================================================
    // Query
    // =========================================================================

    pub fn query_modules(
        &self,
        caller: Option<&Caller>,
        query: &ModuleQuery,
    ) -> Result<ModulePage, RegistryError> {
        let rows = self.store.modules_with_owner()?;
        query::run_query(rows, caller, query, |row| {
            let releases = self.store.releases_for_module(row.module.id)?;
            Ok(project_module(
                &row.module,
                &row.owner_name,
                &releases,
                sees_private(&row.module, caller),
            ))
        })
    }

    /// Distinct tags across all modules, via the TTL cache.
    pub fn tags(&self) -> Result<Vec<String>, RegistryError> {
        self.tags_cache.get_or_refresh(|| self.store.distinct_tags())
    }

    /// Distinct mod versions with at least one verified release.
    pub fn mod_versions(&self) -> Result<Vec<String>, RegistryError> {
        self.mod_versions_cache
            .get_or_refresh(|| self.store.distinct_mod_versions())
    }

    // =========================================================================
    // Notifications
    // =========================================================================

    pub fn notifications(
        &self,
        caller: Option<&Caller>,
    ) -> Result<Vec<Notification>, RegistryError> {
        let caller = caller.ok_or(RegistryError::Unauthenticated)?;
        self.store.notifications_for_user(caller.id)
    }

    pub fn mark_notification_read(
        &self,
        caller: Option<&Caller>,
        id: Uuid,
    ) -> Result<(), RegistryError> {
        let caller = caller.ok_or(RegistryError::Unauthenticated)?;
        if !self.store.mark_notification_read(caller.id, id)? {
            return Err(RegistryError::NotFound("notification not found"));
        }
        Ok(())
    }

    pub fn stats(&self) -> Result<StoreStats, RegistryError> {
        self.store.stats()
    }
}

fn require_owner_or_elevated(caller: &Caller, module: &Module) -> Result<(), RegistryError> {
    if caller.id == module.owner_id || caller.is_elevated() {
        Ok(())
    } else {
        Err(RegistryError::Forbidden)
    }
}

fn parse_version_field(
    text: &str,
    field: &'static str,
) -> Result<crate::version::Version, RegistryError> {
    crate::version::Version::parse(text)
        .map_err(|source| RegistryError::InvalidVersion { field, source })
}
