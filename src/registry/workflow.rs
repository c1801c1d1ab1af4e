//! Verification workflow
//!
//! State machine for a release's path from pending to verified (or gone).
//! Externally observable states are `PENDING` and `VERIFIED`; rejection
//! deletes the release, so there is no rejected tombstone.
//!
//! Transitions mutate the store through conditional updates, so two
//! moderators racing on the same release cannot both succeed: the loser's
//! update matches zero rows and surfaces as a conflict. Side effects
//! (owner notifications, announcement retraction, public announcements) are
//! best-effort — a delivery failure is logged and never fails the
//! transition that triggered it.

use std::sync::Arc;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use tracing::warn;
use uuid::Uuid;

use crate::registry::error::{RegistryError, SideEffectError};
use crate::registry::models::{Caller, Module, Release};
use crate::registry::store::Store;

/// Side channel for human-moderation announcements.
///
/// `announce` returns an opaque handle the workflow stores on the release so
/// the message can be retracted once moderation concludes.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ModerationChannel: Send + Sync {
    async fn announce(&self, message: &str) -> Result<String, SideEffectError>;
    async fn retract(&self, handle: &str) -> Result<(), SideEffectError>;
}

/// Fire-and-forget notification delivery.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn enqueue(
        &self,
        user_id: Uuid,
        title: &str,
        description: Option<String>,
    ) -> Result<(), SideEffectError>;
}

pub struct Workflow {
    store: Arc<Store>,
    moderation: Arc<dyn ModerationChannel>,
    notifier: Arc<dyn Notifier>,
}

impl Workflow {
    pub fn new(
        store: Arc<Store>,
        moderation: Arc<dyn ModerationChannel>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            store,
            moderation,
            notifier,
        }
    }

    /// Post the moderation announcement for a freshly published pending
    /// release and store the returned handle. Announcement failure leaves
    /// the handle empty; the publish itself already succeeded.
    pub async fn announce_pending(
        &self,
        module: &Module,
        release: &Release,
    ) -> Result<(), RegistryError> {
        let message = format!(
            "Release {} of module {} is awaiting verification",
            release.release_version, module.name
        );
        match self.moderation.announce(&message).await {
            Ok(handle) => self.store.set_announcement_handle(release.id, Some(&handle)),
            Err(e) => {
                warn!(release_id = %release.id, "moderation announcement failed: {e}");
                Ok(())
            }
        }
    }

    /// `PENDING -> VERIFIED`.
    ///
    /// Fails with [`RegistryError::Conflict`] when the release is already
    /// verified, including when a concurrent moderator won the race.
    pub async fn approve(
        &self,
        moderator: &Caller,
        release_id: Uuid,
    ) -> Result<Release, RegistryError> {
        if !moderator.is_elevated() {
            return Err(RegistryError::Forbidden);
        }

        let release = self
            .store
            .release_by_id(release_id)?
            .ok_or(RegistryError::NotFound("release not found"))?;
        let module = self
            .store
            .module_by_id(release.module_id)?
            .ok_or_else(|| RegistryError::Invariant("release has no module".to_string()))?;

        if !self.store.mark_verified(release_id, moderator.id)? {
            return Err(RegistryError::Conflict(
                "release is already verified".to_string(),
            ));
        }

        self.notify(
            module.owner_id,
            format!(
                "Release {} of {} was verified",
                release.release_version, module.name
            ),
            None,
        )
        .await;
        self.retract_announcement(&release).await;

        if !module.hidden {
            // Public channels reuse the moderation side channel; the handle
            // of a public announcement is not retained.
            if let Err(e) = self
                .moderation
                .announce(&format!(
                    "{} {} has been released",
                    module.name, release.release_version
                ))
                .await
            {
                warn!(release_id = %release_id, "release announcement failed: {e}");
            }
        }

        self.store
            .release_by_id(release_id)?
            .ok_or_else(|| RegistryError::Invariant("verified release disappeared".to_string()))
    }

    /// `PENDING -> deleted`.
    ///
    /// A non-empty reason is required; rejection without justification is
    /// disallowed. Conflicts if the release was verified in the meantime.
    pub async fn reject(
        &self,
        moderator: &Caller,
        release_id: Uuid,
        reason: &str,
    ) -> Result<Release, RegistryError> {
        if !moderator.is_elevated() {
            return Err(RegistryError::Forbidden);
        }
        if reason.trim().is_empty() {
            return Err(RegistryError::InvalidParameter(
                "a rejection reason is required".to_string(),
            ));
        }

        let release = self
            .store
            .release_by_id(release_id)?
            .ok_or(RegistryError::NotFound("release not found"))?;
        let module = self
            .store
            .module_by_id(release.module_id)?
            .ok_or_else(|| RegistryError::Invariant("release has no module".to_string()))?;

        if !self.store.delete_release_if_pending(release_id)? {
            return Err(RegistryError::Conflict(
                "release is already verified".to_string(),
            ));
        }

        self.notify(
            module.owner_id,
            format!(
                "Release {} of {} was rejected",
                release.release_version, module.name
            ),
            Some(reason.to_string()),
        )
        .await;
        self.retract_announcement(&release).await;

        Ok(release)
    }

    /// Retract outstanding moderation announcements for releases that are
    /// being deleted along with their module. Best-effort cleanup.
    pub async fn retract_outstanding(&self, releases: &[Release]) {
        for release in releases {
            self.retract_announcement(release).await;
        }
    }

    async fn notify(&self, user_id: Uuid, title: String, description: Option<String>) {
        if let Err(e) = self.notifier.enqueue(user_id, &title, description).await {
            warn!(%user_id, "notification delivery failed: {e}");
        }
    }

    async fn retract_announcement(&self, release: &Release) {
        let Some(handle) = release.announcement_handle.as_deref() else {
            return;
        };
        if let Err(e) = self.moderation.retract(handle).await {
            warn!(release_id = %release.id, handle, "announcement retraction failed: {e}");
            return;
        }
        if let Err(e) = self.store.set_announcement_handle(release.id, None) {
            warn!(release_id = %release.id, "failed to clear announcement handle: {e}");
        }
    }
}
