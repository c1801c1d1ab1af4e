//! Default collaborator implementations
//!
//! Production deployments plug a real chat integration and delivery queue
//! into the [`ModerationChannel`] and [`Notifier`] seams. These defaults
//! keep a single-node deployment (and the admin CLI) fully functional:
//! announcements go to the log and notifications go to the store.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tracing::info;
use uuid::Uuid;

use crate::registry::error::SideEffectError;
use crate::registry::models::Notification;
use crate::registry::store::Store;
use crate::registry::workflow::{ModerationChannel, Notifier};

/// Tracing-backed moderation channel with opaque uuid handles.
#[derive(Debug, Default)]
pub struct LogModerationChannel;

#[async_trait]
impl ModerationChannel for LogModerationChannel {
    async fn announce(&self, message: &str) -> Result<String, SideEffectError> {
        let handle = Uuid::new_v4().to_string();
        info!(handle, "moderation announcement: {message}");
        Ok(handle)
    }

    async fn retract(&self, handle: &str) -> Result<(), SideEffectError> {
        info!(handle, "moderation announcement retracted");
        Ok(())
    }
}

/// Notifier that persists [`Notification`] rows.
pub struct StoreNotifier {
    store: Arc<Store>,
}

impl StoreNotifier {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Notifier for StoreNotifier {
    async fn enqueue(
        &self,
        user_id: Uuid,
        title: &str,
        description: Option<String>,
    ) -> Result<(), SideEffectError> {
        let notification = Notification {
            id: Uuid::new_v4(),
            user_id,
            title: title.to_string(),
            description,
            read: false,
            created_at: Utc::now(),
        };
        self.store
            .insert_notification(&notification)
            .map_err(|e| SideEffectError::Delivery(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::models::test_support::new_user;
    use crate::registry::models::Rank;

    #[tokio::test]
    async fn store_notifier_persists_notifications() {
        let store = Arc::new(Store::in_memory().unwrap());
        let user = new_user("alice", Rank::Default);
        store.insert_user(&user).unwrap();

        let notifier = StoreNotifier::new(store.clone());
        notifier
            .enqueue(user.id, "Release verified", Some("details".to_string()))
            .await
            .unwrap();

        let notifications = store.notifications_for_user(user.id).unwrap();
        assert_eq!(notifications.len(), 1);
        assert_eq!(notifications[0].title, "Release verified");
        assert_eq!(notifications[0].description.as_deref(), Some("details"));
        assert!(!notifications[0].read);
    }

    #[tokio::test]
    async fn log_channel_hands_out_unique_handles() {
        let channel = LogModerationChannel;
        let a = channel.announce("first").await.unwrap();
        let b = channel.announce("second").await.unwrap();
        assert_ne!(a, b);
        channel.retract(&a).await.unwrap();
    }
}
