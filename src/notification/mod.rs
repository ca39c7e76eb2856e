//! The notification core.
//!
//! External collaborators (like/follow/upload handlers, moderation, admin
//! broadcasts) only talk to [`Notifier`]. It owns the delivery engine, the
//! fan-out broadcaster and the unread-count sync, and routes every mutating
//! operation through a fresh unread sync.

pub mod broadcast;
pub mod delivery;
pub mod unread;

use std::sync::Arc;
use std::time::Duration;

use uuid::Uuid;

use crate::errors::NotifyError;
use crate::metrics::DeliveryMetrics;
use crate::models::notification::{NewNotification, Notification, UserId};
use crate::realtime::registry::ConnectionRegistry;
use crate::store::{ListQuery, NotificationPage, NotificationStore};

use broadcast::{BroadcastTemplate, Broadcaster, DeliveryStats};
use delivery::{DeliveryEngine, DeliveryReceipt};
use unread::{SyncOutcome, UnreadSync};

#[derive(Debug, Clone)]
pub struct NotifierConfig {
    /// Upper bound on a single push attempt.
    pub push_timeout: Duration,
    /// Max deliveries in flight during a fan-out.
    pub broadcast_concurrency: usize,
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            push_timeout: Duration::from_secs(2),
            broadcast_concurrency: 16,
        }
    }
}

#[derive(Clone)]
pub struct Notifier {
    store: Arc<dyn NotificationStore>,
    registry: ConnectionRegistry,
    engine: DeliveryEngine,
    broadcaster: Broadcaster,
    unread: UnreadSync,
    metrics: Arc<DeliveryMetrics>,
}

impl Notifier {
    pub fn new(
        store: Arc<dyn NotificationStore>,
        registry: ConnectionRegistry,
        config: NotifierConfig,
        metrics: Arc<DeliveryMetrics>,
    ) -> Self {
        let unread = UnreadSync::new(store.clone(), registry.clone(), config.push_timeout);
        let engine = DeliveryEngine::new(
            store.clone(),
            registry.clone(),
            unread.clone(),
            config.push_timeout,
            metrics.clone(),
        );
        let broadcaster = Broadcaster::new(
            engine.clone(),
            config.broadcast_concurrency,
            metrics.clone(),
        );
        Self {
            store,
            registry,
            engine,
            broadcaster,
            unread,
            metrics,
        }
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    pub fn store(&self) -> &Arc<dyn NotificationStore> {
        &self.store
    }

    pub fn metrics(&self) -> &Arc<DeliveryMetrics> {
        &self.metrics
    }

    // ── Delivery ─────────────────────────────────────────────

    pub async fn deliver(&self, new: NewNotification) -> Result<DeliveryReceipt, NotifyError> {
        self.engine.deliver(new).await
    }

    pub async fn broadcast(&self, template: &BroadcastTemplate, recipients: &[UserId]) -> DeliveryStats {
        self.broadcaster.broadcast(template, recipients).await
    }

    pub async fn broadcast_with<F>(&self, recipients: &[UserId], build: F) -> DeliveryStats
    where
        F: Fn(&UserId) -> Result<NewNotification, NotifyError>,
    {
        self.broadcaster.broadcast_with(recipients, build).await
    }

    pub async fn sync_unread(&self, recipient: &UserId) -> SyncOutcome {
        self.unread.sync(recipient).await
    }

    // ── Recipient operations ─────────────────────────────────
    //
    // Each successful mutation is followed by an unread sync, even when it
    // changed nothing (e.g. re-reading a read notification).

    pub async fn mark_read(&self, recipient: &UserId, id: Uuid) -> Result<Notification, NotifyError> {
        let notification = self.store.mark_read(recipient, id).await?;
        self.unread.sync(recipient).await;
        Ok(notification)
    }

    pub async fn mark_all_read(&self, recipient: &UserId) -> Result<u64, NotifyError> {
        let count = self.store.mark_all_read(recipient).await?;
        self.unread.sync(recipient).await;
        Ok(count)
    }

    pub async fn delete(&self, recipient: &UserId, id: Uuid) -> Result<(), NotifyError> {
        self.store.delete(recipient, id).await?;
        self.unread.sync(recipient).await;
        Ok(())
    }

    pub async fn list(&self, recipient: &UserId, query: &ListQuery) -> Result<NotificationPage, NotifyError> {
        self.store.list(recipient, query).await
    }

    pub async fn unread_count(&self, recipient: &UserId) -> Result<i64, NotifyError> {
        self.store.count_unread(recipient).await
    }
}
