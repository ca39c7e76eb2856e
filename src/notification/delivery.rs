use std::sync::Arc;
use std::time::Duration;

use crate::errors::NotifyError;
use crate::metrics::DeliveryMetrics;
use crate::models::notification::{NewNotification, Notification};
use crate::realtime::events::ServerEvent;
use crate::realtime::registry::{ConnectionRegistry, DeliveryError};
use crate::store::NotificationStore;

use super::unread::{SyncOutcome, UnreadSync};

/// What happened to the live push for one delivery. Every variant means the
/// notification is persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    /// Queued on the recipient's live session.
    Delivered,
    /// Recipient offline; picked up on the next list/connect.
    Deferred,
    /// Recipient was bound but the push failed; treated like `Deferred`.
    Failed(DeliveryError),
}

impl PushOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            PushOutcome::Delivered => "pushed",
            PushOutcome::Deferred => "deferred",
            PushOutcome::Failed(_) => "failed",
        }
    }

    pub fn was_pushed(&self) -> bool {
        matches!(self, PushOutcome::Delivered)
    }
}

#[derive(Debug, Clone)]
pub struct DeliveryReceipt {
    pub notification: Notification,
    pub push: PushOutcome,
    pub unread: SyncOutcome,
}

/// Persist, then push if the recipient is online, then sync the badge.
///
/// Persistence is the only caller-visible failure. Once `create` succeeds the
/// delivery has succeeded, whatever happens to the push.
#[derive(Clone)]
pub struct DeliveryEngine {
    store: Arc<dyn NotificationStore>,
    registry: ConnectionRegistry,
    unread: UnreadSync,
    push_timeout: Duration,
    metrics: Arc<DeliveryMetrics>,
}

impl DeliveryEngine {
    pub fn new(
        store: Arc<dyn NotificationStore>,
        registry: ConnectionRegistry,
        unread: UnreadSync,
        push_timeout: Duration,
        metrics: Arc<DeliveryMetrics>,
    ) -> Self {
        Self {
            store,
            registry,
            unread,
            push_timeout,
            metrics,
        }
    }

    pub async fn deliver(&self, new: NewNotification) -> Result<DeliveryReceipt, NotifyError> {
        let recipient = new.recipient_id.clone();
        let notification = match self.store.create(new).await {
            Ok(n) => n,
            Err(e) => {
                self.metrics.record_persist_error();
                match &e {
                    NotifyError::Validation(reason) => {
                        tracing::debug!(recipient = %recipient, "deliver: rejected payload: {}", reason)
                    }
                    _ => tracing::error!(recipient = %recipient, "deliver: persist failed: {}", e),
                }
                return Err(e);
            }
        };

        let event = ServerEvent::NewNotification(notification.view());
        let push = match self
            .registry
            .push(&notification.recipient_id, event, self.push_timeout)
            .await
        {
            Ok(()) => PushOutcome::Delivered,
            Err(DeliveryError::Offline) => PushOutcome::Deferred,
            Err(e) => {
                tracing::warn!(
                    recipient = %notification.recipient_id,
                    notification = %notification.id,
                    error = %e,
                    "deliver: live push failed, left for next pull"
                );
                PushOutcome::Failed(e)
            }
        };
        self.metrics.record_push(&push);

        let unread = self.unread.sync(&notification.recipient_id).await;

        tracing::debug!(
            recipient = %notification.recipient_id,
            notification = %notification.id,
            kind = %notification.kind,
            push = push.label(),
            "deliver: stored"
        );

        Ok(DeliveryReceipt {
            notification,
            push,
            unread,
        })
    }
}
