use std::sync::Arc;
use std::time::Duration;

use crate::models::notification::UserId;
use crate::realtime::events::ServerEvent;
use crate::realtime::registry::{ConnectionRegistry, DeliveryError};
use crate::store::NotificationStore;

/// Result of one unread-badge sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    Pushed { count: i64 },
    /// No live session; the client pulls the count on its next connect.
    Offline,
    PushFailed(DeliveryError),
    /// Count query failed; nothing was pushed.
    StoreFailed,
}

/// Recomputes the unread count from the store and pushes it to the owner's
/// live session. The count is never cached or adjusted in place.
#[derive(Clone)]
pub struct UnreadSync {
    store: Arc<dyn NotificationStore>,
    registry: ConnectionRegistry,
    push_timeout: Duration,
}

impl UnreadSync {
    pub fn new(
        store: Arc<dyn NotificationStore>,
        registry: ConnectionRegistry,
        push_timeout: Duration,
    ) -> Self {
        Self {
            store,
            registry,
            push_timeout,
        }
    }

    pub async fn sync(&self, recipient: &UserId) -> SyncOutcome {
        if !self.registry.is_online(recipient) {
            return SyncOutcome::Offline;
        }

        let count = match self.store.count_unread(recipient).await {
            Ok(count) => count,
            Err(e) => {
                tracing::warn!(recipient = %recipient, "unread sync: count failed: {}", e);
                return SyncOutcome::StoreFailed;
            }
        };

        match self
            .registry
            .push(recipient, ServerEvent::UnreadCount { count }, self.push_timeout)
            .await
        {
            Ok(()) => SyncOutcome::Pushed { count },
            // Session went away between the check and the push.
            Err(DeliveryError::Offline) => SyncOutcome::Offline,
            Err(e) => {
                tracing::warn!(recipient = %recipient, error = %e, "unread sync: push failed");
                SyncOutcome::PushFailed(e)
            }
        }
    }
}
