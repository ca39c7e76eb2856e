use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::NotifyError;
use crate::metrics::DeliveryMetrics;
use crate::models::notification::{NewNotification, NotificationData, NotificationKind, UserId};

use super::delivery::DeliveryEngine;

/// One logical event to be personalized per recipient.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BroadcastTemplate {
    pub sender_id: UserId,
    #[serde(rename = "type", default = "default_kind")]
    pub kind: NotificationKind,
    pub title: String,
    pub message: String,
    #[serde(default)]
    pub data: NotificationData,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

fn default_kind() -> NotificationKind {
    NotificationKind::Broadcast
}

impl BroadcastTemplate {
    /// A platform broadcast with a fresh campaign id in `data.broadcast_id`.
    pub fn new(
        sender_id: impl Into<UserId>,
        title: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            sender_id: sender_id.into(),
            kind: NotificationKind::Broadcast,
            title: title.into(),
            message: message.into(),
            data: NotificationData {
                broadcast_id: Some(Uuid::new_v4()),
                ..Default::default()
            },
            expires_at: None,
        }
    }

    pub fn expiring_at(mut self, at: DateTime<Utc>) -> Self {
        self.expires_at = Some(at);
        self
    }

    /// Expire `hours` after `now`. Out-of-range offsets are a validation error.
    pub fn expiring_in_hours(self, now: DateTime<Utc>, hours: i64) -> Result<Self, NotifyError> {
        let at = Duration::try_hours(hours)
            .and_then(|offset| now.checked_add_signed(offset))
            .ok_or_else(|| NotifyError::Validation(format!("expiry of {} hours is out of range", hours)))?;
        Ok(self.expiring_at(at))
    }

    /// Templates built from untrusted input may lack a campaign id.
    pub fn ensure_broadcast_id(&mut self) -> Uuid {
        *self.data.broadcast_id.get_or_insert_with(Uuid::new_v4)
    }

    pub fn for_recipient(&self, recipient: &UserId) -> NewNotification {
        NewNotification {
            recipient_id: recipient.clone(),
            sender_id: self.sender_id.clone(),
            kind: self.kind,
            title: self.title.clone(),
            message: self.message.clone(),
            data: self.data.clone(),
            expires_at: self.expires_at,
        }
    }
}

/// Per-batch counters. `failed > 0` is a partial failure, not an error:
/// every other recipient's delivery stands.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryStats {
    pub total_recipients: usize,
    /// Persisted.
    pub succeeded: usize,
    pub failed: usize,
    /// Of `succeeded`: pushed to a live session.
    pub pushed: usize,
    /// Of `succeeded`: waiting for the next pull.
    pub deferred: usize,
}

impl DeliveryStats {
    pub fn all_succeeded(&self) -> bool {
        self.failed == 0
    }
}

/// Fans one event out through independent per-recipient deliveries.
#[derive(Clone)]
pub struct Broadcaster {
    engine: DeliveryEngine,
    concurrency: usize,
    metrics: Arc<DeliveryMetrics>,
}

impl Broadcaster {
    pub fn new(engine: DeliveryEngine, concurrency: usize, metrics: Arc<DeliveryMetrics>) -> Self {
        Self {
            engine,
            concurrency: concurrency.max(1),
            metrics,
        }
    }

    pub async fn broadcast(&self, template: &BroadcastTemplate, recipients: &[UserId]) -> DeliveryStats {
        self.broadcast_with(recipients, |recipient| Ok(template.for_recipient(recipient)))
            .await
    }

    /// Like `broadcast`, but each payload is built by `build`. A build error
    /// counts as a failure for that recipient only.
    pub async fn broadcast_with<F>(&self, recipients: &[UserId], build: F) -> DeliveryStats
    where
        F: Fn(&UserId) -> Result<NewNotification, NotifyError>,
    {
        let engine = &self.engine;
        let build = &build;

        let deliveries: Vec<_> = recipients
            .iter()
            .map(|recipient| async move {
                let result = match build(recipient) {
                    Ok(new) => engine.deliver(new).await,
                    Err(e) => Err(e),
                };
                (recipient, result)
            })
            .collect();

        let outcomes: Vec<_> = stream::iter(deliveries)
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        let mut stats = DeliveryStats {
            total_recipients: recipients.len(),
            ..Default::default()
        };
        for (recipient, result) in outcomes {
            match result {
                Ok(receipt) => {
                    stats.succeeded += 1;
                    if receipt.push.was_pushed() {
                        stats.pushed += 1;
                    } else {
                        stats.deferred += 1;
                    }
                }
                Err(e) => {
                    stats.failed += 1;
                    tracing::warn!(recipient = %recipient, "broadcast: delivery failed: {}", e);
                }
            }
        }

        self.metrics.record_broadcast(&stats);
        tracing::info!(
            total = stats.total_recipients,
            succeeded = stats.succeeded,
            failed = stats.failed,
            pushed = stats.pushed,
            "broadcast complete"
        );
        stats
    }
}
