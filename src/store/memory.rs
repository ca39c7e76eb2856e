use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{ListQuery, NotificationPage, NotificationStore};
use crate::errors::NotifyError;
use crate::models::notification::{NewNotification, Notification, UserId};

/// In-process store keyed by recipient.
///
/// `created_at` is kept strictly increasing across the store so that feed
/// order always matches creation order, even for inserts within the same
/// clock tick.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

#[derive(Default)]
struct Inner {
    by_recipient: HashMap<UserId, Vec<Notification>>,
    last_created_at: Option<DateTime<Utc>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every stored notification (all recipients).
    pub async fn all(&self) -> Vec<Notification> {
        let inner = self.inner.read().await;
        inner.by_recipient.values().flatten().cloned().collect()
    }
}

impl Inner {
    fn next_timestamp(&mut self) -> DateTime<Utc> {
        let now = Utc::now();
        let ts = match self.last_created_at {
            Some(last) if now <= last => last + Duration::microseconds(1),
            _ => now,
        };
        self.last_created_at = Some(ts);
        ts
    }

    fn find_mut(&mut self, recipient: &UserId, id: Uuid) -> Option<&mut Notification> {
        self.by_recipient
            .get_mut(recipient)?
            .iter_mut()
            .find(|n| n.id == id)
    }
}

#[async_trait]
impl NotificationStore for MemoryStore {
    async fn create(&self, new: NewNotification) -> Result<Notification, NotifyError> {
        new.validate()?;
        let mut inner = self.inner.write().await;
        let created_at = inner.next_timestamp();
        let notification = Notification::from_new(new, created_at);
        inner
            .by_recipient
            .entry(notification.recipient_id.clone())
            .or_default()
            .push(notification.clone());
        Ok(notification)
    }

    async fn mark_read(&self, recipient: &UserId, id: Uuid) -> Result<Notification, NotifyError> {
        let mut inner = self.inner.write().await;
        let n = inner.find_mut(recipient, id).ok_or(NotifyError::NotFound)?;
        n.mark_read(Utc::now());
        Ok(n.clone())
    }

    async fn mark_all_read(&self, recipient: &UserId) -> Result<u64, NotifyError> {
        let mut inner = self.inner.write().await;
        let now = Utc::now();
        let changed = inner
            .by_recipient
            .get_mut(recipient)
            .map(|items| items.iter_mut().map(|n| n.mark_read(now)).filter(|changed| *changed).count())
            .unwrap_or(0);
        Ok(changed as u64)
    }

    async fn delete(&self, recipient: &UserId, id: Uuid) -> Result<(), NotifyError> {
        let mut inner = self.inner.write().await;
        let items = inner
            .by_recipient
            .get_mut(recipient)
            .ok_or(NotifyError::NotFound)?;
        let before = items.len();
        items.retain(|n| n.id != id);
        if items.len() == before {
            return Err(NotifyError::NotFound);
        }
        Ok(())
    }

    async fn list(&self, recipient: &UserId, query: &ListQuery) -> Result<NotificationPage, NotifyError> {
        let query = query.normalized();
        let inner = self.inner.read().await;
        let items = inner
            .by_recipient
            .get(recipient)
            .map(Vec::as_slice)
            .unwrap_or(&[]);

        let mut matching: Vec<&Notification> = items.iter().filter(|n| query.matches(n)).collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.id.cmp(&a.id)));

        let total = matching.len() as i64;
        let unread = items.iter().filter(|n| !n.is_read).count() as i64;
        let page: Vec<Notification> = matching
            .into_iter()
            .skip(query.offset() as usize)
            .take(query.limit as usize)
            .cloned()
            .collect();

        Ok(NotificationPage::new(&page, total, unread, &query))
    }

    async fn count_unread(&self, recipient: &UserId) -> Result<i64, NotifyError> {
        let inner = self.inner.read().await;
        let count = inner
            .by_recipient
            .get(recipient)
            .map(|items| items.iter().filter(|n| !n.is_read).count())
            .unwrap_or(0);
        Ok(count as i64)
    }
}
