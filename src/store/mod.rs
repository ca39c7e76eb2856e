//! Durable notification storage.
//!
//! `NotificationStore` is the seam between the realtime core and the backing
//! database. `PgStore` is the production backend; `MemoryStore` backs tests
//! and single-process development runs.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::NotifyError;
use crate::models::notification::{NewNotification, Notification, NotificationKind, NotificationView, UserId};

pub const DEFAULT_PAGE_SIZE: u32 = 20;
pub const MAX_PAGE_SIZE: u32 = 100;

#[async_trait]
pub trait NotificationStore: Send + Sync {
    /// Validate and persist. Assigns `id` and `created_at`; starts unread.
    async fn create(&self, new: NewNotification) -> Result<Notification, NotifyError>;

    /// Idempotent. A notification owned by another recipient is `NotFound`.
    async fn mark_read(&self, recipient: &UserId, id: Uuid) -> Result<Notification, NotifyError>;

    /// Returns the number of notifications that flipped to read.
    async fn mark_all_read(&self, recipient: &UserId) -> Result<u64, NotifyError>;

    async fn delete(&self, recipient: &UserId, id: Uuid) -> Result<(), NotifyError>;

    /// Newest first; ties broken by id.
    async fn list(&self, recipient: &UserId, query: &ListQuery) -> Result<NotificationPage, NotifyError>;

    async fn count_unread(&self, recipient: &UserId) -> Result<i64, NotifyError>;
}

/// Pagination and filter parameters for `list`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListQuery {
    #[serde(default = "default_page")]
    pub page: u32,
    #[serde(default = "default_limit")]
    pub limit: u32,
    #[serde(default, rename = "type")]
    pub kind: Option<NotificationKind>,
    #[serde(default)]
    pub unread_only: bool,
}

fn default_page() -> u32 {
    1
}

fn default_limit() -> u32 {
    DEFAULT_PAGE_SIZE
}

impl Default for ListQuery {
    fn default() -> Self {
        Self {
            page: default_page(),
            limit: default_limit(),
            kind: None,
            unread_only: false,
        }
    }
}

impl ListQuery {
    pub fn page(page: u32, limit: u32) -> Self {
        Self {
            page,
            limit,
            ..Default::default()
        }
    }

    /// Clamp page to >= 1 and limit to 1..=MAX_PAGE_SIZE.
    pub fn normalized(&self) -> Self {
        Self {
            page: self.page.max(1),
            limit: self.limit.clamp(1, MAX_PAGE_SIZE),
            kind: self.kind,
            unread_only: self.unread_only,
        }
    }

    pub fn offset(&self) -> u64 {
        (self.page.max(1) as u64 - 1) * self.limit as u64
    }

    /// Whether a notification passes the type / unread filters.
    pub fn matches(&self, n: &Notification) -> bool {
        self.kind.map_or(true, |k| n.kind == k) && (!self.unread_only || !n.is_read)
    }
}

/// One page of a recipient's feed plus the counters clients render with it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationPage {
    pub notifications: Vec<NotificationView>,
    /// Total matching the filters, across all pages.
    pub total: i64,
    pub unread_count: i64,
    pub page: u32,
    pub limit: u32,
    pub total_pages: u32,
    pub has_more: bool,
}

impl NotificationPage {
    pub fn new(items: &[Notification], total: i64, unread_count: i64, query: &ListQuery) -> Self {
        let limit = query.limit.max(1) as i64;
        let total_pages = ((total + limit - 1) / limit) as u32;
        Self {
            notifications: items.iter().map(Notification::view).collect(),
            total,
            unread_count,
            page: query.page,
            limit: query.limit,
            total_pages,
            has_more: (query.page as i64) * limit < total,
        }
    }
}
