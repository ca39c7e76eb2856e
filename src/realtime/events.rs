//! JSON wire protocol for live sessions.
//!
//! Outbound: `{"event": "<name>", "data": {...}}`.
//! Inbound:  `{"action": "<name>", "request_id": "...", ...params}`.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::NotifyError;
use crate::models::notification::{NotificationView, UserId};
use crate::store::{ListQuery, NotificationPage};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ServerEvent {
    /// Sent once right after the session is bound.
    Connected { user_id: UserId, session_id: Uuid },

    /// One per successful live delivery.
    NewNotification(NotificationView),

    /// Fresh count after any mutation of the recipient's notifications.
    UnreadCount { count: i64 },

    NotificationsList(ListResponse),

    NotificationRead {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
        notification: NotificationView,
    },

    AllNotificationsRead {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
        count: u64,
    },

    NotificationDeleted {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
        id: Uuid,
    },

    /// Failure scoped to a single client request.
    Error {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
        code: String,
        message: String,
    },
}

impl ServerEvent {
    pub fn error(request_id: Option<String>, err: &NotifyError) -> Self {
        ServerEvent::Error {
            request_id,
            code: err.code().to_string(),
            message: err.public_message(),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ServerEvent::Connected { .. } => "connected",
            ServerEvent::NewNotification(_) => "new_notification",
            ServerEvent::UnreadCount { .. } => "unread_count",
            ServerEvent::NotificationsList(_) => "notifications_list",
            ServerEvent::NotificationRead { .. } => "notification_read",
            ServerEvent::AllNotificationsRead { .. } => "all_notifications_read",
            ServerEvent::NotificationDeleted { .. } => "notification_deleted",
            ServerEvent::Error { .. } => "error",
        }
    }
}

/// Reply to `get_notifications`: the page, flattened, plus the request id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    #[serde(flatten)]
    pub page: NotificationPage,
}

/// A request sent by the client over its live session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    #[serde(flatten)]
    pub action: ClientAction,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ClientAction {
    GetNotifications(ListQuery),
    MarkRead { id: Uuid },
    MarkAllRead,
    Delete { id: Uuid },
    GetUnreadCount,
}
