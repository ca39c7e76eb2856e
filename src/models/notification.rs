use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::NotifyError;

pub const MAX_TITLE_CHARS: usize = 100;
pub const MAX_MESSAGE_CHARS: usize = 500;
pub const MAX_USER_ID_CHARS: usize = 64;
/// Upper bound on the serialized size of `NotificationData::extra`.
pub const MAX_EXTRA_BYTES: usize = 4 * 1024;

// ── Identity ─────────────────────────────────────────────────

/// Opaque user identity, stable across reconnects.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub(crate) fn validate(&self, field: &str) -> Result<(), NotifyError> {
        if self.0.is_empty() {
            return Err(NotifyError::Validation(format!("{} is required", field)));
        }
        if self.0.chars().count() > MAX_USER_ID_CHARS {
            return Err(NotifyError::Validation(format!(
                "{} exceeds {} characters",
                field, MAX_USER_ID_CHARS
            )));
        }
        if self.0.chars().any(char::is_whitespace) {
            return Err(NotifyError::Validation(format!(
                "{} must not contain whitespace",
                field
            )));
        }
        Ok(())
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UserId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for UserId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

// ── Kind ─────────────────────────────────────────────────────

/// Closed set of notification types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    FrameLike,
    FrameUse,
    FrameApproved,
    FrameRejected,
    NewFollower,
    FolloweeUpload,
    System,
    Birthday,
    Broadcast,
}

impl NotificationKind {
    pub const ALL: [NotificationKind; 9] = [
        NotificationKind::FrameLike,
        NotificationKind::FrameUse,
        NotificationKind::FrameApproved,
        NotificationKind::FrameRejected,
        NotificationKind::NewFollower,
        NotificationKind::FolloweeUpload,
        NotificationKind::System,
        NotificationKind::Birthday,
        NotificationKind::Broadcast,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::FrameLike => "frame_like",
            NotificationKind::FrameUse => "frame_use",
            NotificationKind::FrameApproved => "frame_approved",
            NotificationKind::FrameRejected => "frame_rejected",
            NotificationKind::NewFollower => "new_follower",
            NotificationKind::FolloweeUpload => "followee_upload",
            NotificationKind::System => "system",
            NotificationKind::Birthday => "birthday",
            NotificationKind::Broadcast => "broadcast",
        }
    }
}

impl fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NotificationKind {
    type Err = NotifyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        NotificationKind::ALL
            .iter()
            .copied()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| NotifyError::Validation(format!("unknown notification type '{}'", s)))
    }
}

// ── Snapshot payloads ────────────────────────────────────────
//
// Display fields are copied at creation time and never re-joined, so a
// notification stays readable after the sender renames or the frame is deleted.

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SenderSnapshot {
    pub id: UserId,
    pub username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
}

impl SenderSnapshot {
    pub fn new(id: impl Into<UserId>, username: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            username: username.into(),
            display_name: None,
            avatar_url: None,
        }
    }

    /// Name shown in generated messages.
    pub fn label(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.username)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameSnapshot {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail_url: Option<String>,
}

impl FrameSnapshot {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            thumbnail_url: None,
        }
    }
}

/// Type-dependent payload. Stored as a JSON document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NotificationData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender: Option<SenderSnapshot>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frame: Option<FrameSnapshot>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub broadcast_id: Option<Uuid>,
    /// Moderation reason for rejected frames.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub extra: serde_json::Value,
}

// ── New notification payload ─────────────────────────────────

/// A notification before persistence. `validate()` is the only gate
/// between a collaborator's payload and the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewNotification {
    pub recipient_id: UserId,
    pub sender_id: UserId,
    #[serde(rename = "type")]
    pub kind: NotificationKind,
    pub title: String,
    pub message: String,
    #[serde(default)]
    pub data: NotificationData,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

impl NewNotification {
    pub fn new(
        recipient_id: impl Into<UserId>,
        sender_id: impl Into<UserId>,
        kind: NotificationKind,
        title: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            recipient_id: recipient_id.into(),
            sender_id: sender_id.into(),
            kind,
            title: title.into(),
            message: message.into(),
            data: NotificationData::default(),
            expires_at: None,
        }
    }

    pub fn with_data(mut self, data: NotificationData) -> Self {
        self.data = data;
        self
    }

    pub fn expiring_at(mut self, at: DateTime<Utc>) -> Self {
        self.expires_at = Some(at);
        self
    }

    pub fn frame_like(
        recipient_id: impl Into<UserId>,
        sender: SenderSnapshot,
        frame: FrameSnapshot,
    ) -> Self {
        let message = format!("{} liked your frame \"{}\"", sender.label(), frame.name);
        Self::new(
            recipient_id,
            sender.id.clone(),
            NotificationKind::FrameLike,
            "New like",
            message,
        )
        .with_data(NotificationData {
            sender: Some(sender),
            frame: Some(frame),
            ..Default::default()
        })
    }

    pub fn frame_use(
        recipient_id: impl Into<UserId>,
        sender: SenderSnapshot,
        frame: FrameSnapshot,
    ) -> Self {
        let message = format!("{} took a photo with your frame \"{}\"", sender.label(), frame.name);
        Self::new(
            recipient_id,
            sender.id.clone(),
            NotificationKind::FrameUse,
            "Frame used",
            message,
        )
        .with_data(NotificationData {
            sender: Some(sender),
            frame: Some(frame),
            ..Default::default()
        })
    }

    /// System-authored: the sender is the recipient.
    pub fn frame_approved(recipient_id: impl Into<UserId>, frame: FrameSnapshot) -> Self {
        let recipient_id = recipient_id.into();
        let message = format!("Your frame \"{}\" was approved and is now public", frame.name);
        Self::new(
            recipient_id.clone(),
            recipient_id,
            NotificationKind::FrameApproved,
            "Frame approved",
            message,
        )
        .with_data(NotificationData {
            frame: Some(frame),
            ..Default::default()
        })
    }

    pub fn frame_rejected(
        recipient_id: impl Into<UserId>,
        frame: FrameSnapshot,
        reason: Option<String>,
    ) -> Self {
        let recipient_id = recipient_id.into();
        let message = match &reason {
            Some(r) => format!("Your frame \"{}\" was not approved: {}", frame.name, r),
            None => format!("Your frame \"{}\" was not approved", frame.name),
        };
        Self::new(
            recipient_id.clone(),
            recipient_id,
            NotificationKind::FrameRejected,
            "Frame not approved",
            message,
        )
        .with_data(NotificationData {
            frame: Some(frame),
            reason,
            ..Default::default()
        })
    }

    pub fn new_follower(recipient_id: impl Into<UserId>, sender: SenderSnapshot) -> Self {
        let message = format!("{} started following you", sender.label());
        Self::new(
            recipient_id,
            sender.id.clone(),
            NotificationKind::NewFollower,
            "New follower",
            message,
        )
        .with_data(NotificationData {
            sender: Some(sender),
            ..Default::default()
        })
    }

    pub fn followee_upload(
        recipient_id: impl Into<UserId>,
        sender: SenderSnapshot,
        frame: FrameSnapshot,
    ) -> Self {
        let message = format!("{} uploaded a new frame \"{}\"", sender.label(), frame.name);
        Self::new(
            recipient_id,
            sender.id.clone(),
            NotificationKind::FolloweeUpload,
            "New frame",
            message,
        )
        .with_data(NotificationData {
            sender: Some(sender),
            frame: Some(frame),
            ..Default::default()
        })
    }

    pub fn system(
        recipient_id: impl Into<UserId>,
        title: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        let recipient_id = recipient_id.into();
        Self::new(
            recipient_id.clone(),
            recipient_id,
            NotificationKind::System,
            title,
            message,
        )
    }

    pub fn birthday(recipient_id: impl Into<UserId>, username: &str) -> Self {
        let recipient_id = recipient_id.into();
        Self::new(
            recipient_id.clone(),
            recipient_id,
            NotificationKind::Birthday,
            "Happy birthday!",
            format!("Happy birthday, {}! Celebrate with a new photo.", username),
        )
    }

    pub fn validate(&self) -> Result<(), NotifyError> {
        self.recipient_id.validate("recipient_id")?;
        self.sender_id.validate("sender_id")?;
        validate_text("title", &self.title, MAX_TITLE_CHARS)?;
        validate_text("message", &self.message, MAX_MESSAGE_CHARS)?;

        if !self.data.extra.is_null() {
            let size = serde_json::to_vec(&self.data.extra)
                .map_err(|e| NotifyError::Validation(format!("data.extra is not serializable: {}", e)))?
                .len();
            if size > MAX_EXTRA_BYTES {
                return Err(NotifyError::Validation(format!(
                    "data.extra exceeds {} bytes",
                    MAX_EXTRA_BYTES
                )));
            }
        }

        if let Some(expires_at) = self.expires_at {
            if expires_at <= Utc::now() {
                return Err(NotifyError::Validation(
                    "expires_at must be in the future".to_string(),
                ));
            }
        }
        Ok(())
    }
}

fn validate_text(field: &str, value: &str, max: usize) -> Result<(), NotifyError> {
    if value.trim().is_empty() {
        return Err(NotifyError::Validation(format!("{} is required", field)));
    }
    if value.chars().count() > max {
        return Err(NotifyError::Validation(format!(
            "{} exceeds {} characters",
            field, max
        )));
    }
    Ok(())
}

// ── Stored notification ──────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub id: Uuid,
    pub recipient_id: UserId,
    pub sender_id: UserId,
    #[serde(rename = "type")]
    pub kind: NotificationKind,
    pub title: String,
    pub message: String,
    pub data: NotificationData,
    pub is_read: bool,
    pub read_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Notification {
    /// Materialize a validated payload. Always starts unread.
    pub fn from_new(new: NewNotification, created_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            recipient_id: new.recipient_id,
            sender_id: new.sender_id,
            kind: new.kind,
            title: new.title,
            message: new.message,
            data: new.data,
            is_read: false,
            read_at: None,
            expires_at: new.expires_at,
            created_at,
        }
    }

    /// Returns true if the read state changed. Already-read notifications keep
    /// their original `read_at`.
    pub fn mark_read(&mut self, now: DateTime<Utc>) -> bool {
        if self.is_read {
            return false;
        }
        self.is_read = true;
        self.read_at = Some(now);
        true
    }

    /// `read_at` is set if and only if `is_read`.
    pub fn read_state_consistent(&self) -> bool {
        self.is_read == self.read_at.is_some()
    }

    pub fn view(&self) -> NotificationView {
        NotificationView {
            id: self.id,
            kind: self.kind,
            title: self.title.clone(),
            message: self.message.clone(),
            data: self.data.clone(),
            sender_id: self.sender_id.clone(),
            sender: self.data.sender.clone(),
            is_read: self.is_read,
            read_at: self.read_at,
            expires_at: self.expires_at,
            created_at: self.created_at,
        }
    }
}

/// Client-facing shape pushed over sessions and returned from list calls.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationView {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub kind: NotificationKind,
    pub title: String,
    pub message: String,
    pub data: NotificationData,
    pub sender_id: UserId,
    pub sender: Option<SenderSnapshot>,
    pub is_read: bool,
    pub read_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}
