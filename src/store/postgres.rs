use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::PgPool;
use uuid::Uuid;

use super::{ListQuery, NotificationPage, NotificationStore};
use crate::errors::NotifyError;
use crate::models::notification::{
    NewNotification, Notification, NotificationData, NotificationKind, UserId,
};

const COLUMNS: &str = "id, recipient_id, sender_id, type AS kind, title, message, data, \
                       is_read, read_at, expires_at, created_at";

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(database_url: &str) -> anyhow::Result<Self> {
        let pool = PgPool::connect(database_url).await?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Run pending migrations from the migrations/ directory.
    pub async fn migrate(&self) -> anyhow::Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }
}

#[derive(sqlx::FromRow)]
struct NotificationRow {
    id: Uuid,
    recipient_id: String,
    sender_id: String,
    kind: String,
    title: String,
    message: String,
    data: Json<NotificationData>,
    is_read: bool,
    read_at: Option<DateTime<Utc>>,
    expires_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
}

impl TryFrom<NotificationRow> for Notification {
    type Error = NotifyError;

    fn try_from(row: NotificationRow) -> Result<Self, Self::Error> {
        let kind: NotificationKind = row.kind.parse().map_err(|_| {
            NotifyError::Internal(anyhow::anyhow!(
                "notification {} has unknown type '{}'",
                row.id,
                row.kind
            ))
        })?;
        Ok(Notification {
            id: row.id,
            recipient_id: UserId::new(row.recipient_id),
            sender_id: UserId::new(row.sender_id),
            kind,
            title: row.title,
            message: row.message,
            data: row.data.0,
            is_read: row.is_read,
            read_at: row.read_at,
            expires_at: row.expires_at,
            created_at: row.created_at,
        })
    }
}

#[async_trait]
impl NotificationStore for PgStore {
    async fn create(&self, new: NewNotification) -> Result<Notification, NotifyError> {
        new.validate()?;
        let row = sqlx::query_as::<_, NotificationRow>(&format!(
            r#"INSERT INTO notifications (id, recipient_id, sender_id, type, title, message, data, expires_at)
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
               RETURNING {}"#,
            COLUMNS
        ))
        .bind(Uuid::new_v4())
        .bind(new.recipient_id.as_str())
        .bind(new.sender_id.as_str())
        .bind(new.kind.as_str())
        .bind(&new.title)
        .bind(&new.message)
        .bind(Json(&new.data))
        .bind(new.expires_at)
        .fetch_one(&self.pool)
        .await?;

        row.try_into()
    }

    async fn mark_read(&self, recipient: &UserId, id: Uuid) -> Result<Notification, NotifyError> {
        // COALESCE keeps the first read time on repeat calls.
        let row = sqlx::query_as::<_, NotificationRow>(&format!(
            r#"UPDATE notifications
               SET is_read = TRUE, read_at = COALESCE(read_at, NOW())
               WHERE id = $1 AND recipient_id = $2
               RETURNING {}"#,
            COLUMNS
        ))
        .bind(id)
        .bind(recipient.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.ok_or(NotifyError::NotFound)?.try_into()
    }

    async fn mark_all_read(&self, recipient: &UserId) -> Result<u64, NotifyError> {
        let result = sqlx::query(
            r#"UPDATE notifications SET is_read = TRUE, read_at = NOW()
               WHERE recipient_id = $1 AND is_read = FALSE"#,
        )
        .bind(recipient.as_str())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn delete(&self, recipient: &UserId, id: Uuid) -> Result<(), NotifyError> {
        let result = sqlx::query("DELETE FROM notifications WHERE id = $1 AND recipient_id = $2")
            .bind(id)
            .bind(recipient.as_str())
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(NotifyError::NotFound);
        }
        Ok(())
    }

    async fn list(&self, recipient: &UserId, query: &ListQuery) -> Result<NotificationPage, NotifyError> {
        let query = query.normalized();
        let kind = query.kind.map(|k| k.as_str());

        let rows = sqlx::query_as::<_, NotificationRow>(&format!(
            r#"SELECT {}
               FROM notifications
               WHERE recipient_id = $1
                 AND ($2::TEXT IS NULL OR type = $2)
                 AND ($3 = FALSE OR is_read = FALSE)
               ORDER BY created_at DESC, id DESC
               LIMIT $4 OFFSET $5"#,
            COLUMNS
        ))
        .bind(recipient.as_str())
        .bind(kind)
        .bind(query.unread_only)
        .bind(query.limit as i64)
        .bind(query.offset() as i64)
        .fetch_all(&self.pool)
        .await?;

        let total = sqlx::query_scalar::<_, i64>(
            r#"SELECT COUNT(*) FROM notifications
               WHERE recipient_id = $1
                 AND ($2::TEXT IS NULL OR type = $2)
                 AND ($3 = FALSE OR is_read = FALSE)"#,
        )
        .bind(recipient.as_str())
        .bind(kind)
        .bind(query.unread_only)
        .fetch_one(&self.pool)
        .await?;

        let unread = self.count_unread(recipient).await?;
        let items = rows
            .into_iter()
            .map(Notification::try_from)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(NotificationPage::new(&items, total, unread, &query))
    }

    async fn count_unread(&self, recipient: &UserId) -> Result<i64, NotifyError> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM notifications WHERE recipient_id = $1 AND is_read = FALSE",
        )
        .bind(recipient.as_str())
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }
}
