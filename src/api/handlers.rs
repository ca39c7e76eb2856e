use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use crate::auth::AuthUser;
use crate::errors::AppError;
use crate::models::notification::{NewNotification, NotificationView, UserId};
use crate::notification::broadcast::{BroadcastTemplate, DeliveryStats};
use crate::store::{ListQuery, NotificationPage};
use crate::AppState;

// ── Request / Response DTOs ──────────────────────────────────

#[derive(Debug, Serialize, Deserialize)]
pub struct DeliverResponse {
    pub notification: NotificationView,
    /// `pushed`, `deferred` or `failed`. The notification is stored in every case.
    pub push: String,
}

#[derive(Debug, Deserialize)]
pub struct BroadcastRequest {
    #[serde(flatten)]
    pub template: BroadcastTemplate,
    pub recipient_ids: Vec<UserId>,
}

fn parse_id(id: &str) -> Result<Uuid, AppError> {
    Uuid::parse_str(id).map_err(|_| AppError::BadRequest(format!("invalid notification id '{}'", id)))
}

// ── Recipient routes ─────────────────────────────────────────

/// GET /api/v1/notifications
pub async fn list_notifications(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    Query(query): Query<ListQuery>,
) -> Result<Json<NotificationPage>, AppError> {
    let page = state.notifier.list(&user, &query).await?;
    Ok(Json(page))
}

/// GET /api/v1/notifications/unread-count
pub async fn unread_count(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
) -> Result<Json<serde_json::Value>, AppError> {
    let count = state.notifier.unread_count(&user).await?;
    Ok(Json(json!({ "count": count })))
}

/// PATCH /api/v1/notifications/:id/read
pub async fn mark_read(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    Path(id_str): Path<String>,
) -> Result<Json<NotificationView>, AppError> {
    let id = parse_id(&id_str)?;
    let notification = state.notifier.mark_read(&user, id).await?;
    Ok(Json(notification.view()))
}

/// PATCH /api/v1/notifications/read-all
pub async fn mark_all_read(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
) -> Result<Json<serde_json::Value>, AppError> {
    let count = state.notifier.mark_all_read(&user).await?;
    Ok(Json(json!({ "count": count })))
}

/// DELETE /api/v1/notifications/:id
pub async fn delete_notification(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    Path(id_str): Path<String>,
) -> Result<StatusCode, AppError> {
    let id = parse_id(&id_str)?;
    state.notifier.delete(&user, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// ── Admin routes ─────────────────────────────────────────────

/// POST /api/v1/admin/notifications: deliver one notification
pub async fn create_notification(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<NewNotification>,
) -> Result<(StatusCode, Json<DeliverResponse>), AppError> {
    let receipt = state.notifier.deliver(payload).await?;
    Ok((
        StatusCode::CREATED,
        Json(DeliverResponse {
            notification: receipt.notification.view(),
            push: receipt.push.label().to_string(),
        }),
    ))
}

/// POST /api/v1/admin/broadcasts: fan out to an explicit recipient list
pub async fn create_broadcast(
    State(state): State<Arc<AppState>>,
    Json(mut payload): Json<BroadcastRequest>,
) -> Result<Json<DeliveryStats>, AppError> {
    if payload.recipient_ids.is_empty() {
        return Err(AppError::BadRequest("recipient_ids must not be empty".into()));
    }
    payload.template.ensure_broadcast_id();
    let stats = state
        .notifier
        .broadcast(&payload.template, &payload.recipient_ids)
        .await;
    Ok(Json(stats))
}

/// GET /api/v1/admin/presence
pub async fn presence(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(json!({ "online": state.notifier.registry().online_count() }))
}

/// GET /metrics: Prometheus text exposition
pub async fn metrics(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.notifier.metrics().encode(),
    )
}
