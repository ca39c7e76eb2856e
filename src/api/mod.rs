use std::sync::Arc;

use axum::{
    http::StatusCode,
    middleware,
    routing::{delete, get, patch, post},
    Router,
};
use tower_http::trace::TraceLayer;

use crate::auth::admin_auth;
use crate::realtime::socket::ws_handler;
use crate::AppState;

pub mod handlers;

/// Build the full HTTP surface: user routes, admin routes, the socket
/// endpoint, health and metrics.
pub fn router(state: Arc<AppState>) -> Router {
    let user_routes = Router::new()
        .route("/notifications", get(handlers::list_notifications))
        .route("/notifications/unread-count", get(handlers::unread_count))
        .route("/notifications/read-all", patch(handlers::mark_all_read))
        .route("/notifications/:id/read", patch(handlers::mark_read))
        .route("/notifications/:id", delete(handlers::delete_notification));

    let admin_routes = Router::new()
        .route("/notifications", post(handlers::create_notification))
        .route("/broadcasts", post(handlers::create_broadcast))
        .route("/presence", get(handlers::presence))
        .layer(middleware::from_fn_with_state(state.clone(), admin_auth));

    Router::new()
        .route("/healthz", get(|| async { "ok" }))
        .route("/metrics", get(handlers::metrics))
        .route("/ws", get(ws_handler))
        .nest("/api/v1", user_routes)
        .nest("/api/v1/admin", admin_routes)
        .fallback(fallback_404)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn fallback_404() -> StatusCode {
    StatusCode::NOT_FOUND
}
