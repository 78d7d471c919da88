use axum::{ extract::{ Path, Query, State }, http::StatusCode, Json };
use serde::{ Deserialize, Serialize };
use uuid::Uuid;

use crate::error::{ AppError, Result };
use crate::services::NotificationEvent;

use super::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct ListNotificationsQuery {
    #[serde(default)]
    pub unread_only: bool,
    #[serde(default)]
    pub limit: Option<usize>,
}

#[derive(Serialize)]
pub struct UnreadCountResponse {
    pub unread: usize,
}

#[derive(Serialize)]
pub struct MarkAllResponse {
    pub updated: usize,
}

/// Newest first.
pub async fn list_notifications(
    State(state): State<AppState>,
    Query(query): Query<ListNotificationsQuery>
) -> Json<Vec<NotificationEvent>> {
    let history = state.history.read().await;
    let events = history
        .events()
        .filter(|e| !query.unread_only || !e.read)
        .take(query.limit.unwrap_or(usize::MAX))
        .cloned()
        .collect();
    Json(events)
}

pub async fn unread_count(State(state): State<AppState>) -> Json<UnreadCountResponse> {
    let unread = state.history.read().await.unread_count();
    Json(UnreadCountResponse { unread })
}

pub async fn mark_as_read(
    State(state): State<AppState>,
    Path(id): Path<Uuid>
) -> Result<StatusCode> {
    if state.history.write().await.mark_as_read(id) {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AppError::NotificationNotFound)
    }
}

pub async fn mark_all_as_read(State(state): State<AppState>) -> Json<MarkAllResponse> {
    let updated = state.history.write().await.mark_all_as_read();
    Json(MarkAllResponse { updated })
}

pub async fn clear_notifications(State(state): State<AppState>) -> StatusCode {
    state.history.write().await.clear();
    StatusCode::NO_CONTENT
}
