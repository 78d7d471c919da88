use std::sync::Arc;

use axum::{ extract::State, routing::{ get, post }, Json, Router };
use chrono::Utc;
use tokio::sync::RwLock;
use tower::ServiceBuilder;
use tower_http::{ cors::CorsLayer, trace::TraceLayer };

pub mod notifications;
pub mod rules;

use crate::alert_checker::{ AlertChecker, CycleSummary };
use crate::error::Result;
use crate::services::{ NotificationHistoryStore, RuleRepository };

#[derive(Clone)]
pub struct AppState {
    pub repository: Arc<dyn RuleRepository>,
    pub history: Arc<RwLock<NotificationHistoryStore>>,
    pub checker: Arc<AlertChecker>,
}

impl AppState {
    pub fn new(
        repository: Arc<dyn RuleRepository>,
        history: Arc<RwLock<NotificationHistoryStore>>,
        checker: Arc<AlertChecker>
    ) -> Self {
        Self {
            repository,
            history,
            checker,
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route(
            "/api/notifications",
            get(notifications::list_notifications).delete(notifications::clear_notifications)
        )
        .route("/api/notifications/unread-count", get(notifications::unread_count))
        .route("/api/notifications/read-all", post(notifications::mark_all_as_read))
        .route("/api/notifications/{id}/read", post(notifications::mark_as_read))
        .route("/api/rules", get(rules::list_rules).post(rules::create_rule))
        .route("/api/rules/{id}", get(rules::get_rule).delete(rules::delete_rule))
        .route("/api/rules/{id}/pause", post(rules::pause_rule))
        .route("/api/rules/{id}/resume", post(rules::resume_rule))
        .route("/api/rules/{id}/reset", post(rules::reset_rule))
        .route("/api/cycle", post(run_cycle))
        .with_state(state)
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()).layer(CorsLayer::permissive()))
}

async fn health_check() -> &'static str {
    "OK"
}

/// Run one evaluation cycle immediately.
async fn run_cycle(State(state): State<AppState>) -> Result<Json<CycleSummary>> {
    let summary = state.checker.run_cycle(Utc::now()).await?;
    Ok(Json(summary))
}
