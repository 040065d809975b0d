use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: DateTime<Utc>,
    pub started_at: DateTime<Utc>,
    pub active_jobs: usize,
    pub timeout_secs: u64,
}

pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let response = HealthResponse {
        status: "healthy".to_string(),
        timestamp: Utc::now(),
        started_at: state.started_at,
        active_jobs: state.active_jobs(),
        timeout_secs: state.watchdog.deadline().as_secs(),
    };

    (StatusCode::OK, Json(response))
}
