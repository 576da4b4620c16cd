use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde_json::json;

use crate::startup::AppState;
use service_core::error::AppError;

/// Liveness: the process is up and serving.
pub async fn health_check() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "service": "consultation-service",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Readiness: the model provider accepts our credentials.
pub async fn readiness_check(State(state): State<AppState>) -> Result<StatusCode, AppError> {
    state.text_provider.health_check().await.map_err(|e| {
        tracing::warn!(
            provider = state.text_provider.name(),
            error = %e,
            "Readiness check failed"
        );
        AppError::ServiceUnavailable
    })?;

    Ok(StatusCode::OK)
}
