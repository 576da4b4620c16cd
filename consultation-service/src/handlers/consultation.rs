use axum::{
    body::Body,
    extract::{rejection::JsonRejection, State},
    http::{header, HeaderName},
    response::{IntoResponse, Response},
    Json,
};
use service_core::error::AppError;

use crate::models::Visit;
use crate::prompts::{user_prompt_for, SYSTEM_PROMPT};
use crate::services::{metrics, relay::relay};
use crate::startup::AppState;

static X_ACCEL_BUFFERING: HeaderName = HeaderName::from_static("x-accel-buffering");

/// `POST /api`: stream a consultation summary for one visit.
///
/// Body problems are rejected before the model is called. Once the first
/// byte is out, failures can only cut the stream short.
pub async fn consultation_summary(
    State(state): State<AppState>,
    payload: Result<Json<Visit>, JsonRejection>,
) -> Result<Response, AppError> {
    let Json(visit) = payload.map_err(|rejection| {
        tracing::warn!(
            status = %rejection.status(),
            reason = %rejection.body_text(),
            "Rejected consultation request"
        );
        AppError::from(rejection)
    })?;

    let provider = state.text_provider.clone();
    let prompt = user_prompt_for(&visit);

    let upstream = provider
        .generate_stream(SYSTEM_PROMPT, &prompt)
        .await
        .map_err(|e| {
            tracing::error!(
                provider = provider.name(),
                model = %provider.model(),
                error = %e,
                "Failed to open upstream stream"
            );
            metrics::record_provider_error(provider.name(), e.kind());
            AppError::BadGateway(e.to_string())
        })?;

    tracing::info!(
        provider = provider.name(),
        model = %provider.model(),
        prompt_len = prompt.len(),
        "Streaming consultation summary"
    );

    let body = Body::from_stream(relay(
        upstream,
        provider.name(),
        provider.model().to_string(),
    ));

    Ok((
        [
            (header::CONTENT_TYPE, "text/event-stream"),
            (header::CACHE_CONTROL, "no-cache"),
            (X_ACCEL_BUFFERING.clone(), "no"),
        ],
        body,
    )
        .into_response())
}
