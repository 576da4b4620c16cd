//! Shared helpers for consultation-service integration tests.
#![allow(dead_code)]

use axum::{
    body::{Body, Bytes},
    extract::{Path, State},
    http::{HeaderMap, Method, StatusCode, Uri},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use consultation_service::config::{ConsultationConfig, HttpConfig};
use consultation_service::services::providers::mock::MockTextProvider;
use consultation_service::services::TextProvider;
use consultation_service::startup::{build_router, AppState, Application};
use futures::StreamExt;
use serde_json::{json, Value};
use service_core::config::Config;
use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;

pub const TEST_MODEL: &str = "gemini-test";
pub const TEST_API_KEY: &str = "test-api-key";

pub fn visit_json() -> Value {
    json!({
        "patient_name": "Jane Doe",
        "date_of_visit": "2024-03-01",
        "notes": "BP 150/95. Start amlodipine 5mg.\nReview in 2 weeks."
    })
}

pub fn http_config() -> HttpConfig {
    HttpConfig {
        max_request_body_bytes: 64 * 1024,
        cors_allowed_origins: Vec::new(),
    }
}

/// Router backed by `provider`, for `oneshot` tests.
pub fn router_with(provider: Arc<MockTextProvider>) -> Router {
    build_router(AppState::new(provider as Arc<dyn TextProvider>), &http_config())
}

/// Configuration pointing at `api_base` on a random local port.
pub fn test_config(api_base: &str) -> ConsultationConfig {
    test_config_with_timeout(api_base, 10)
}

/// Like [`test_config`] with an explicit upstream idle timeout.
pub fn test_config_with_timeout(api_base: &str, timeout_secs: u64) -> ConsultationConfig {
    let vars: HashMap<&str, String> = HashMap::from([
        ("GOOGLE_API_KEY", TEST_API_KEY.to_string()),
        ("GENAI_TEXT_MODEL", TEST_MODEL.to_string()),
        ("GEMINI_API_BASE", api_base.to_string()),
        ("GENAI_REQUEST_TIMEOUT_SECS", timeout_secs.to_string()),
    ]);
    let common = Config {
        port: 0,
        host: "127.0.0.1".parse().expect("valid loopback address"),
    };
    ConsultationConfig::from_lookup(common, |key| vars.get(key).cloned())
        .expect("Failed to build test config")
}

/// Spawn the application on a random port and return its base URL.
pub async fn spawn_app(config: ConsultationConfig) -> String {
    let app = Application::build(config)
        .await
        .expect("Failed to build application");
    serve(app)
}

/// Spawn the application around a mock provider.
pub async fn spawn_app_with_provider(provider: Arc<MockTextProvider>) -> String {
    let app = Application::build_with_provider(
        test_config("http://127.0.0.1:9/unused"),
        provider as Arc<dyn TextProvider>,
    )
    .await
    .expect("Failed to build application");
    serve(app)
}

fn serve(app: Application) -> String {
    let address = format!("http://127.0.0.1:{}", app.port());
    tokio::spawn(async move {
        let _ = app.run_until_stopped().await;
    });
    address
}

/// One request received by [`FakeGemini`].
#[derive(Debug, Clone)]
pub struct CapturedRequest {
    pub method: String,
    pub path: String,
    pub query: Option<String>,
    pub api_key: Option<String>,
    pub body: Value,
}

#[derive(Clone)]
struct FakeState {
    status: StatusCode,
    events: Arc<Vec<String>>,
    interval: Option<Duration>,
    requests: Arc<Mutex<Vec<CapturedRequest>>>,
}

/// Local stand-in for the Gemini REST API.
pub struct FakeGemini {
    pub base_url: String,
    requests: Arc<Mutex<Vec<CapturedRequest>>>,
}

impl FakeGemini {
    pub fn requests(&self) -> Vec<CapturedRequest> {
        self.requests.lock().unwrap().clone()
    }
}

/// SSE event carrying one text fragment, as Gemini sends it.
pub fn gemini_text_event(text: &str) -> String {
    let payload = json!({
        "candidates": [{ "content": { "role": "model", "parts": [{ "text": text }] } }]
    });
    format!("data: {}\r\n\r\n", payload)
}

/// Final SSE event with finish reason and usage.
pub fn gemini_final_event(text: &str) -> String {
    let payload = json!({
        "candidates": [{
            "content": { "role": "model", "parts": [{ "text": text }] },
            "finishReason": "STOP"
        }],
        "usageMetadata": { "promptTokenCount": 120, "candidatesTokenCount": 30 }
    });
    format!("data: {}\r\n\r\n", payload)
}

/// Serve `events` as separate body chunks for every streaming call.
pub async fn spawn_fake_gemini(status: StatusCode, events: Vec<String>) -> FakeGemini {
    start_fake_gemini(status, events, None).await
}

/// Like [`spawn_fake_gemini`], sleeping `interval` before each event.
pub async fn spawn_paced_fake_gemini(events: Vec<String>, interval: Duration) -> FakeGemini {
    start_fake_gemini(StatusCode::OK, events, Some(interval)).await
}

async fn start_fake_gemini(
    status: StatusCode,
    events: Vec<String>,
    interval: Option<Duration>,
) -> FakeGemini {
    let requests = Arc::new(Mutex::new(Vec::new()));
    let state = FakeState {
        status,
        events: Arc::new(events),
        interval,
        requests: requests.clone(),
    };

    let router = Router::new()
        .route("/v1beta/models/:call", get(fake_handler).post(fake_handler))
        .with_state(state);

    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind fake Gemini listener");
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        let _ = axum::serve(listener, router).await;
    });

    FakeGemini {
        base_url: format!("http://127.0.0.1:{}/v1beta", port),
        requests,
    }
}

async fn fake_handler(
    State(state): State<FakeState>,
    Path(call): Path<String>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let is_stream = call.ends_with(":streamGenerateContent");
    state.requests.lock().unwrap().push(CapturedRequest {
        method: method.to_string(),
        path: uri.path().to_string(),
        query: uri.query().map(str::to_string),
        api_key: headers
            .get("x-goog-api-key")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string),
        body: serde_json::from_slice(&body).unwrap_or(Value::Null),
    });

    if !state.status.is_success() {
        return (state.status, "{\"error\":{\"message\":\"fake failure\"}}").into_response();
    }

    if !is_stream {
        return Json(json!({ "name": format!("models/{}", call) })).into_response();
    }

    let chunks: Vec<Result<Bytes, Infallible>> = state
        .events
        .iter()
        .cloned()
        .map(|event| Ok(Bytes::from(event)))
        .collect();

    let interval = state.interval;
    let body = futures::stream::iter(chunks).then(move |chunk| async move {
        if let Some(interval) = interval {
            tokio::time::sleep(interval).await;
        }
        chunk
    });

    Response::builder()
        .header("content-type", "text/event-stream")
        .body(Body::from_stream(body))
        .unwrap()
}

