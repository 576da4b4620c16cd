use axum::http::HeaderValue;
use axum::{extract::Request, middleware::Next, response::Response};
use uuid::Uuid;

pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Longest caller-supplied id that is propagated as-is.
const MAX_REQUEST_ID_LEN: usize = 128;

fn incoming_request_id(req: &Request) -> Option<HeaderValue> {
    let value = req.headers().get(REQUEST_ID_HEADER)?;
    let id = value.to_str().ok()?;
    let usable = !id.is_empty()
        && id.len() <= MAX_REQUEST_ID_LEN
        && id.bytes().all(|b| b.is_ascii_graphic());
    usable.then(|| value.clone())
}

/// Reuse the caller's `x-request-id` or mint one, and echo it on the response.
/// Incoming ids must be at most 128 visible ASCII characters; anything else
/// is replaced.
pub async fn request_id_middleware(mut req: Request, next: Next) -> Response {
    let request_id = match incoming_request_id(&req) {
        Some(value) => value,
        None => {
            let minted = HeaderValue::from_str(&Uuid::new_v4().to_string());
            match minted {
                Ok(value) => value,
                Err(_) => return next.run(req).await,
            }
        }
    };

    req.headers_mut().insert(REQUEST_ID_HEADER, request_id.clone());

    let mut response = next.run(req).await;
    response.headers_mut().insert(REQUEST_ID_HEADER, request_id);
    response
}
