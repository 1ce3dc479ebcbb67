use axum::body::{Body, Bytes};
use axum::extract::State;
use axum::http::header::{AUTHORIZATION, CACHE_CONTROL, CONTENT_TYPE};
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use tracing::{debug, warn};

use crate::errors::AppError;
use crate::models::{CompletionBody, Credential};
use crate::service::transcoder::CompletionRelay;

const EVENT_STREAM: &str = "text/event-stream";

// ── Handlers ─────────────────────────────────────────────────────────────────

/// POST `/api/completion`: relays one chat exchange as newline-delimited
/// JSON events.
///
/// The credential and the body are checked before the upstream service is
/// contacted; any failure up to the first relayed byte is a plain JSON error.
pub async fn completion_handler(
    State(relay): State<CompletionRelay>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    // ── Authentication ────────────────────────────────────────────────────
    let authorization = headers
        .get(AUTHORIZATION)
        .map(|value| value.to_str().unwrap_or_default());
    let credential = match Credential::from_authorization(authorization) {
        Ok(credential) => credential,
        Err(err) => return error_response(&err),
    };

    // ── Validation ────────────────────────────────────────────────────────
    let request = match parse_body(&body).and_then(CompletionBody::into_request) {
        Ok(request) => request,
        Err(err) => {
            debug!("Rejected completion request: {err}");
            return error_response(&err);
        }
    };

    // ── Relay ─────────────────────────────────────────────────────────────
    match relay.relay(&request, &credential).await {
        Ok(events) => {
            let mut response = Body::from_stream(events).into_response();
            let headers = response.headers_mut();
            headers.insert(CONTENT_TYPE, HeaderValue::from_static(EVENT_STREAM));
            headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
            headers.insert(
                HeaderName::from_static("x-accel-buffering"),
                HeaderValue::from_static("no"),
            );
            response
        }
        Err(err) => {
            warn!("Relay for topic {} failed: {err}", request.topic_id());
            error_response(&err)
        }
    }
}

// ── Helper ────────────────────────────────────────────────────────────────────

/// Only a JSON object is a request body; serde would also accept the struct
/// as a positional array.
fn parse_body(body: &[u8]) -> Result<CompletionBody, AppError> {
    let invalid = |e: serde_json::Error| AppError::InvalidBody { message: e.to_string() };
    match serde_json::from_slice::<serde_json::Value>(body).map_err(invalid)? {
        object @ serde_json::Value::Object(_) => serde_json::from_value(object).map_err(invalid),
        _ => Err(AppError::InvalidBody { message: "body must be a JSON object".to_string() }),
    }
}

fn error_response(err: &AppError) -> Response {
    let status = if err.is_authentication() {
        StatusCode::UNAUTHORIZED
    } else if err.is_validation() {
        StatusCode::BAD_REQUEST
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    };

    (status, Json(json!({ "message": err.to_string() }))).into_response()
}
