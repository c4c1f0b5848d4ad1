use axum::{
    body::{Body, Bytes},
    extract::{Request, State},
    http::{header::CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue, Method, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::sync::Arc;

use super::{Claim, IdempotencyCache, IdempotencyRecord};
use crate::error::{AppError, Result};
use crate::observability::{get_metrics, mask_sensitive};

/// Request header carrying the caller's idempotency token.
pub static IDEMPOTENCY_KEY_HEADER: HeaderName = HeaderName::from_static("idempotency-key");

/// Set on responses served from the cache.
pub static IDEMPOTENT_REPLAYED_HEADER: HeaderName =
    HeaderName::from_static("idempotent-replayed");

pub const MAX_KEY_LENGTH: usize = 255;

/// Reads the idempotency token from request headers.
///
/// A missing or blank header means no idempotency was requested.
pub fn extract_key(headers: &HeaderMap) -> Result<Option<String>> {
    let Some(value) = headers.get(&IDEMPOTENCY_KEY_HEADER) else {
        return Ok(None);
    };

    let key = value
        .to_str()
        .map_err(|_| AppError::validation("Idempotency-Key must be visible ASCII"))?
        .trim();

    if key.is_empty() {
        return Ok(None);
    }
    if key.len() > MAX_KEY_LENGTH {
        return Err(AppError::validation(format!(
            "Idempotency-Key cannot exceed {} characters",
            MAX_KEY_LENGTH
        )));
    }

    Ok(Some(key.to_string()))
}

/// Axum middleware deduplicating POST requests by `Idempotency-Key`.
///
/// Only successful (2xx) responses are recorded, except that a 2xx body too
/// large to buffer is recorded as a 500. Concurrent requests with the same key
/// wait for the first one and replay its response.
pub async fn idempotency_layer(
    State(cache): State<Arc<IdempotencyCache>>,
    request: Request,
    next: Next,
) -> Response {
    if request.method() != Method::POST {
        return next.run(request).await;
    }

    let key = match extract_key(request.headers()) {
        Ok(Some(key)) => key,
        Ok(None) => {
            get_metrics().record_idempotency_outcome("bypassed");
            return next.run(request).await;
        }
        Err(e) => return e.into_response(),
    };

    let metrics = cache.metrics();
    metrics.record_request();

    loop {
        match cache.begin(&key) {
            Claim::Replay(record) => {
                metrics.record_duplicate();
                get_metrics().record_idempotency_outcome("replayed");
                tracing::info!(
                    key = %mask_sensitive(&key, 4),
                    "Idempotent request detected, replaying recorded response"
                );
                return replay(&record);
            }
            Claim::Wait(pending) => {
                metrics.record_waited();
                tracing::debug!(
                    key = %mask_sensitive(&key, 4),
                    "Waiting on in-flight request with the same idempotency key"
                );
                if let Some(record) = pending.wait().await {
                    metrics.record_duplicate();
                    get_metrics().record_idempotency_outcome("replayed");
                    return replay(&record);
                }
                // The owner released the key without recording; claim again.
            }
            Claim::Execute(guard) => {
                metrics.record_new();
                get_metrics().record_idempotency_outcome("executed");

                let response = next.run(request).await;
                if !response.status().is_success() {
                    return response;
                }

                let (parts, body) = response.into_parts();
                let bytes = match axum::body::to_bytes(body, cache.config().max_body_bytes).await
                {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        // The handler already ran, so the key must not be
                        // released for a second execution.
                        tracing::error!(
                            key = %mask_sensitive(&key, 4),
                            error = %e,
                            "Failed to buffer response for idempotency key, recording failure"
                        );
                        let record = guard.complete(
                            StatusCode::INTERNAL_SERVER_ERROR,
                            Some(HeaderValue::from_static("application/json")),
                            Bytes::from_static(BUFFER_FAILURE_BODY),
                        );
                        return stored_response(&record);
                    }
                };

                let content_type = parts.headers.get(CONTENT_TYPE).cloned();
                guard.complete(parts.status, content_type, bytes.clone());

                return Response::from_parts(parts, Body::from(bytes));
            }
        }
    }
}

/// Response recorded when a successful body cannot be buffered.
const BUFFER_FAILURE_BODY: &[u8] = br#"{"success":false,"error":"Internal server error"}"#;

fn stored_response(record: &IdempotencyRecord) -> Response {
    let mut response = Response::new(Body::from(Bytes::clone(&record.body)));
    *response.status_mut() = record.status;
    if let Some(content_type) = &record.content_type {
        response
            .headers_mut()
            .insert(CONTENT_TYPE, content_type.clone());
    }
    response
}

fn replay(record: &IdempotencyRecord) -> Response {
    let mut response = stored_response(record);
    response.headers_mut().insert(
        IDEMPOTENT_REPLAYED_HEADER.clone(),
        HeaderValue::from_static("true"),
    );
    response
}
