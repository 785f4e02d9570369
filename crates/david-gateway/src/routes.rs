//! Request handlers: homepage and the catch-all webhook dispatch.

use std::collections::HashMap;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Query, Request};
use axum::http::{StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use david_scheduler::{Occurrence, WebhookRequest};
use futures::StreamExt;

use crate::server::GatewayState;

pub const HOMEPAGE: &str =
    "Welcome to David, our automation server! David is now listening to webhook requests.";

pub async fn homepage() -> &'static str {
    HOMEPAGE
}

#[derive(Debug)]
enum BodyError {
    TooLarge,
    Unreadable(axum::Error),
}

/// Collect the body, stopping as soon as it exceeds `limit` bytes.
async fn read_body(body: Body, limit: usize) -> Result<Vec<u8>, BodyError> {
    let mut frames = body.into_data_stream();
    let mut buffer = Vec::new();
    while let Some(frame) = frames.next().await {
        let chunk = frame.map_err(BodyError::Unreadable)?;
        if buffer.len() + chunk.len() > limit {
            return Err(BodyError::TooLarge);
        }
        buffer.extend_from_slice(&chunk);
    }
    Ok(buffer)
}

fn query_params(uri: &Uri) -> HashMap<String, String> {
    Query::<HashMap<String, String>>::try_from_uri(uri)
        .map(|Query(params)| params)
        .unwrap_or_default()
}

/// Run every task bound to every route whose method, path and verifier accept
/// the request, in registration order. Always answers 200 once authorized.
pub(crate) async fn dispatch(state: Arc<GatewayState>, request: Request) -> Response {
    let (parts, body) = request.into_parts();
    let query = query_params(&parts.uri);

    // API key via X-Api-Key header or ?apikey=
    if state.config.requires_api_key() {
        let from_header = parts
            .headers
            .get("X-Api-Key")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        let from_query = query.get("apikey").map(String::as_str).unwrap_or("");
        if from_header != state.config.api_key && from_query != state.config.api_key {
            tracing::warn!("[webhook] Rejected {} {}: bad api key", parts.method, parts.uri.path());
            return (StatusCode::FORBIDDEN, "Unauthorized.").into_response();
        }
    }

    let body = match read_body(body, state.config.body_limit_bytes).await {
        Ok(bytes) => bytes,
        Err(BodyError::TooLarge) => {
            tracing::warn!("[webhook] Body over limit on {}", parts.uri.path());
            return (StatusCode::PAYLOAD_TOO_LARGE, "Request body too large.").into_response();
        }
        Err(BodyError::Unreadable(e)) => {
            tracing::warn!("[webhook] Unreadable body on {}: {e}", parts.uri.path());
            return (StatusCode::BAD_REQUEST, "Unreadable request body.").into_response();
        }
    };

    let mut inbound =
        WebhookRequest::new(parts.method.as_str(), parts.uri.path()).with_body(body);
    for (name, value) in &parts.headers {
        if let Ok(value) = value.to_str() {
            inbound = inbound.with_header(name.as_str(), value);
        }
    }
    inbound.query = query;
    let request = Arc::new(inbound);

    let mut fired = 0usize;
    for (route, tasks) in state.snapshot() {
        if !route.matches(&request) || !route.verifier.verify(request.clone()).await {
            continue;
        }
        tracing::debug!(event_id = %route.event_id, "📨 Webhook '{}' matched", route.name);
        for task in &tasks {
            task.exec(Occurrence::Webhook(request.clone()));
            fired += 1;
        }
    }
    if fired == 0 {
        tracing::debug!("[webhook] No event accepted {} {}", request.method, request.path);
    }

    StatusCode::OK.into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_params_are_decoded() {
        let uri: Uri = "/hook?apikey=s%20ecret&id=7".parse().unwrap();
        let params = query_params(&uri);
        assert_eq!(params.get("apikey").map(String::as_str), Some("s ecret"));
        assert_eq!(params.get("id").map(String::as_str), Some("7"));
    }

    #[tokio::test]
    async fn test_read_body_limit_is_inclusive() {
        let body = read_body(Body::from("12345678"), 8).await.unwrap();
        assert_eq!(body, b"12345678");
        assert!(matches!(
            read_body(Body::from("123456789"), 8).await,
            Err(BodyError::TooLarge)
        ));
    }

    #[test]
    fn test_missing_query_is_empty() {
        let uri: Uri = "/hook".parse().unwrap();
        assert!(query_params(&uri).is_empty());
    }
}
