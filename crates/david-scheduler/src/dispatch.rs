//! Webhook dispatch seam: request type, verifier predicate and the
//! dispatcher trait implemented by the HTTP gateway.
//!
//! The dispatcher owns the listener. For every inbound request it checks each
//! registered route's method, path and verifier, and fires every task bound
//! to each matching route.

use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::FutureExt;
use futures::future::BoxFuture;
use serde::de::DeserializeOwned;

use crate::event::EventId;
use crate::task::Task;

/// An inbound webhook request, as seen by verifiers and tasks.
#[derive(Debug, Clone)]
pub struct WebhookRequest {
    /// Uppercase HTTP method.
    pub method: String,
    pub path: String,
    pub query: HashMap<String, String>,
    /// Header names are lowercase.
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
    pub received_at: DateTime<Utc>,
}

impl WebhookRequest {
    pub fn new(method: &str, path: &str) -> Self {
        Self {
            method: method.to_uppercase(),
            path: path.to_string(),
            query: HashMap::new(),
            headers: HashMap::new(),
            body: Vec::new(),
            received_at: Utc::now(),
        }
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.insert(name.to_lowercase(), value.to_string());
        self
    }

    pub fn with_query(mut self, name: &str, value: &str) -> Self {
        self.query.insert(name.to_string(), value.to_string());
        self
    }

    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_lowercase()).map(String::as_str)
    }

    pub fn query_param(&self, name: &str) -> Option<&str> {
        self.query.get(name).map(String::as_str)
    }

    pub fn body_text(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }

    /// Deserialize the body as JSON.
    pub fn json<T: DeserializeOwned>(&self) -> serde_json::Result<T> {
        serde_json::from_slice(&self.body)
    }
}

type VerifyFn = dyn Fn(Arc<WebhookRequest>) -> BoxFuture<'static, bool> + Send + Sync;

/// Predicate deciding whether a matched request should fire the event's tasks.
/// May be synchronous or asynchronous.
#[derive(Clone)]
pub struct Verifier(Arc<VerifyFn>);

impl Verifier {
    /// Accept every request that matches method and path.
    pub fn always() -> Self {
        Self::new(|_| true)
    }

    /// Synchronous predicate.
    pub fn new<F>(predicate: F) -> Self
    where
        F: Fn(&WebhookRequest) -> bool + Send + Sync + 'static,
    {
        Self(Arc::new(move |request: Arc<WebhookRequest>| {
            futures::future::ready(predicate(&request)).boxed()
        }))
    }

    /// Asynchronous predicate.
    pub fn new_async<F, Fut>(predicate: F) -> Self
    where
        F: Fn(Arc<WebhookRequest>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = bool> + Send + 'static,
    {
        Self(Arc::new(move |request: Arc<WebhookRequest>| {
            predicate(request).boxed()
        }))
    }

    /// Accept requests whose `header` carries `hex(sha256(secret + body))`.
    pub fn sha256_signature(secret: impl Into<String>, header: impl Into<String>) -> Self {
        use sha2::{Digest, Sha256};

        let secret = secret.into();
        let header = header.into();
        Self::new(move |request| {
            let Some(signature) = request.header(&header) else {
                tracing::warn!("[webhook] Missing {header} header on {}", request.path);
                return false;
            };
            let mut hasher = Sha256::new();
            hasher.update(secret.as_bytes());
            hasher.update(&request.body);
            let expected = format!("{:x}", hasher.finalize());
            if expected != signature.to_lowercase() {
                tracing::warn!("[webhook] Invalid signature on {}", request.path);
                return false;
            }
            true
        })
    }

    /// Evaluate the predicate. A panicking verifier counts as a rejection.
    pub async fn verify(&self, request: Arc<WebhookRequest>) -> bool {
        let path = request.path.clone();
        let invoked = std::panic::catch_unwind(AssertUnwindSafe(|| (self.0)(request)));
        let outcome = match invoked {
            Ok(future) => AssertUnwindSafe(future).catch_unwind().await,
            Err(panic) => Err(panic),
        };
        match outcome {
            Ok(accepted) => accepted,
            Err(panic) => {
                tracing::warn!(
                    "⚠️ Verifier for {path} panicked: {}",
                    crate::task::panic_message(panic.as_ref())
                );
                false
            }
        }
    }
}

impl std::fmt::Debug for Verifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Verifier")
    }
}

/// Matching criteria a webhook event hands to the dispatcher.
#[derive(Debug, Clone)]
pub struct WebhookRoute {
    pub event_id: EventId,
    /// Logical event name, used in logs.
    pub name: String,
    pub method: String,
    pub path: String,
    pub verifier: Verifier,
}

impl WebhookRoute {
    /// Method (case-insensitive) and exact path match.
    pub fn matches(&self, request: &WebhookRequest) -> bool {
        self.method.eq_ignore_ascii_case(&request.method) && self.path == request.path
    }
}

/// The webhook dispatcher collaborator.
///
/// `register_event` appends `task` to the route's task list (creating the
/// entry on first use); `remove_event` drops the whole entry.
pub trait WebhookDispatcher: Send + Sync {
    fn register_event(&self, route: WebhookRoute, task: Task);
    fn remove_event(&self, event_id: EventId);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> Arc<WebhookRequest> {
        Arc::new(
            WebhookRequest::new("post", "/webhooks/twitter")
                .with_header("Content-Type", "application/json")
                .with_query("crc_token", "abc")
                .with_body(r#"{"favorite_events":[{"user":"elon"}]}"#),
        )
    }

    #[test]
    fn test_request_helpers() {
        let req = request();
        assert_eq!(req.method, "POST");
        assert_eq!(req.header("content-type"), Some("application/json"));
        assert_eq!(req.header("CONTENT-TYPE"), Some("application/json"));
        assert_eq!(req.query_param("crc_token"), Some("abc"));
        let body: serde_json::Value = req.json().unwrap();
        assert_eq!(body["favorite_events"][0]["user"], "elon");
        assert!(req.body_text().contains("favorite_events"));
    }

    #[test]
    fn test_route_matching() {
        let route = WebhookRoute {
            event_id: uuid::Uuid::new_v4(),
            name: "liked a tweet".into(),
            method: "POST".into(),
            path: "/webhooks/twitter".into(),
            verifier: Verifier::always(),
        };
        assert!(route.matches(&request()));
        assert!(!route.matches(&WebhookRequest::new("GET", "/webhooks/twitter")));
        assert!(!route.matches(&WebhookRequest::new("POST", "/webhooks/other")));
    }

    #[tokio::test]
    async fn test_sync_and_async_verifiers() {
        let sync = Verifier::new(|req| req.body_text().contains("elon"));
        assert!(sync.verify(request()).await);

        let async_verifier = Verifier::new_async(|req: Arc<WebhookRequest>| async move {
            tokio::task::yield_now().await;
            req.query_param("crc_token") == Some("nope")
        });
        assert!(!async_verifier.verify(request()).await);
    }

    #[tokio::test]
    async fn test_panicking_verifier_rejects() {
        let verifier = Verifier::new(|_| panic!("bad verifier"));
        assert!(!verifier.verify(request()).await);
    }

    #[tokio::test]
    async fn test_sha256_signature() {
        use sha2::{Digest, Sha256};

        let body = r#"{"content":"hi"}"#;
        let mut hasher = Sha256::new();
        hasher.update(format!("s3cret{body}"));
        let signature = format!("{:x}", hasher.finalize());

        let verifier = Verifier::sha256_signature("s3cret", "X-Webhook-Signature");
        let signed = WebhookRequest::new("POST", "/hook")
            .with_header("X-Webhook-Signature", &signature)
            .with_body(body);
        assert!(verifier.verify(Arc::new(signed)).await);

        let forged = WebhookRequest::new("POST", "/hook")
            .with_header("X-Webhook-Signature", "deadbeef")
            .with_body(body);
        assert!(!verifier.verify(Arc::new(forged)).await);

        let unsigned = WebhookRequest::new("POST", "/hook").with_body(body);
        assert!(!verifier.verify(Arc::new(unsigned)).await);
    }
}
