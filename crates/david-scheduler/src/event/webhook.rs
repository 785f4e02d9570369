//! Inbound-request trigger routed by the webhook dispatcher.

use std::sync::{Arc, Mutex};

use david_core::{DavidError, Result};

use crate::dispatch::{Verifier, WebhookDispatcher, WebhookRoute};
use crate::lock;
use crate::task::Task;

use super::{Binding, Detach, EventId};

/// Matching criteria for a webhook event.
#[derive(Debug, Clone)]
pub struct WebhookSpec {
    /// Logical name, used in logs and errors.
    pub name: String,
    pub method: String,
    pub path: String,
    pub verifier: Verifier,
}

impl WebhookSpec {
    /// Accepts every request with a matching method and path.
    pub fn new(name: impl Into<String>, method: &str, path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            method: method.to_uppercase(),
            path: path.into(),
            verifier: Verifier::always(),
        }
    }

    pub fn with_verifier(mut self, verifier: Verifier) -> Self {
        self.verifier = verifier;
        self
    }
}

pub struct WebhookTrigger {
    spec: WebhookSpec,
    dispatcher: Mutex<Binding<Arc<dyn WebhookDispatcher>>>,
}

impl WebhookTrigger {
    pub(super) fn new(spec: WebhookSpec) -> Self {
        Self {
            spec,
            dispatcher: Mutex::new(Binding::Unconfigured),
        }
    }

    pub fn spec(&self) -> &WebhookSpec {
        &self.spec
    }

    pub fn set_dispatcher(&self, dispatcher: Arc<dyn WebhookDispatcher>) {
        *lock(&self.dispatcher) = Binding::Ready(dispatcher);
    }

    pub fn is_configured(&self) -> bool {
        lock(&self.dispatcher).is_ready()
    }

    /// Hand the route and task to the dispatcher; detaching removes the
    /// event's whole entry from it.
    pub(super) fn attach(&self, event_id: EventId, task: &Task) -> Result<Detach> {
        let dispatcher = match &*lock(&self.dispatcher) {
            Binding::Ready(dispatcher) => dispatcher.clone(),
            Binding::Unconfigured => {
                return Err(DavidError::MissingDispatcher {
                    event: self.spec.name.clone(),
                });
            }
        };

        dispatcher.register_event(
            WebhookRoute {
                event_id,
                name: self.spec.name.clone(),
                method: self.spec.method.to_uppercase(),
                path: self.spec.path.clone(),
                verifier: self.spec.verifier.clone(),
            },
            task.clone(),
        );
        tracing::info!(
            event_id = %event_id,
            "🌐 Webhook '{}' bound to {} {}",
            self.spec.name,
            self.spec.method,
            self.spec.path
        );

        Ok(Box::new(move || dispatcher.remove_event(event_id)))
    }
}

#[cfg(test)]
mod tests {
    use super::super::Event;
    use super::super::tests::counting;
    use super::*;
    use crate::dispatch::WebhookRequest;
    use crate::task::Occurrence;
    use std::collections::HashMap;
    use std::sync::atomic::Ordering;

    /// In-memory dispatcher that fires tasks synchronously.
    #[derive(Default)]
    struct RecordingDispatcher {
        routes: Mutex<HashMap<EventId, (WebhookRoute, Vec<Task>)>>,
    }

    impl RecordingDispatcher {
        async fn deliver(&self, request: WebhookRequest) {
            let request = Arc::new(request);
            let routes: Vec<_> = lock(&self.routes).values().cloned().collect();
            for (route, tasks) in routes {
                if route.matches(&request) && route.verifier.verify(request.clone()).await {
                    for task in &tasks {
                        task.exec(Occurrence::Webhook(request.clone()));
                    }
                }
            }
        }
    }

    impl WebhookDispatcher for RecordingDispatcher {
        fn register_event(&self, route: WebhookRoute, task: Task) {
            lock(&self.routes)
                .entry(route.event_id)
                .or_insert_with(|| (route, Vec::new()))
                .1
                .push(task);
        }

        fn remove_event(&self, event_id: EventId) {
            lock(&self.routes).remove(&event_id);
        }
    }

    fn twitter_event() -> Event {
        Event::webhook(
            WebhookSpec::new("liked a tweet", "post", "/webhooks/twitter")
                .with_verifier(Verifier::new(|req| req.body_text().contains("favorite_events"))),
        )
    }

    #[test]
    fn test_register_without_dispatcher_fails() {
        let (task, _) = counting("tweet");
        let err = twitter_event().register(&task).unwrap_err();
        assert!(matches!(err, DavidError::MissingDispatcher { ref event } if event == "liked a tweet"));
    }

    #[tokio::test]
    async fn test_dispatcher_routes_verified_requests() {
        let dispatcher = Arc::new(RecordingDispatcher::default());
        let event = twitter_event();
        let trigger = event.as_webhook().unwrap();
        assert!(!trigger.is_configured());
        trigger.set_dispatcher(dispatcher.clone());
        assert_eq!(trigger.spec().method, "POST");

        let (task, hits) = counting("tweet");
        let registration = event.register(&task).unwrap();

        dispatcher
            .deliver(
                WebhookRequest::new("POST", "/webhooks/twitter")
                    .with_body(r#"{"favorite_events":[]}"#),
            )
            .await;
        dispatcher
            .deliver(WebhookRequest::new("POST", "/webhooks/twitter").with_body("{}"))
            .await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        registration.unregister();
        assert!(lock(&dispatcher.routes).is_empty());
    }
}
