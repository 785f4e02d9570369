//! Orchestrator: owns the event → tasks registry and wires everything at start.
//!
//! `on()` only records bindings; nothing attaches until `start()`. Start
//! resolves provider groups (failing before any event attaches), injects
//! providers and the webhook dispatcher, registers every task in call order
//! and finally opens the HTTP listener, so no request is routed before the
//! table is complete.
//!
//! One `David` owns its registry. Running several instances against the same
//! log sources delivers every log to each of them.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use david_core::{DavidConfig, DavidError, Result};
use david_gateway::{Router, WebhookServer};
use david_scheduler::{Event, EventChain, EventId, LogSource, Registration, Task};

/// Events accepted by [`David::on`]: a single event, a chain or a list.
#[derive(Debug, Clone, Default)]
pub struct EventSet(Vec<Event>);

impl EventSet {
    pub fn events(&self) -> &[Event] {
        &self.0
    }
}

impl From<Event> for EventSet {
    fn from(event: Event) -> Self {
        Self(vec![event])
    }
}

impl From<&Event> for EventSet {
    fn from(event: &Event) -> Self {
        Self(vec![event.clone()])
    }
}

impl From<EventChain> for EventSet {
    fn from(chain: EventChain) -> Self {
        Self(chain.into_iter().collect())
    }
}

impl From<Vec<Event>> for EventSet {
    fn from(events: Vec<Event>) -> Self {
        Self(events)
    }
}

impl<const N: usize> From<[Event; N]> for EventSet {
    fn from(events: [Event; N]) -> Self {
        Self(events.into())
    }
}

/// Log sources accepted by [`David::register_provider`].
#[derive(Clone, Default)]
pub struct ProviderSet(Vec<Arc<dyn LogSource>>);

impl ProviderSet {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Arc<dyn LogSource>> for ProviderSet {
    fn from(source: Arc<dyn LogSource>) -> Self {
        Self(vec![source])
    }
}

impl<S: LogSource + 'static> From<Arc<S>> for ProviderSet {
    fn from(source: Arc<S>) -> Self {
        Self(vec![source as Arc<dyn LogSource>])
    }
}

impl From<Vec<Arc<dyn LogSource>>> for ProviderSet {
    fn from(sources: Vec<Arc<dyn LogSource>>) -> Self {
        Self(sources)
    }
}

impl<S: LogSource + 'static> From<Vec<Arc<S>>> for ProviderSet {
    fn from(sources: Vec<Arc<S>>) -> Self {
        Self(
            sources
                .into_iter()
                .map(|source| source as Arc<dyn LogSource>)
                .collect(),
        )
    }
}

/// Binds tasks to events and starts them.
///
/// ```no_run
/// # async fn run() -> david::Result<()> {
/// use david::{David, Event, Occurrence, Task};
/// use std::time::Duration;
///
/// let mut dave = David::default();
/// dave.on(
///     Event::interval(Duration::from_secs(5)),
///     Task::from_fn("heartbeat", |_: Occurrence| {
///         tracing::info!("still alive");
///         Ok(())
///     }),
/// );
/// dave.start().await?;
/// # Ok(())
/// # }
/// ```
pub struct David {
    config: DavidConfig,
    custom_routes: Router,
    /// Insertion-ordered registry; `index` maps an event id to its slot.
    entries: Vec<(Event, Vec<Task>)>,
    index: HashMap<EventId, usize>,
    providers: HashMap<String, Vec<Arc<dyn LogSource>>>,
    registrations: Vec<Registration>,
    dispatcher: Option<Arc<WebhookServer>>,
    started: bool,
}

impl David {
    pub fn new(config: DavidConfig) -> Self {
        Self {
            config,
            custom_routes: Router::new(),
            entries: Vec::new(),
            index: HashMap::new(),
            providers: HashMap::new(),
            registrations: Vec::new(),
            dispatcher: None,
            started: false,
        }
    }

    /// Extra HTTP endpoints served next to webhook events. Only used when a
    /// webhook listener is configured.
    pub fn with_routes(mut self, routes: Router) -> Self {
        self.custom_routes = self.custom_routes.merge(routes);
        self
    }

    pub fn config(&self) -> &DavidConfig {
        &self.config
    }

    /// Run `task` whenever any of `events` fires. Repeated calls with the same
    /// event accumulate tasks; they fire in call order.
    pub fn on(&mut self, events: impl Into<EventSet>, task: Task) -> &mut Self {
        for event in events.into().0 {
            let slot = match self.index.get(&event.id()) {
                Some(&slot) => slot,
                None => {
                    self.index.insert(event.id(), self.entries.len());
                    self.entries.push((event, Vec::new()));
                    self.entries.len() - 1
                }
            };
            self.entries[slot].1.push(task.clone());
        }
        self
    }

    /// Add log sources under a provider group name, appending to any sources
    /// already registered under it.
    pub fn register_provider(
        &mut self,
        name: impl Into<String>,
        sources: impl Into<ProviderSet>,
    ) -> &mut Self {
        let name = name.into();
        let sources = sources.into().0;
        tracing::debug!("📡 Provider group '{name}' += {} source(s)", sources.len());
        self.providers.entry(name).or_default().extend(sources);
        self
    }

    /// Number of distinct events bound so far.
    pub fn event_count(&self) -> usize {
        self.entries.len()
    }

    /// Tasks bound to `event`, in firing order.
    pub fn tasks_for(&self, event: &Event) -> &[Task] {
        match self.index.get(&event.id()) {
            Some(&slot) => &self.entries[slot].1,
            None => &[],
        }
    }

    pub fn provider_count(&self, name: &str) -> usize {
        self.providers.get(name).map_or(0, Vec::len)
    }

    /// Active registrations created by `start()`.
    pub fn registrations(&self) -> &[Registration] {
        &self.registrations
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    pub fn webhook_server(&self) -> Option<&Arc<WebhookServer>> {
        self.dispatcher.as_ref()
    }

    /// Address the webhook listener is bound to, once started.
    pub fn webhook_addr(&self) -> Option<SocketAddr> {
        self.dispatcher.as_ref().and_then(|server| server.local_addr())
    }

    /// Wire and attach every bound event.
    ///
    /// Configuration errors abort startup and detach whatever was already
    /// attached. Task failures never surface here.
    pub async fn start(&mut self) -> Result<()> {
        if self.started {
            return Err(DavidError::AlreadyStarted);
        }

        // Every provider group and webhook listener must resolve before
        // anything attaches: a once event fires during registration.
        let mut resolved = Vec::new();
        for (event, _) in &self.entries {
            if let Some(trigger) = event.as_webhook() {
                if self.config.webhook.is_none() {
                    return Err(DavidError::MissingDispatcher {
                        event: trigger.spec().name.clone(),
                    });
                }
            }
            if let Some(trigger) = event.as_onchain() {
                let sources = self.providers.get(trigger.provider_name()).ok_or_else(|| {
                    DavidError::UnknownProvider {
                        name: trigger.provider_name().to_string(),
                    }
                })?;
                resolved.push((event.clone(), sources.clone()));
            }
        }
        for (event, sources) in resolved {
            if let Some(trigger) = event.as_onchain() {
                trigger.set_providers(sources);
            }
        }

        let dispatcher = self.config.webhook.clone().map(|config| {
            Arc::new(WebhookServer::new(config).with_routes(self.custom_routes.clone()))
        });
        if let Some(server) = &dispatcher {
            for (event, _) in &self.entries {
                if let Some(trigger) = event.as_webhook() {
                    trigger.set_dispatcher(server.clone());
                }
            }
        }

        let mut registrations = Vec::new();
        for (event, tasks) in &self.entries {
            for task in tasks {
                match event.register(task) {
                    Ok(registration) => registrations.push(registration),
                    Err(e) => {
                        tracing::error!("❌ Failed to register '{}': {e}", task.name());
                        registrations.iter().for_each(Registration::unregister);
                        return Err(e);
                    }
                }
            }
        }

        if let Some(server) = &dispatcher {
            if let Err(e) = server.start().await {
                registrations.iter().for_each(Registration::unregister);
                return Err(e);
            }
        }

        tracing::info!(
            "🚀 David started: {} event(s), {} registration(s)",
            self.entries.len(),
            registrations.len()
        );
        self.registrations = registrations;
        self.dispatcher = dispatcher;
        self.started = true;
        Ok(())
    }

    /// Detach every registration and stop the webhook listener. In-flight
    /// task executions run to completion.
    pub async fn shutdown(&mut self) {
        for registration in self.registrations.drain(..) {
            registration.unregister();
        }
        if let Some(server) = self.dispatcher.take() {
            server.shutdown().await;
        }
        tracing::info!("🛑 David stopped");
    }
}

impl Default for David {
    fn default() -> Self {
        Self::new(DavidConfig::default())
    }
}
