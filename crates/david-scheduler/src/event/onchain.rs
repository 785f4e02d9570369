//! Contract-log trigger fed by a named group of redundant providers.

use std::sync::{Arc, Mutex};

use david_core::{DavidError, Result};
use uuid::Uuid;

use crate::dedup::{DedupCache, fingerprint};
use crate::lock;
use crate::provider::{Contract, LogEntry, LogFilter, LogListener, LogSource};
use crate::task::{Occurrence, Task};

use super::{Binding, Detach, EventId};

/// What an on-chain event watches.
#[derive(Debug, Clone)]
pub struct OnchainSpec {
    /// Provider group name, resolved by the orchestrator at start.
    pub provider: String,
    pub contract: Contract,
    pub event_name: String,
}

impl OnchainSpec {
    pub fn new(
        provider: impl Into<String>,
        contract: Contract,
        event_name: impl Into<String>,
    ) -> Self {
        Self {
            provider: provider.into(),
            contract,
            event_name: event_name.into(),
        }
    }
}

/// On-chain trigger state: the injected provider handles and the dedup cache
/// shared by every registration of the event.
pub struct OnchainTrigger {
    spec: OnchainSpec,
    providers: Mutex<Binding<Vec<Arc<dyn LogSource>>>>,
    dedup: Arc<Mutex<DedupCache>>,
}

impl OnchainTrigger {
    pub(super) fn new(spec: OnchainSpec) -> Self {
        Self {
            spec,
            providers: Mutex::new(Binding::Unconfigured),
            dedup: Arc::new(Mutex::new(DedupCache::new())),
        }
    }

    pub fn spec(&self) -> &OnchainSpec {
        &self.spec
    }

    pub fn provider_name(&self) -> &str {
        &self.spec.provider
    }

    /// Inject the live handles for the provider group, one per redundant source.
    pub fn set_providers(&self, providers: Vec<Arc<dyn LogSource>>) {
        if providers.is_empty() {
            tracing::warn!(
                "⚠️ Provider group '{}' is empty; {} will never fire",
                self.spec.provider,
                self.spec.event_name
            );
        }
        *lock(&self.providers) = Binding::Ready(providers);
    }

    pub fn is_configured(&self) -> bool {
        lock(&self.providers).is_ready()
    }

    /// Subscribe one listener to every provider. The listener drops repeats
    /// of a log already seen through another provider.
    pub(super) fn attach(&self, event_id: EventId, task: &Task) -> Result<Detach> {
        let providers = match &*lock(&self.providers) {
            Binding::Ready(providers) => providers.clone(),
            Binding::Unconfigured => {
                return Err(DavidError::MissingProviders {
                    event: self.spec.event_name.clone(),
                });
            }
        };

        let correlation = Uuid::new_v4();
        let dedup = self.dedup.clone();
        let task = task.clone();
        let listener: LogListener = Arc::new(move |entry: LogEntry| {
            let fresh = lock(&dedup).observe(entry.block_number, fingerprint(correlation, &entry));
            if !fresh {
                tracing::debug!(
                    event_id = %event_id,
                    "🔁 Duplicate log {}#{} in block {} suppressed",
                    entry.transaction_hash,
                    entry.log_index,
                    entry.block_number
                );
                return;
            }
            task.exec(Occurrence::Log(entry));
        });

        let filter = LogFilter::new(&self.spec.contract.address, &self.spec.event_name);
        let subscriptions: Vec<_> = providers
            .into_iter()
            .map(|provider| {
                let id = provider.subscribe(filter.clone(), listener.clone());
                (provider, id)
            })
            .collect();
        tracing::info!(
            event_id = %event_id,
            "📡 Listening for {} on {} via {} provider(s) of '{}'",
            self.spec.event_name,
            self.spec.contract.address,
            subscriptions.len(),
            self.spec.provider
        );

        Ok(Box::new(move || {
            for (provider, id) in subscriptions {
                provider.unsubscribe(id);
            }
        }))
    }
}
