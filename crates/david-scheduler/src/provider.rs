//! Log providers: the data-source collaborator behind on-chain events.
//!
//! A provider delivers contract log entries to subscribed listeners. Several
//! providers may be registered under one group name as redundant sources, in
//! which case the same logical log reaches a listener once per provider; the
//! on-chain event deduplicates.

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

use crate::lock;

/// Address + ABI of the contract an on-chain event watches.
///
/// The ABI is kept opaque; decoding log data is left to providers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Contract {
    pub address: String,
    #[serde(default)]
    pub abi: serde_json::Value,
}

impl Contract {
    pub fn new(address: impl Into<String>, abi: serde_json::Value) -> Self {
        Self {
            address: address.into(),
            abi,
        }
    }
}

/// Which logs a listener wants.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LogFilter {
    pub address: String,
    pub event_name: String,
}

impl LogFilter {
    pub fn new(address: impl Into<String>, event_name: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            event_name: event_name.into(),
        }
    }

    /// Addresses compare case-insensitively (checksummed vs lowercase hex).
    pub fn matches(&self, entry: &LogEntry) -> bool {
        self.address.eq_ignore_ascii_case(&entry.address) && self.event_name == entry.event_name
    }
}

/// One contract log as delivered by a provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub address: String,
    pub event_name: String,
    pub block_number: u64,
    pub transaction_hash: String,
    /// Position of the log within its block.
    pub log_index: u64,
    /// Decoded arguments, provider-defined.
    #[serde(default)]
    pub data: serde_json::Value,
}

/// Listener handed to providers. The same listener may be subscribed to many
/// providers at once.
pub type LogListener = Arc<dyn Fn(LogEntry) + Send + Sync>;

/// Handle returned by [`LogSource::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub u64);

/// The data-source collaborator.
pub trait LogSource: Send + Sync {
    /// Provider name, used in logs.
    fn name(&self) -> &str;

    /// Start delivering logs matching `filter` to `listener`.
    fn subscribe(&self, filter: LogFilter, listener: LogListener) -> SubscriptionId;

    /// Stop a subscription. Unknown ids are ignored.
    fn unsubscribe(&self, id: SubscriptionId);
}

struct Subscription {
    id: SubscriptionId,
    filter: LogFilter,
    listener: LogListener,
}

/// In-process provider fed through [`LocalLogSource::emit`].
///
/// Adapters that receive logs elsewhere (RPC polling, websockets, queues)
/// push them through `emit`; tests use it directly.
pub struct LocalLogSource {
    name: String,
    next_id: AtomicU64,
    subscriptions: Mutex<Vec<Subscription>>,
}

impl LocalLogSource {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            next_id: AtomicU64::new(1),
            subscriptions: Mutex::new(Vec::new()),
        }
    }

    /// Convenience constructor returning a shareable handle.
    pub fn shared(name: impl Into<String>) -> Arc<Self> {
        Arc::new(Self::new(name))
    }

    /// Deliver `entry` to every matching listener. Returns how many listeners
    /// were invoked.
    ///
    /// Listener panics are caught and logged here, at the boundary where the
    /// provider hands control to the dispatch engine.
    pub fn emit(&self, entry: LogEntry) -> usize {
        let listeners: Vec<LogListener> = lock(&self.subscriptions)
            .iter()
            .filter(|s| s.filter.matches(&entry))
            .map(|s| s.listener.clone())
            .collect();

        for listener in &listeners {
            let delivery = entry.clone();
            if let Err(panic) = std::panic::catch_unwind(AssertUnwindSafe(|| listener(delivery))) {
                tracing::error!(
                    provider = %self.name,
                    "💥 Log listener panicked on block {}: {}",
                    entry.block_number,
                    crate::task::panic_message(panic.as_ref())
                );
            }
        }
        listeners.len()
    }

    pub fn subscriber_count(&self) -> usize {
        lock(&self.subscriptions).len()
    }
}

impl LogSource for LocalLogSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn subscribe(&self, filter: LogFilter, listener: LogListener) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        tracing::debug!(
            provider = %self.name,
            "📡 Subscribed to {} on {}",
            filter.event_name,
            filter.address
        );
        lock(&self.subscriptions).push(Subscription {
            id,
            filter,
            listener,
        });
        id
    }

    fn unsubscribe(&self, id: SubscriptionId) {
        lock(&self.subscriptions).retain(|s| s.id != id);
    }
}
