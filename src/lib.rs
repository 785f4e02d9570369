//! # David
//!
//! Bind callback tasks to one-shot, interval, cron, on-chain log and webhook
//! triggers, with automatic detach at an optional end time.
//!
//! ```text
//! David::on(event | chain | list, task)   → registry (event → tasks)
//! David::register_provider(name, sources) → provider groups
//! David::start()
//!   ├── resolve provider groups (UnknownProvider aborts)
//!   ├── inject providers + webhook dispatcher
//!   ├── Event::register(task) for every binding, in order
//!   └── start the webhook listener last
//! ```

pub mod orchestrator;

pub use orchestrator::{David, EventSet, ProviderSet};

pub use david_core::{DavidConfig, DavidError, Result, WebhookConfig};
pub use david_gateway::{Router, WebhookServer};
pub use david_scheduler::{
    Contract, CronSchedule, EventChain, EventId, EventKind, LocalLogSource, LogEntry, LogFilter,
    LogSource, Occurrence, OnchainSpec, Registration, SubscriptionId, Task, TaskId, Timer,
    TimerHandle, Verifier, WebhookDispatcher, WebhookRequest, WebhookSpec, set_timeout,
};
pub use david_scheduler::{Event, MAX_NATIVE_DELAY};
