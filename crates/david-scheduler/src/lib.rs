//! # David Scheduler
//!
//! Event/task dispatch engine: binds callback tasks to trigger sources and
//! detaches them again at an optional end time.
//!
//! ## Architecture
//! ```text
//! Event ── register(task) ──► Registration (unregister)
//!   ├── Once      → Timer (native delay | wall-clock cron one-shot)
//!   ├── Interval  → Timer → tokio interval
//!   ├── Cron      → ScheduledJob (paused until start)
//!   ├── Onchain   → LogSource × N → DedupCache → Task
//!   └── Webhook   → WebhookDispatcher (HTTP gateway) → Verifier → Task
//!
//! Task.exec(occurrence)
//!   └── errors and panics caught + logged, never propagated
//! ```

use std::sync::{Mutex, MutexGuard, PoisonError};

pub mod chain;
pub mod cron;
pub mod dedup;
pub mod dispatch;
pub mod event;
pub mod provider;
pub mod task;
pub mod timer;

pub use chain::EventChain;
pub use crate::cron::{CronSchedule, ScheduledJob, next_run_from_cron};
pub use dedup::{DEDUP_BLOCK_WINDOW, DedupCache};
pub use dispatch::{Verifier, WebhookDispatcher, WebhookRequest, WebhookRoute};
pub use event::{
    Binding, Event, EventId, EventKind, OnchainSpec, OnchainTrigger, Registration, WebhookSpec,
    WebhookTrigger,
};
pub use provider::{
    Contract, LocalLogSource, LogEntry, LogFilter, LogListener, LogSource, SubscriptionId,
};
pub use task::{Occurrence, Task, TaskId};
pub use timer::{MAX_NATIVE_DELAY, Timer, TimerHandle, TimerKind, TimerStrategy, set_timeout};

/// Lock a mutex, recovering the data if a panicking holder poisoned it.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
