//! Task definitions: the unit of work bound to one or more events.
//!
//! A task wraps a user callback with an identity and a failure boundary:
//! errors and panics raised by the callback (synchronously or from the
//! returned future) are caught here, logged with the task id and name, and
//! never reach the trigger source or sibling tasks.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use futures::FutureExt;
use futures::future::BoxFuture;
use uuid::Uuid;

use crate::dispatch::WebhookRequest;
use crate::provider::LogEntry;

/// Unique task identity.
pub type TaskId = Uuid;

/// One concrete firing of a trigger source, handed to the task callback.
#[derive(Debug, Clone)]
pub enum Occurrence {
    /// A timer, interval tick or cron tick.
    Scheduled { at: DateTime<Utc> },
    /// An on-chain log entry (already deduplicated).
    Log(LogEntry),
    /// An inbound webhook request that matched and passed its verifier.
    Webhook(Arc<WebhookRequest>),
}

impl Occurrence {
    /// A scheduled occurrence stamped with the current time.
    pub fn scheduled_now() -> Self {
        Occurrence::Scheduled { at: Utc::now() }
    }

    pub fn as_log(&self) -> Option<&LogEntry> {
        match self {
            Occurrence::Log(entry) => Some(entry),
            _ => None,
        }
    }

    pub fn as_webhook(&self) -> Option<&WebhookRequest> {
        match self {
            Occurrence::Webhook(request) => Some(request),
            _ => None,
        }
    }

    /// Short label for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Occurrence::Scheduled { .. } => "scheduled",
            Occurrence::Log(_) => "log",
            Occurrence::Webhook(_) => "webhook",
        }
    }
}

type TaskFuture = BoxFuture<'static, anyhow::Result<()>>;
type TaskFn = dyn Fn(Occurrence) -> TaskFuture + Send + Sync;

struct TaskInner {
    id: TaskId,
    name: String,
    callback: Box<TaskFn>,
    run_count: AtomicU64,
}

/// Contains the work to execute when an event is triggered.
///
/// Cheap to clone; clones share identity.
#[derive(Clone)]
pub struct Task {
    inner: Arc<TaskInner>,
}

impl Task {
    /// Create a task from an async callback.
    pub fn new<F, Fut>(name: impl Into<String>, callback: F) -> Self
    where
        F: Fn(Occurrence) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        Self::from_boxed(
            name.into(),
            Box::new(move |occurrence: Occurrence| callback(occurrence).boxed()),
        )
    }

    /// Create a task from a plain synchronous callback.
    pub fn from_fn<F>(name: impl Into<String>, callback: F) -> Self
    where
        F: Fn(Occurrence) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        Self::from_boxed(
            name.into(),
            Box::new(move |occurrence: Occurrence| {
                futures::future::ready(callback(occurrence)).boxed()
            }),
        )
    }

    fn from_boxed(name: String, callback: Box<TaskFn>) -> Self {
        Self {
            inner: Arc::new(TaskInner {
                id: Uuid::new_v4(),
                name,
                callback,
                run_count: AtomicU64::new(0),
            }),
        }
    }

    pub fn id(&self) -> TaskId {
        self.inner.id
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// How many times this task has been invoked.
    pub fn run_count(&self) -> u64 {
        self.inner.run_count.load(Ordering::Relaxed)
    }

    /// Fire the task. Never blocks on the task and never fails.
    ///
    /// The callback is invoked inline, so its synchronous part (and any async
    /// work that completes without suspending) runs before `exec` returns. A
    /// future that suspends is spawned onto the current tokio runtime.
    pub fn exec(&self, occurrence: Occurrence) {
        self.inner.run_count.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(
            task_id = %self.inner.id,
            task = %self.inner.name,
            "▶️ Task fired ({})",
            occurrence.kind()
        );

        let invoked =
            std::panic::catch_unwind(AssertUnwindSafe(|| (self.inner.callback)(occurrence)));
        let future = match invoked {
            Ok(future) => future,
            Err(panic) => {
                self.report(Err(panic));
                return;
            }
        };

        let mut guarded = AssertUnwindSafe(future).catch_unwind();
        if let Some(outcome) = (&mut guarded).now_or_never() {
            self.report(outcome);
            return;
        }

        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                let task = self.clone();
                runtime.spawn(async move {
                    let outcome = guarded.await;
                    task.report(outcome);
                });
            }
            Err(_) => {
                tracing::error!(
                    task_id = %self.inner.id,
                    task = %self.inner.name,
                    "❌ Task suspended outside a tokio runtime and was dropped"
                );
            }
        }
    }

    fn report(&self, outcome: Result<anyhow::Result<()>, Box<dyn Any + Send>>) {
        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::error!(
                    task_id = %self.inner.id,
                    task = %self.inner.name,
                    "❌ Task {} failed with error: {e:#}",
                    self.inner.name
                );
            }
            Err(panic) => {
                tracing::error!(
                    task_id = %self.inner.id,
                    task = %self.inner.name,
                    "💥 Task {} panicked: {}",
                    self.inner.name,
                    panic_message(panic.as_ref())
                );
            }
        }
    }
}

impl std::fmt::Debug for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.inner.id)
            .field("name", &self.inner.name)
            .finish()
    }
}

impl PartialEq for Task {
    fn eq(&self, other: &Self) -> bool {
        self.inner.id == other.inner.id
    }
}

impl Eq for Task {}

pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}
