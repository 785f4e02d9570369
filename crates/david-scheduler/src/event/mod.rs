//! Events: "when do I fire" plus "how do I attach to my trigger source".
//!
//! An [`Event`] is a cloneable handle over a closed set of trigger kinds.
//! `register` attaches one task to the underlying source and returns a
//! [`Registration`] holding the detach closure. When an end time is set, a
//! timer calls that same closure at the end time.

mod cron;
mod interval;
mod onchain;
mod once;
mod webhook;

use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use david_core::Result;
use uuid::Uuid;

use crate::chain::EventChain;
use crate::cron::CronSchedule;
use crate::lock;
use crate::task::{Task, TaskId};
use crate::timer::{TimerHandle, set_timeout};

pub use onchain::{OnchainSpec, OnchainTrigger};
pub use webhook::{WebhookSpec, WebhookTrigger};

/// Unique event identity.
pub type EventId = Uuid;

/// Closure that detaches one registration from its trigger source.
pub(crate) type Detach = Box<dyn FnOnce() + Send + 'static>;

/// State of a dependency injected after construction.
#[derive(Clone)]
pub enum Binding<T> {
    Unconfigured,
    Ready(T),
}

impl<T> Binding<T> {
    pub fn is_ready(&self) -> bool {
        matches!(self, Binding::Ready(_))
    }

    pub fn get(&self) -> Option<&T> {
        match self {
            Binding::Ready(value) => Some(value),
            Binding::Unconfigured => None,
        }
    }
}

impl<T> Default for Binding<T> {
    fn default() -> Self {
        Binding::Unconfigured
    }
}

/// The trigger source behind an event.
pub enum EventKind {
    /// Fires a single time, at the start time or on registration.
    Once,
    /// Fires every `Duration` from the start time.
    Interval(Duration),
    /// Fires on a calendar schedule.
    Cron(CronSchedule),
    /// Fires on contract logs delivered by a named provider group.
    Onchain(OnchainTrigger),
    /// Fires on inbound HTTP requests routed by the webhook dispatcher.
    Webhook(WebhookTrigger),
}

impl EventKind {
    pub fn name(&self) -> &'static str {
        match self {
            EventKind::Once => "once",
            EventKind::Interval(_) => "interval",
            EventKind::Cron(_) => "cron",
            EventKind::Onchain(_) => "onchain",
            EventKind::Webhook(_) => "webhook",
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct EventWindow {
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
}

struct EventInner {
    id: EventId,
    window: RwLock<EventWindow>,
    kind: EventKind,
}

/// Trigger definition. Cheap to clone; clones share identity and window.
///
/// `start <= end` is the caller's responsibility and is not checked.
#[derive(Clone)]
pub struct Event {
    inner: Arc<EventInner>,
}

impl Event {
    fn from_kind(kind: EventKind) -> Self {
        Self {
            inner: Arc::new(EventInner {
                id: Uuid::new_v4(),
                window: RwLock::new(EventWindow::default()),
                kind,
            }),
        }
    }

    /// Fire once, at the start time if set, else on registration.
    pub fn once() -> Self {
        Self::from_kind(EventKind::Once)
    }

    /// Fire every `every`, beginning one period after the start.
    pub fn interval(every: Duration) -> Self {
        Self::from_kind(EventKind::Interval(every))
    }

    /// Fire on a cron schedule ("0 8 * * *", "*/5 * * * * *", ...).
    pub fn cron(expression: &str) -> Result<Self> {
        let schedule = CronSchedule::parse(expression)?;
        Ok(Self::from_kind(EventKind::Cron(schedule)))
    }

    /// Fire on logs from the provider group named in `spec`.
    pub fn onchain(spec: OnchainSpec) -> Self {
        Self::from_kind(EventKind::Onchain(OnchainTrigger::new(spec)))
    }

    /// Fire on inbound requests matching `spec`.
    pub fn webhook(spec: WebhookSpec) -> Self {
        Self::from_kind(EventKind::Webhook(WebhookTrigger::new(spec)))
    }

    pub fn starting_at(self, at: DateTime<Utc>) -> Self {
        self.set_start_time(Some(at));
        self
    }

    pub fn ending_at(self, at: DateTime<Utc>) -> Self {
        self.set_end_time(Some(at));
        self
    }

    pub fn set_start_time(&self, at: Option<DateTime<Utc>>) {
        self.window_mut(|window| window.start = at);
    }

    pub fn set_end_time(&self, at: Option<DateTime<Utc>>) {
        self.window_mut(|window| window.end = at);
    }

    fn window_mut(&self, update: impl FnOnce(&mut EventWindow)) {
        let mut window = self
            .inner
            .window
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        update(&mut window);
    }

    fn window(&self) -> EventWindow {
        *self
            .inner
            .window
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    pub fn id(&self) -> EventId {
        self.inner.id
    }

    pub fn kind(&self) -> &EventKind {
        &self.inner.kind
    }

    pub fn kind_name(&self) -> &'static str {
        self.inner.kind.name()
    }

    pub fn start_time(&self) -> Option<DateTime<Utc>> {
        self.window().start
    }

    pub fn end_time(&self) -> Option<DateTime<Utc>> {
        self.window().end
    }

    /// Zero when there is no start time or it has passed.
    pub fn time_until_start(&self) -> Duration {
        self.start_time().map_or(Duration::ZERO, remaining)
    }

    /// `None` when there is no end time (never ends); zero once it has passed.
    pub fn time_until_end(&self) -> Option<Duration> {
        self.end_time().map(remaining)
    }

    pub fn as_onchain(&self) -> Option<&OnchainTrigger> {
        match &self.inner.kind {
            EventKind::Onchain(trigger) => Some(trigger),
            _ => None,
        }
    }

    pub fn as_webhook(&self) -> Option<&WebhookTrigger> {
        match &self.inner.kind {
            EventKind::Webhook(trigger) => Some(trigger),
            _ => None,
        }
    }

    /// Chain containing exactly this event and `other`.
    pub fn and(&self, other: &Event) -> EventChain {
        EventChain::new(self.clone()).and(other)
    }

    /// Attach `task` to this event's trigger source.
    ///
    /// Every call attaches independently: registering the same event twice
    /// produces two source attachments and two end-time detach timers.
    /// Must be called from within a tokio runtime.
    pub fn register(&self, task: &Task) -> Result<Registration> {
        let detach = match &self.inner.kind {
            EventKind::Once => once::attach(self, task),
            EventKind::Interval(every) => interval::attach(self, *every, task),
            EventKind::Cron(schedule) => cron::attach(self, schedule, task),
            EventKind::Onchain(trigger) => trigger.attach(self.id(), task)?,
            EventKind::Webhook(trigger) => trigger.attach(self.id(), task)?,
        };
        tracing::debug!(
            event_id = %self.id(),
            task_id = %task.id(),
            "🔗 Task '{}' registered to {} event",
            task.name(),
            self.kind_name()
        );

        let registration = Registration::new(self.id(), task.id(), detach);
        if let Some(delay) = self.time_until_end() {
            let expiring = registration.clone();
            let kind = self.kind_name();
            let handle = set_timeout(delay, move || {
                tracing::info!(
                    event_id = %expiring.event_id(),
                    "⌛ {kind} event reached its end time, detaching"
                );
                expiring.unregister();
            });
            registration.set_expiry(handle);
        }
        Ok(registration)
    }
}

fn remaining(at: DateTime<Utc>) -> Duration {
    (at - Utc::now()).to_std().unwrap_or(Duration::ZERO)
}

impl std::fmt::Debug for Event {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let window = self.window();
        f.debug_struct("Event")
            .field("id", &self.inner.id)
            .field("kind", &self.kind_name())
            .field("start", &window.start)
            .field("end", &window.end)
            .finish()
    }
}

impl PartialEq for Event {
    fn eq(&self, other: &Self) -> bool {
        self.inner.id == other.inner.id
    }
}

impl Eq for Event {}

struct RegistrationInner {
    event_id: EventId,
    task_id: TaskId,
    detach: Mutex<Option<Detach>>,
    expiry: Mutex<Option<TimerHandle>>,
}

/// One (event, task) attachment.
///
/// `unregister` is idempotent and safe to call before the task ever fired.
/// Dropping a registration does not detach it.
#[derive(Clone)]
pub struct Registration {
    inner: Arc<RegistrationInner>,
}

impl Registration {
    pub(crate) fn new(event_id: EventId, task_id: TaskId, detach: Detach) -> Self {
        Self {
            inner: Arc::new(RegistrationInner {
                event_id,
                task_id,
                detach: Mutex::new(Some(detach)),
                expiry: Mutex::new(None),
            }),
        }
    }

    fn set_expiry(&self, handle: TimerHandle) {
        if self.is_active() {
            *lock(&self.inner.expiry) = Some(handle);
        } else {
            handle.cancel();
        }
    }

    pub fn event_id(&self) -> EventId {
        self.inner.event_id
    }

    pub fn task_id(&self) -> TaskId {
        self.inner.task_id
    }

    pub fn is_active(&self) -> bool {
        lock(&self.inner.detach).is_some()
    }

    /// Detach from the trigger source and cancel the end-time timer.
    pub fn unregister(&self) {
        let expiry = lock(&self.inner.expiry).take();
        if let Some(expiry) = expiry {
            expiry.cancel();
        }
        let detach = lock(&self.inner.detach).take();
        if let Some(detach) = detach {
            detach();
            tracing::debug!(
                event_id = %self.inner.event_id,
                task_id = %self.inner.task_id,
                "🔌 Registration detached"
            );
        }
    }
}

impl std::fmt::Debug for Registration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registration")
            .field("event_id", &self.inner.event_id)
            .field("task_id", &self.inner.task_id)
            .field("active", &self.is_active())
            .finish()
    }
}
