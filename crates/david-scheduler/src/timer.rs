//! Timer facility: run a callback after an arbitrary delay.
//!
//! The tokio timer wheel can only represent delays up to [`MAX_NATIVE_DELAY`]
//! (about 2.2 years). Longer delays fall back to a one-shot cron schedule at
//! the absolute wall-clock target, which is accurate to the second rather
//! than the millisecond. Both paths return a [`TimerHandle`] with the same
//! cancel operation.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, DurationRound, TimeDelta, Utc};
use tokio::task::AbortHandle;

use crate::cron::{CronSchedule, ScheduledJob, sleep_until_wall_clock};

/// Largest delay the native timer accepts: 2^36 - 2 milliseconds.
pub const MAX_NATIVE_DELAY: Duration = Duration::from_millis((1 << 36) - 2);

/// Callback run when a timer elapses.
pub type TimerCallback = Box<dyn FnOnce() + Send + 'static>;

/// Which mechanism backs a timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerKind {
    Native,
    WallClock,
}

enum TimerSource {
    Task(AbortHandle),
    Job(ScheduledJob),
}

/// Cancellable handle to a scheduled callback.
#[derive(Clone)]
pub struct TimerHandle {
    kind: TimerKind,
    source: Arc<TimerSource>,
    cancelled: Arc<AtomicBool>,
}

impl TimerHandle {
    pub fn kind(&self) -> TimerKind {
        self.kind
    }

    /// Prevent the callback from running. Idempotent; a no-op once fired.
    pub fn cancel(&self) {
        if self.cancelled.swap(true, Ordering::SeqCst) {
            return;
        }
        match &*self.source {
            TimerSource::Task(handle) => handle.abort(),
            TimerSource::Job(job) => job.stop(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Fired or cancelled.
    pub fn is_finished(&self) -> bool {
        match &*self.source {
            TimerSource::Task(handle) => handle.is_finished(),
            TimerSource::Job(job) => !job.is_running(),
        }
    }
}

impl std::fmt::Debug for TimerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimerHandle")
            .field("kind", &self.kind)
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

/// A way of running a callback once after a delay.
pub trait TimerStrategy: Send + Sync {
    fn kind(&self) -> TimerKind;
    fn schedule(&self, delay: Duration, callback: TimerCallback) -> TimerHandle;
}

/// `tokio::time::sleep` based timer, millisecond precision.
pub struct NativeDelay;

impl TimerStrategy for NativeDelay {
    fn kind(&self) -> TimerKind {
        TimerKind::Native
    }

    fn schedule(&self, delay: Duration, callback: TimerCallback) -> TimerHandle {
        let cancelled = Arc::new(AtomicBool::new(false));
        let guard = cancelled.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if !guard.load(Ordering::SeqCst) {
                callback();
            }
        });
        TimerHandle {
            kind: TimerKind::Native,
            source: Arc::new(TimerSource::Task(handle.abort_handle())),
            cancelled,
        }
    }
}

/// One-shot cron schedule at the absolute target time, second precision.
pub struct WallClockOnce;

impl TimerStrategy for WallClockOnce {
    fn kind(&self) -> TimerKind {
        TimerKind::WallClock
    }

    fn schedule(&self, delay: Duration, callback: TimerCallback) -> TimerHandle {
        let cancelled = Arc::new(AtomicBool::new(false));
        let target = wall_clock_target(delay);
        let expression = cron_expression_for(target);

        let source = match CronSchedule::parse(&expression) {
            Ok(schedule) => {
                tracing::debug!("⏳ Long timer scheduled for {target} ('{expression}')");
                let slot = Mutex::new(Some(callback));
                let guard = cancelled.clone();
                TimerSource::Job(ScheduledJob::new(
                    schedule,
                    move |_| {
                        let callback = crate::lock(&slot).take();
                        match callback {
                            Some(callback) if !guard.load(Ordering::SeqCst) => callback(),
                            _ => {}
                        }
                    },
                    true,
                ))
            }
            Err(e) => {
                // Out of the cron year range; wait on the wall clock directly.
                tracing::warn!("⚠️ Long timer for {target} cannot use cron ({e}), polling instead");
                let guard = cancelled.clone();
                let handle = tokio::spawn(async move {
                    sleep_until_wall_clock(target).await;
                    if !guard.load(Ordering::SeqCst) {
                        callback();
                    }
                });
                TimerSource::Task(handle.abort_handle())
            }
        };

        TimerHandle {
            kind: TimerKind::WallClock,
            source: Arc::new(source),
            cancelled,
        }
    }
}

/// `now + delay`, rounded up to the next whole second so the timer never
/// fires early.
fn wall_clock_target(delay: Duration) -> DateTime<Utc> {
    let delta = TimeDelta::from_std(delay).unwrap_or(TimeDelta::MAX);
    let target = Utc::now()
        .checked_add_signed(delta)
        .unwrap_or(DateTime::<Utc>::MAX_UTC);
    let floor = target
        .duration_trunc(TimeDelta::seconds(1))
        .unwrap_or(target);
    if floor < target {
        floor + TimeDelta::seconds(1)
    } else {
        floor
    }
}

/// One-shot 7-field cron expression `sec min hour dom month * year` for `at`.
pub fn cron_expression_for(at: DateTime<Utc>) -> String {
    at.format("%-S %-M %-H %-d %-m * %Y").to_string()
}

/// Picks a [`TimerStrategy`] by comparing the delay against a ceiling.
#[derive(Clone)]
pub struct Timer {
    ceiling: Duration,
    native: Arc<dyn TimerStrategy>,
    fallback: Arc<dyn TimerStrategy>,
}

impl Timer {
    /// Timer with a custom native ceiling.
    pub fn with_ceiling(ceiling: Duration) -> Self {
        Self {
            ceiling: ceiling.min(MAX_NATIVE_DELAY),
            native: Arc::new(NativeDelay),
            fallback: Arc::new(WallClockOnce),
        }
    }

    pub fn ceiling(&self) -> Duration {
        self.ceiling
    }

    pub fn strategy_for(&self, delay: Duration) -> &dyn TimerStrategy {
        if delay > self.ceiling {
            self.fallback.as_ref()
        } else {
            self.native.as_ref()
        }
    }

    /// Run `callback` once after `delay`.
    pub fn set_timeout<F>(&self, delay: Duration, callback: F) -> TimerHandle
    where
        F: FnOnce() + Send + 'static,
    {
        self.strategy_for(delay).schedule(delay, Box::new(callback))
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::with_ceiling(MAX_NATIVE_DELAY)
    }
}

/// Run `callback` once after `delay` using the default [`Timer`].
pub fn set_timeout<F>(delay: Duration, callback: F) -> TimerHandle
where
    F: FnOnce() + Send + 'static,
{
    Timer::default().set_timeout(delay, callback)
}

/// Cancel a timer returned by [`set_timeout`].
pub fn clear_timeout(handle: &TimerHandle) {
    handle.cancel();
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::sync::atomic::AtomicUsize;

    fn counter() -> (Arc<AtomicUsize>, impl FnOnce() + Send + 'static) {
        let hits = Arc::new(AtomicUsize::new(0));
        let inner = hits.clone();
        (hits, move || {
            inner.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn test_strategy_selection() {
        let timer = Timer::default();
        assert_eq!(timer.strategy_for(Duration::from_secs(60)).kind(), TimerKind::Native);
        assert_eq!(timer.strategy_for(MAX_NATIVE_DELAY).kind(), TimerKind::Native);
        assert_eq!(
            timer
                .strategy_for(MAX_NATIVE_DELAY + Duration::from_millis(1))
                .kind(),
            TimerKind::WallClock
        );
    }

    #[test]
    fn test_ceiling_is_capped() {
        let timer = Timer::with_ceiling(Duration::MAX);
        assert_eq!(timer.ceiling(), MAX_NATIVE_DELAY);
    }

    #[test]
    fn test_cron_expression_for() {
        let at = Utc.with_ymd_and_hms(2031, 3, 1, 9, 5, 7).unwrap();
        assert_eq!(cron_expression_for(at), "7 5 9 1 3 * 2031");
    }

    #[test]
    fn test_wall_clock_target_rounds_up() {
        let target = wall_clock_target(Duration::from_millis(1500));
        assert_eq!(target.timestamp_subsec_nanos(), 0);
        assert!(target >= Utc::now() + TimeDelta::milliseconds(1000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_native_fires_after_delay() {
        let (hits, callback) = counter();
        let handle = set_timeout(Duration::from_millis(500), callback);
        assert_eq!(handle.kind(), TimerKind::Native);

        tokio::time::sleep(Duration::from_millis(499)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        tokio::time::sleep(Duration::from_millis(2)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert!(handle.is_finished());
    }

    #[tokio::test(start_paused = true)]
    async fn test_native_cancel() {
        let (hits, callback) = counter();
        let handle = set_timeout(Duration::from_secs(5), callback);
        clear_timeout(&handle);
        clear_timeout(&handle);
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        assert!(handle.is_cancelled());
    }

    #[tokio::test]
    async fn test_wall_clock_fallback_fires() {
        let timer = Timer::with_ceiling(Duration::from_millis(10));
        let (hits, callback) = counter();
        let handle = timer.set_timeout(Duration::from_millis(1200), callback);
        assert_eq!(handle.kind(), TimerKind::WallClock);

        tokio::time::sleep(Duration::from_millis(3200)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert!(handle.is_finished());
    }

    #[tokio::test]
    async fn test_wall_clock_fallback_cancel() {
        let timer = Timer::with_ceiling(Duration::from_millis(10));
        let (hits, callback) = counter();
        let handle = timer.set_timeout(Duration::from_millis(1200), callback);
        handle.cancel();

        tokio::time::sleep(Duration::from_millis(2500)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        assert!(handle.is_finished());
    }
}
