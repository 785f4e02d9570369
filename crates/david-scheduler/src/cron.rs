//! Calendar/cron collaborator.
//!
//! Expressions are parsed by the `cron` crate. Accepted shapes:
//! "MIN HOUR DOM MON DOW" (5-field, seconds implied 0),
//! "SEC MIN HOUR DOM MON DOW" (6-field) and a trailing YEAR (7-field).
//! Example: "0 8 * * *" = every day at 8:00
//!
//! [`ScheduledJob`] drives a schedule on the tokio runtime and can be created
//! paused, started later and stopped.

use std::str::FromStr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use david_core::{DavidError, Result};
use tokio::task::AbortHandle;

use crate::lock;

/// Longest single sleep while waiting for a wall-clock instant. Waking up
/// periodically keeps long waits honest across clock adjustments.
const WALL_CLOCK_POLL: Duration = Duration::from_secs(3600);

/// A parsed cron schedule.
#[derive(Debug, Clone)]
pub struct CronSchedule {
    expression: String,
    schedule: cron::Schedule,
}

impl CronSchedule {
    /// Parse a 5-, 6- or 7-field cron expression.
    pub fn parse(expression: &str) -> Result<Self> {
        let fields = expression.split_whitespace().count();
        let normalized = match fields {
            5 => format!("0 {}", expression.trim()),
            6 | 7 => expression.trim().to_string(),
            n => {
                return Err(DavidError::InvalidSchedule {
                    expression: expression.to_string(),
                    reason: format!("expected 5, 6 or 7 fields, got {n}"),
                });
            }
        };
        let schedule =
            cron::Schedule::from_str(&normalized).map_err(|e| DavidError::InvalidSchedule {
                expression: expression.to_string(),
                reason: e.to_string(),
            })?;
        Ok(Self {
            expression: expression.to_string(),
            schedule,
        })
    }

    /// The expression as given by the caller.
    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// First fire time strictly after `after`.
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedule.after(&after).next()
    }
}

/// Compute the next run time of `expression` after `after`.
pub fn next_run_from_cron(expression: &str, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
    match CronSchedule::parse(expression) {
        Ok(schedule) => schedule.next_after(after),
        Err(e) => {
            tracing::warn!("Invalid cron expression: {e}");
            None
        }
    }
}

/// Sleep until the wall clock reaches `target`, at most [`WALL_CLOCK_POLL`]
/// per underlying timer.
pub(crate) async fn sleep_until_wall_clock(target: DateTime<Utc>) {
    loop {
        let Ok(remaining) = (target - Utc::now()).to_std() else {
            return;
        };
        if remaining.is_zero() {
            return;
        }
        tokio::time::sleep(remaining.min(WALL_CLOCK_POLL)).await;
    }
}

type JobCallback = Arc<dyn Fn(DateTime<Utc>) + Send + Sync>;

enum JobState {
    Paused,
    Running(AbortHandle),
    Stopped,
}

struct JobInner {
    schedule: CronSchedule,
    callback: JobCallback,
    state: Mutex<JobState>,
}

/// Handle to a cron schedule driving a callback.
///
/// `stop()` is permanent: a stopped job ignores later `start()` calls.
#[derive(Clone)]
pub struct ScheduledJob {
    inner: Arc<JobInner>,
}

impl ScheduledJob {
    /// Create a job; when `running` is false it stays paused until `start()`.
    pub fn new<F>(schedule: CronSchedule, callback: F, running: bool) -> Self
    where
        F: Fn(DateTime<Utc>) + Send + Sync + 'static,
    {
        let job = Self {
            inner: Arc::new(JobInner {
                schedule,
                callback: Arc::new(callback),
                state: Mutex::new(JobState::Paused),
            }),
        };
        if running {
            job.start();
        }
        job
    }

    pub fn start(&self) {
        let mut state = lock(&self.inner.state);
        if !matches!(*state, JobState::Paused) {
            return;
        }
        let schedule = self.inner.schedule.clone();
        let callback = self.inner.callback.clone();
        tracing::debug!("▶️ Cron schedule '{}' started", schedule.expression());
        let handle = tokio::spawn(drive(schedule, callback));
        *state = JobState::Running(handle.abort_handle());
    }

    pub fn stop(&self) {
        let mut state = lock(&self.inner.state);
        if let JobState::Running(handle) = std::mem::replace(&mut *state, JobState::Stopped) {
            handle.abort();
            tracing::debug!(
                "⏹️ Cron schedule '{}' stopped",
                self.inner.schedule.expression()
            );
        }
    }

    /// Started, not stopped, and the schedule still has upcoming fire times.
    pub fn is_running(&self) -> bool {
        match &*lock(&self.inner.state) {
            JobState::Running(handle) => !handle.is_finished(),
            _ => false,
        }
    }

    pub fn is_stopped(&self) -> bool {
        matches!(*lock(&self.inner.state), JobState::Stopped)
    }

    pub fn schedule(&self) -> &CronSchedule {
        &self.inner.schedule
    }
}

async fn drive(schedule: CronSchedule, callback: JobCallback) {
    let mut after = Utc::now();
    while let Some(next) = schedule.next_after(after) {
        sleep_until_wall_clock(next).await;
        callback(next);
        after = next;
    }
    tracing::debug!("Cron schedule '{}' has no more fire times", schedule.expression());
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, TimeZone, Timelike};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_every_hour() {
        let after = Utc.with_ymd_and_hms(2026, 2, 22, 10, 30, 0).unwrap();
        let next = next_run_from_cron("0 * * * *", after).unwrap();
        assert_eq!(next.hour(), 11);
        assert_eq!(next.minute(), 0);
    }

    #[test]
    fn test_specific_time() {
        let after = Utc.with_ymd_and_hms(2026, 2, 22, 7, 0, 0).unwrap();
        let next = next_run_from_cron("0 8 * * *", after).unwrap();
        assert_eq!(next.hour(), 8);
        assert_eq!(next.minute(), 0);
    }

    #[test]
    fn test_every_15_minutes() {
        let after = Utc.with_ymd_and_hms(2026, 2, 22, 10, 2, 0).unwrap();
        let next = next_run_from_cron("*/15 * * * *", after).unwrap();
        assert_eq!(next.minute(), 15);
    }

    #[test]
    fn test_year_field_is_one_shot() {
        let schedule = CronSchedule::parse("30 15 9 1 3 * 2031").unwrap();
        let before = Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).unwrap();
        let at = schedule.next_after(before).unwrap();
        assert_eq!((at.year(), at.month(), at.day()), (2031, 3, 1));
        assert_eq!((at.hour(), at.minute(), at.second()), (9, 15, 30));
        assert!(schedule.next_after(at).is_none());
    }

    #[test]
    fn test_invalid_expression() {
        let after = Utc::now();
        assert!(next_run_from_cron("bad", after).is_none());
        let err = CronSchedule::parse("99 * * * * *").unwrap_err();
        assert!(matches!(err, DavidError::InvalidSchedule { .. }));
    }

    #[tokio::test]
    async fn test_paused_job_waits_for_start() {
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let job = ScheduledJob::new(
            CronSchedule::parse("* * * * * *").unwrap(),
            move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            },
            false,
        );

        tokio::time::sleep(Duration::from_millis(1200)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        assert!(!job.is_running());

        job.start();
        assert!(job.is_running());
        tokio::time::sleep(Duration::from_millis(2200)).await;
        assert!(hits.load(Ordering::SeqCst) >= 1);

        job.stop();
        let seen = hits.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(1200)).await;
        assert_eq!(hits.load(Ordering::SeqCst), seen);
        assert!(job.is_stopped());
    }

    #[tokio::test]
    async fn test_stop_is_permanent() {
        let job = ScheduledJob::new(CronSchedule::parse("* * * * * *").unwrap(), |_| {}, false);
        job.stop();
        job.start();
        assert!(!job.is_running());
        assert!(job.is_stopped());
    }
}
