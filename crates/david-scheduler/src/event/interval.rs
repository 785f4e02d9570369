//! Fixed-period trigger.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::AbortHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::lock;
use crate::task::{Occurrence, Task};
use crate::timer::{TimerHandle, set_timeout};

use super::{Detach, Event};

const MIN_PERIOD: Duration = Duration::from_millis(1);

/// Exactly one of the start delay or the ticker is live at a time.
enum Phase {
    Idle,
    Waiting(TimerHandle),
    Ticking(AbortHandle),
    Stopped,
}

pub(super) fn attach(event: &Event, every: Duration, task: &Task) -> Detach {
    let every = if every < MIN_PERIOD {
        tracing::warn!(event_id = %event.id(), "⚠️ Interval {every:?} too short, using {MIN_PERIOD:?}");
        MIN_PERIOD
    } else {
        every
    };

    let phase = Arc::new(Mutex::new(Phase::Idle));
    let delay = event.time_until_start();
    {
        // Held while the start timer is created so an early fire waits for
        // the Waiting state to be recorded.
        let mut current = lock(&phase);
        if delay.is_zero() {
            *current = Phase::Ticking(spawn_ticker(every, task.clone()));
        } else {
            let shared = phase.clone();
            let task = task.clone();
            let handle = set_timeout(delay, move || {
                let mut current = lock(&shared);
                if matches!(*current, Phase::Waiting(_)) {
                    *current = Phase::Ticking(spawn_ticker(every, task));
                }
            });
            *current = Phase::Waiting(handle);
        }
    }

    Box::new(move || {
        let previous = std::mem::replace(&mut *lock(&phase), Phase::Stopped);
        match previous {
            Phase::Waiting(handle) => handle.cancel(),
            Phase::Ticking(ticker) => ticker.abort(),
            Phase::Idle | Phase::Stopped => {}
        }
    })
}

/// First tick one period from now, then every period. Late ticks shift the
/// schedule instead of bursting.
fn spawn_ticker(every: Duration, task: Task) -> AbortHandle {
    tracing::debug!(task = %task.name(), "🔁 Interval ticking every {every:?}");
    let handle = tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(Instant::now() + every, every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            task.exec(Occurrence::scheduled_now());
        }
    });
    handle.abort_handle()
}

#[cfg(test)]
mod tests {
    use super::super::tests::counting;
    use super::*;
    use chrono::{TimeDelta, Utc};
    use std::sync::atomic::Ordering;

    #[tokio::test(start_paused = true)]
    async fn test_fires_every_period() {
        let (task, hits) = counting("tick");
        let registration = Event::interval(Duration::from_millis(200))
            .register(&task)
            .unwrap();

        tokio::time::sleep(Duration::from_millis(1_050)).await;
        assert!(hits.load(Ordering::SeqCst) >= 5);
        registration.unregister();
    }

    #[tokio::test(start_paused = true)]
    async fn test_unregister_stops_ticks() {
        let (task, hits) = counting("tick");
        let registration = Event::interval(Duration::from_millis(100))
            .register(&task)
            .unwrap();

        tokio::time::sleep(Duration::from_millis(350)).await;
        registration.unregister();
        let seen = hits.load(Ordering::SeqCst);
        assert_eq!(seen, 3);

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(hits.load(Ordering::SeqCst), seen);
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_time_delays_first_tick() {
        let (task, hits) = counting("delayed");
        let event = Event::interval(Duration::from_millis(100))
            .starting_at(Utc::now() + TimeDelta::milliseconds(1_000));
        let registration = event.register(&task).unwrap();

        tokio::time::sleep(Duration::from_millis(1_050)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        registration.unregister();
    }

    #[tokio::test(start_paused = true)]
    async fn test_unregister_before_start_cancels() {
        let (task, hits) = counting("never");
        let event = Event::interval(Duration::from_millis(100))
            .starting_at(Utc::now() + TimeDelta::milliseconds(500));
        let registration = event.register(&task).unwrap();
        registration.unregister();

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_period_is_clamped() {
        let (task, hits) = counting("fast");
        let registration = Event::interval(Duration::ZERO).register(&task).unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        registration.unregister();
        assert!(hits.load(Ordering::SeqCst) >= 5);
    }
}
