//! Calendar trigger backed by [`ScheduledJob`].

use crate::cron::{CronSchedule, ScheduledJob};
use crate::task::{Occurrence, Task};
use crate::timer::set_timeout;

use super::{Detach, Event};

/// Create the job running, or paused with an activation timer when the start
/// time lies ahead.
pub(super) fn attach(event: &Event, schedule: &CronSchedule, task: &Task) -> Detach {
    let delay = event.time_until_start();
    let fire = task.clone();
    let job = ScheduledJob::new(
        schedule.clone(),
        move |at| fire.exec(Occurrence::Scheduled { at }),
        delay.is_zero(),
    );

    let activation = if delay.is_zero() {
        None
    } else {
        tracing::debug!(
            event_id = %event.id(),
            "⏳ Cron '{}' activates in {delay:?}",
            schedule.expression()
        );
        let job = job.clone();
        Some(set_timeout(delay, move || job.start()))
    };

    Box::new(move || {
        if let Some(activation) = activation {
            activation.cancel();
        }
        job.stop();
    })
}

#[cfg(test)]
mod tests {
    use super::super::tests::counting;
    use super::*;
    use chrono::{TimeDelta, Utc};
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    #[tokio::test]
    async fn test_every_second_fires_and_stops() {
        let (task, hits) = counting("cron");
        let registration = Event::cron("* * * * * *").unwrap().register(&task).unwrap();

        tokio::time::sleep(Duration::from_millis(2_300)).await;
        registration.unregister();
        let seen = hits.load(Ordering::SeqCst);
        assert!(seen >= 2, "expected at least two ticks, got {seen}");

        tokio::time::sleep(Duration::from_millis(1_200)).await;
        assert_eq!(hits.load(Ordering::SeqCst), seen);
    }

    #[tokio::test]
    async fn test_paused_until_start() {
        let (task, hits) = counting("cron-later");
        let event = Event::cron("* * * * * *")
            .unwrap()
            .starting_at(Utc::now() + TimeDelta::milliseconds(1_500));
        let registration = event.register(&task).unwrap();

        tokio::time::sleep(Duration::from_millis(1_400)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_millis(1_700)).await;
        assert!(hits.load(Ordering::SeqCst) >= 1);
        registration.unregister();
    }

    #[tokio::test]
    async fn test_unregister_before_activation() {
        let (task, hits) = counting("cron-cancelled");
        let event = Event::cron("* * * * * *")
            .unwrap()
            .starting_at(Utc::now() + TimeDelta::milliseconds(500));
        event.register(&task).unwrap().unregister();

        tokio::time::sleep(Duration::from_millis(2_000)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }
}
