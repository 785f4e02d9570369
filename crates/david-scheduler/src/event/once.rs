//! One-shot trigger.

use crate::task::{Occurrence, Task};
use crate::timer::set_timeout;

use super::{Detach, Event};

/// Fire inline when the start time is absent or past, else after the delay.
///
/// There is nothing to detach: once scheduled, the firing is not withdrawn.
pub(super) fn attach(event: &Event, task: &Task) -> Detach {
    let delay = event.time_until_start();
    if delay.is_zero() {
        task.exec(Occurrence::scheduled_now());
    } else {
        tracing::debug!(event_id = %event.id(), "⏳ Once event fires in {delay:?}");
        let task = task.clone();
        set_timeout(delay, move || task.exec(Occurrence::scheduled_now()));
    }
    Box::new(|| {})
}

#[cfg(test)]
mod tests {
    use super::super::tests::counting;
    use super::*;
    use chrono::{TimeDelta, Utc};
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    #[test]
    fn test_fires_during_register_without_start() {
        let (task, hits) = counting("now");
        // No runtime needed: the task runs inline.
        Event::once().register(&task).unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fires_once_after_start() {
        let (task, hits) = counting("later");
        let event = Event::once().starting_at(Utc::now() + TimeDelta::milliseconds(300));
        event.register(&task).unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_millis(250)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_past_start_fires_immediately() {
        let (task, hits) = counting("past");
        let event = Event::once().starting_at(Utc::now() - TimeDelta::seconds(10));
        let registration = event.register(&task).unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        registration.unregister();
        registration.unregister();
    }
}
