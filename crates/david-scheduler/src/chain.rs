//! OR-grouping of events sharing one task.

use crate::event::Event;

/// Ordered list of events. Binding a task to a chain binds it to every
/// member independently: any member firing runs the task.
#[derive(Debug, Clone)]
pub struct EventChain {
    events: Vec<Event>,
}

impl EventChain {
    pub fn new(first: Event) -> Self {
        Self {
            events: vec![first],
        }
    }

    /// Append `event`, builder style: `a.and(&b).and(&c)`.
    pub fn and(mut self, event: &Event) -> Self {
        self.events.push(event.clone());
        self
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

impl IntoIterator for EventChain {
    type Item = Event;
    type IntoIter = std::vec::IntoIter<Event>;

    fn into_iter(self) -> Self::IntoIter {
        self.events.into_iter()
    }
}

impl From<Event> for EventChain {
    fn from(event: Event) -> Self {
        Self::new(event)
    }
}
