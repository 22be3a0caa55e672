//! Per-identity buffer of pending significant events.
//!
//! While a reconciliation is in flight, events for the same identity
//! accumulate here. Multiple pending events of the same kind collapse to
//! the most recently enqueued one, so a burst of N raw events costs at most
//! one buffered entry per kind and exactly one follow-up reconciliation.

use crate::event::{Event, EventKind};

/// Ordered buffer of not-yet-processed events for one identity.
///
/// Memory is bounded by the number of distinct event kinds, not by the raw
/// event rate.
#[derive(Debug, Default)]
pub struct EventBuffer {
    events: Vec<Event>,
}

impl EventBuffer {
    /// Create an empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue an event, collapsing any pending event of the same kind.
    ///
    /// The newest event of a kind always wins and sits at the insertion end
    /// of the buffer.
    pub fn enqueue(&mut self, event: Event) {
        self.events.retain(|pending| pending.kind != event.kind);
        self.events.push(event);
    }

    /// The most recently enqueued event of the given kind, if any.
    ///
    /// "Latest" means insertion order, not the event's timestamp field; the
    /// two can diverge when the watch stream reorders delivery.
    pub fn latest_of_kind(&self, kind: EventKind) -> Option<&Event> {
        self.events.iter().rev().find(|event| event.kind == kind)
    }

    /// Whether any events are pending.
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Number of pending events (at most one per kind).
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Whether a deletion is among the pending events.
    pub fn has_deletion(&self) -> bool {
        self.events
            .iter()
            .any(|event| event.kind == EventKind::Deleted)
    }

    /// Consolidate all pending events into a single delivery and clear the
    /// buffer.
    ///
    /// A pending deletion takes priority; otherwise the most recently
    /// enqueued event is delivered. Returns `None` when nothing is pending.
    pub fn drain_for_execution(&mut self) -> Option<Event> {
        if self.events.is_empty() {
            return None;
        }
        let deletion = self
            .events
            .iter()
            .rposition(|event| event.kind == EventKind::Deleted);
        let index = deletion.unwrap_or(self.events.len().saturating_sub(1));
        let chosen = self.events.get(index).cloned();
        self.events.clear();
        chosen
    }
}
