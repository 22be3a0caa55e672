//! Change notification types.
//!
//! `WatchEvent` is the raw inbound shape from the watch/cache collaborator;
//! `Event` is the internal, immutable record the dispatch core buffers per
//! identity once a notification has passed significance filtering.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::resource::{Resource, ResourceIdentity, ResourceVersion};

/// Unique identifier for an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventId(Ulid);

impl EventId {
    /// Create a new random event ID.
    pub fn new() -> Self {
        Self(Ulid::new())
    }

    /// Get the inner ULID.
    pub fn as_ulid(&self) -> Ulid {
        self.0
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for EventId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Raw change kind reported by the watch stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChangeKind {
    /// Resource appeared (or was re-delivered on a resync).
    Added,
    /// Resource changed.
    Modified,
    /// Resource was removed from the external store's view.
    Deleted,
}

/// Kinds of buffered events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    /// A resource was added.
    Added,
    /// A resource was updated.
    Updated,
    /// A resource was deleted or marked for deletion.
    Deleted,
    /// Timer-triggered re-check (requeue or retry).
    Timer,
    /// Manually requested reconciliation.
    Manual,
}

impl From<ChangeKind> for EventKind {
    fn from(kind: ChangeKind) -> Self {
        match kind {
            ChangeKind::Added => Self::Added,
            ChangeKind::Modified => Self::Updated,
            ChangeKind::Deleted => Self::Deleted,
        }
    }
}

/// Inbound notification from the watch/cache collaborator.
///
/// Delivery is at-least-once and may be reordered per identity; the dispatch
/// core tolerates duplicates and gaps. Resync re-delivers current state as
/// synthetic `Added`/`Modified` events.
#[derive(Debug, Clone)]
pub struct WatchEvent<R: Resource> {
    /// What happened.
    pub kind: ChangeKind,
    /// Snapshot before the change, when known.
    pub previous: Option<R>,
    /// Snapshot after the change. `None` only for `Deleted`.
    pub current: Option<R>,
}

impl<R: Resource> WatchEvent<R> {
    /// An `Added` notification.
    pub fn added(resource: R) -> Self {
        Self {
            kind: ChangeKind::Added,
            previous: None,
            current: Some(resource),
        }
    }

    /// A `Modified` notification.
    pub fn modified(previous: R, current: R) -> Self {
        Self {
            kind: ChangeKind::Modified,
            previous: Some(previous),
            current: Some(current),
        }
    }

    /// A `Deleted` notification carrying the last known snapshot.
    pub fn deleted(last_known: R) -> Self {
        Self {
            kind: ChangeKind::Deleted,
            previous: Some(last_known),
            current: None,
        }
    }

    /// Identity of the resource this notification refers to.
    ///
    /// Returns `None` when neither snapshot is present (a malformed
    /// notification the caller should drop).
    pub fn identity(&self) -> Option<ResourceIdentity> {
        self.current
            .as_ref()
            .or(self.previous.as_ref())
            .map(Resource::identity)
    }

    /// The most recent snapshot carried by this notification.
    pub fn latest_snapshot(&self) -> Option<&R> {
        self.current.as_ref().or(self.previous.as_ref())
    }
}

/// Immutable internal event buffered per identity.
///
/// Events for the same identity are comparable by recency only; the buffer
/// collapses multiple pending events of the same kind to the latest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Event ID.
    pub id: EventId,
    /// Identity the event refers to.
    pub identity: ResourceIdentity,
    /// Event kind.
    pub kind: EventKind,
    /// Version of the resource observed when the event was produced.
    pub observed_version: Option<ResourceVersion>,
    /// When the event was produced.
    pub timestamp: DateTime<Utc>,
}

impl Event {
    /// Create a new event.
    pub fn new(
        identity: ResourceIdentity,
        kind: EventKind,
        observed_version: Option<ResourceVersion>,
    ) -> Self {
        Self {
            id: EventId::new(),
            identity,
            kind,
            observed_version,
            timestamp: Utc::now(),
        }
    }

    /// A timer-triggered re-check event.
    pub fn timer(identity: ResourceIdentity) -> Self {
        Self::new(identity, EventKind::Timer, None)
    }

    /// A manual trigger event.
    pub fn manual(identity: ResourceIdentity) -> Self {
        Self::new(identity, EventKind::Manual, None)
    }
}
