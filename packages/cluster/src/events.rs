//! View-change events and the subscriber registry.
//!
//! Subscribers register callbacks per event kind. The registry snapshots
//! the callback list under its own lock and fires outside every lock, so
//! a callback can safely call back into the cluster.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use vigil_core::{ConfigurationId, Endpoint};

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

/// The subscription keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// A stable batch left the watermark buffer, before it was applied.
    ViewChangeProposal,
    /// A new view was installed.
    ViewChange,
    /// A member entered the view.
    NodeAdded,
    /// A member left the view.
    NodeRemoved,
}

/// Snapshot of a committed view change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViewChangeSummary {
    pub configuration_id: ConfigurationId,
    pub members: Vec<Endpoint>,
    pub added: Vec<Endpoint>,
    pub removed: Vec<Endpoint>,
}

/// An event delivered to subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClusterEvent {
    ViewChangeProposal {
        /// The configuration the proposal was made under.
        configuration_id: ConfigurationId,
        subjects: Vec<Endpoint>,
    },
    ViewChange(ViewChangeSummary),
    NodeAdded(Endpoint),
    NodeRemoved(Endpoint),
}

impl ClusterEvent {
    /// The subscription key this event is delivered under.
    #[must_use]
    pub fn kind(&self) -> EventKind {
        match self {
            Self::ViewChangeProposal { .. } => EventKind::ViewChangeProposal,
            Self::ViewChange(_) => EventKind::ViewChange,
            Self::NodeAdded(_) => EventKind::NodeAdded,
            Self::NodeRemoved(_) => EventKind::NodeRemoved,
        }
    }
}

// ---------------------------------------------------------------------------
// SubscriberRegistry
// ---------------------------------------------------------------------------

type Callback = Arc<dyn Fn(&ClusterEvent) + Send + Sync>;

/// Event kind to ordered callback list.
#[derive(Default)]
pub struct SubscriberRegistry {
    subscribers: Mutex<HashMap<EventKind, Vec<Callback>>>,
}

impl SubscriberRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a callback for an event kind. Callbacks fire in
    /// registration order.
    pub fn subscribe<F>(&self, kind: EventKind, callback: F)
    where
        F: Fn(&ClusterEvent) + Send + Sync + 'static,
    {
        self.subscribers
            .lock()
            .entry(kind)
            .or_default()
            .push(Arc::new(callback));
    }

    /// Delivers an event to every subscriber of its kind. The registry
    /// lock is released before the first callback runs.
    pub fn fire(&self, event: &ClusterEvent) {
        let snapshot: Vec<Callback> = {
            let subscribers = self.subscribers.lock();
            subscribers
                .get(&event.kind())
                .map(|list| list.clone())
                .unwrap_or_default()
        };
        for callback in snapshot {
            callback(event);
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
