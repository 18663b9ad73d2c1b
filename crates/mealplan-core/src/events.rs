//! Typed publish/subscribe between the sync layer and its consumers
//!
//! Handlers are registered per [`EventKind`] (or for every event) and called
//! synchronously from whichever task publishes. The handler list is copied
//! out before dispatch so a handler may itself subscribe, unsubscribe or
//! publish.

use std::sync::{Arc, Mutex, PoisonError};

use chrono::NaiveDate;

use crate::id::{EntityId, LocalId};
use crate::models::{HiddenCalendarEvent, HiddenEventKey, Item, Note};
use crate::status::ConnectionStatus;

/// Something the UI layer may want to redraw for
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    /// A note was replaced wholesale
    NoteUpdated(Note),
    /// One item of a note was patched
    ItemUpdated { date: NaiveDate, item: Item },
    /// Calendar events were replaced for these dates
    CalendarRefreshed { dates: Vec<NaiveDate> },
    EventHidden(HiddenCalendarEvent),
    EventUnhidden(HiddenEventKey),
    /// A pantry item changed or was deleted
    PantryUpdated { id: EntityId, deleted: bool },
    MealIdeasUpdated { id: EntityId, deleted: bool },
    /// A locally-created entity received its server id
    IdResolved { local: LocalId, remote: EntityId },
    StatusChanged(ConnectionStatus),
}

impl SyncEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            SyncEvent::NoteUpdated(_) => EventKind::NoteUpdated,
            SyncEvent::ItemUpdated { .. } => EventKind::ItemUpdated,
            SyncEvent::CalendarRefreshed { .. } => EventKind::CalendarRefreshed,
            SyncEvent::EventHidden(_) => EventKind::EventHidden,
            SyncEvent::EventUnhidden(_) => EventKind::EventUnhidden,
            SyncEvent::PantryUpdated { .. } => EventKind::PantryUpdated,
            SyncEvent::MealIdeasUpdated { .. } => EventKind::MealIdeasUpdated,
            SyncEvent::IdResolved { .. } => EventKind::IdResolved,
            SyncEvent::StatusChanged(_) => EventKind::StatusChanged,
        }
    }
}

/// Discriminant of [`SyncEvent`], used as the subscription key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    NoteUpdated,
    ItemUpdated,
    CalendarRefreshed,
    EventHidden,
    EventUnhidden,
    PantryUpdated,
    MealIdeasUpdated,
    IdResolved,
    StatusChanged,
}

type Handler = Arc<dyn Fn(&SyncEvent) + Send + Sync>;

/// Token returned by [`EventBus::subscribe`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Subscription(u64);

#[derive(Default)]
struct Registry {
    next_id: u64,
    handlers: Vec<(u64, Option<EventKind>, Handler)>,
}

/// Cloneable handle to a shared handler registry
#[derive(Clone, Default)]
pub struct EventBus {
    registry: Arc<Mutex<Registry>>,
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let count = self.registry.lock().map(|r| r.handlers.len()).unwrap_or(0);
        f.debug_struct("EventBus").field("handlers", &count).finish()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Call `handler` for every published event of `kind`
    pub fn subscribe(
        &self,
        kind: EventKind,
        handler: impl Fn(&SyncEvent) + Send + Sync + 'static,
    ) -> Subscription {
        self.register(Some(kind), Arc::new(handler))
    }

    /// Call `handler` for every published event
    pub fn subscribe_all(&self, handler: impl Fn(&SyncEvent) + Send + Sync + 'static) -> Subscription {
        self.register(None, Arc::new(handler))
    }

    fn register(&self, kind: Option<EventKind>, handler: Handler) -> Subscription {
        let mut registry = self.registry.lock().unwrap_or_else(PoisonError::into_inner);
        registry.next_id += 1;
        let id = registry.next_id;
        registry.handlers.push((id, kind, handler));
        Subscription(id)
    }

    /// Remove a handler; returns false if it was already gone
    pub fn unsubscribe(&self, subscription: Subscription) -> bool {
        let mut registry = self.registry.lock().unwrap_or_else(PoisonError::into_inner);
        let before = registry.handlers.len();
        registry.handlers.retain(|(id, _, _)| *id != subscription.0);
        registry.handlers.len() != before
    }

    pub fn publish(&self, event: &SyncEvent) {
        let kind = event.kind();
        let handlers: Vec<Handler> = {
            let registry = self.registry.lock().unwrap_or_else(PoisonError::into_inner);
            registry
                .handlers
                .iter()
                .filter(|(_, filter, _)| filter.map_or(true, |k| k == kind))
                .map(|(_, _, handler)| Arc::clone(handler))
                .collect()
        };

        for handler in handlers {
            handler(event);
        }
    }
}
