//! Optimistic mutation layer
//!
//! Entry point for every user action. Each mutation:
//!
//! 1. applies to the in-memory state,
//! 2. persists to the local store,
//! 3. when online, is sent immediately through the sync engine's dispatch,
//!    and is queued if that fails,
//! 4. when offline, is queued directly.
//!
//! A mutation whose subject already has queued changes, or targets an
//! entity whose create has not been confirmed, is queued behind them
//! instead of overtaking them. Failures never surface beyond "queued".

pub mod edit;

use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use thiserror::Error;
use tracing::{debug, warn};

use crate::api::ApiRetryClass;
use crate::connectivity::Connectivity;
use crate::events::{EventBus, SyncEvent};
use crate::id::EntityId;
use crate::models::{
    CalendarEvent, Entity, EntityKind, HiddenCalendarEvent, HiddenEventKey, HideRequest, Item,
    MealIdea, Note, PantryItem,
};
use crate::status::ConnectionStatus;
use crate::storage::{LocalStore, StorageError, StorageResult, StoreTx};
use crate::sync::{Change, Step, Subject, SyncEngine, SyncError};
use crate::view::AppState;

pub use edit::{EditState, NoteEditor};

/// Errors rejecting a mutation before anything is applied
#[derive(Debug, Error)]
pub enum MutationError {
    #[error("{0} cannot be empty")]
    EmptyField(&'static str),

    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("Cannot move a meal line to the day it is already on")]
    SameDay,

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

pub type MutationResult<T> = Result<T, MutationError>;

/// Where a mutation ended up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationOutcome {
    /// The server accepted it
    Synced,
    /// It waits in the pending-change queue
    Queued,
}

/// Applies user actions optimistically
pub struct Mutations {
    store: Arc<LocalStore>,
    engine: Arc<SyncEngine>,
    state: Arc<AppState>,
    bus: EventBus,
    connectivity: Connectivity,
}

fn required(field: &'static str, value: &str) -> MutationResult<String> {
    let value = value.trim();
    if value.is_empty() {
        return Err(MutationError::EmptyField(field));
    }
    Ok(value.to_string())
}

impl Mutations {
    pub fn new(
        store: Arc<LocalStore>,
        engine: Arc<SyncEngine>,
        state: Arc<AppState>,
        bus: EventBus,
        connectivity: Connectivity,
    ) -> Self {
        Self {
            store,
            engine,
            state,
            bus,
            connectivity,
        }
    }

    // ==================== Notes ====================

    /// Replace a note's text
    pub async fn update_note(&self, date: NaiveDate, text: &str) -> MutationResult<MutationOutcome> {
        let note = self.apply_note_text(date, text);
        self.submit(Some(date), Change::NoteUpdate { text: text.to_string() }, |tx| {
            tx.put_note(&note)
        })
        .await
    }

    /// Apply a note edit to the in-memory state and return the new note
    pub(crate) fn apply_note_text(&self, date: NaiveDate, text: &str) -> Note {
        let mut note = self.current_note(date);
        note.set_text(text);
        note.updated_at = Some(Utc::now());
        self.state.set_note(note.clone());
        self.bus.publish(&SyncEvent::NoteUpdated(note.clone()));
        note
    }

    /// Persist a note edit without sending it
    pub(crate) fn persist_note(&self, note: &Note) -> StorageResult<()> {
        self.store.put_note(note)
    }

    /// Send (or queue) a note text that is already applied and persisted
    pub(crate) async fn commit_note(&self, date: NaiveDate, text: &str) -> MutationResult<MutationOutcome> {
        self.submit(Some(date), Change::NoteUpdate { text: text.to_string() }, |_| Ok(()))
            .await
    }

    /// Set the itemized flag of one meal line
    pub async fn set_itemized(
        &self,
        date: NaiveDate,
        line_index: usize,
        itemized: bool,
    ) -> MutationResult<MutationOutcome> {
        let item = Item {
            line_index,
            itemized,
        };
        let mut note = self.current_note(date);
        note.set_item(item);
        self.state.set_note(note.clone());
        self.bus.publish(&SyncEvent::ItemUpdated { date, item });

        self.submit(
            Some(date),
            Change::ItemToggle {
                line_index,
                itemized,
            },
            |tx| tx.put_note(&note),
        )
        .await
    }

    /// Move one meal line to the end of another day's note
    ///
    /// Issued as two independent note rewrites, source first. The line's
    /// itemized flag moves with it.
    pub async fn move_meal_line(
        &self,
        from: NaiveDate,
        line_index: usize,
        to: NaiveDate,
    ) -> MutationResult<(MutationOutcome, MutationOutcome)> {
        if from == to {
            return Err(MutationError::SameDay);
        }

        let mut source = self.current_note(from);
        let (line, itemized) = source.take_line(line_index).ok_or_else(|| MutationError::NotFound {
            kind: "meal line",
            id: format!("{from}#{line_index}"),
        })?;
        let mut target = self.current_note(to);
        target.push_line(&line, itemized);

        let first = self.rewrite_note(source).await?;
        let second = self.rewrite_note(target).await?;
        Ok((first, second))
    }

    async fn rewrite_note(&self, mut note: Note) -> MutationResult<MutationOutcome> {
        note.updated_at = Some(Utc::now());
        self.state.set_note(note.clone());
        self.bus.publish(&SyncEvent::NoteUpdated(note.clone()));

        let change = Change::NoteRewrite {
            text: note.text.clone(),
            items: note.items.clone(),
        };
        self.submit(Some(note.date), change, |tx| tx.put_note(&note))
            .await
    }

    fn current_note(&self, date: NaiveDate) -> Note {
        if let Some(note) = self.state.cached_note(date) {
            return note;
        }
        match self.store.get_note(date) {
            Ok(Some(note)) => note,
            Ok(None) => Note::empty(date),
            Err(e) => {
                warn!(%date, error = %e, "Failed to read cached note");
                Note::empty(date)
            }
        }
    }

    // ==================== Pantry and meal ideas ====================

    pub async fn add_pantry_item(
        &self,
        name: &str,
        quantity: i64,
    ) -> MutationResult<(EntityId, MutationOutcome)> {
        let item = PantryItem::new(required("name", name)?, quantity);
        self.add_entity(item.into()).await
    }

    pub async fn update_pantry_item(
        &self,
        id: &EntityId,
        name: &str,
        quantity: i64,
    ) -> MutationResult<MutationOutcome> {
        let name = required("name", name)?;
        self.update_entity(EntityKind::Pantry, id, |entity| match entity {
            Entity::Pantry(item) => Entity::Pantry(PantryItem {
                name,
                quantity,
                updated_at: Some(Utc::now()),
                ..item
            }),
            other => other,
        })
        .await
    }

    pub async fn delete_pantry_item(&self, id: &EntityId) -> MutationResult<MutationOutcome> {
        self.delete_entity(EntityKind::Pantry, id).await
    }

    pub async fn add_meal_idea(&self, title: &str) -> MutationResult<(EntityId, MutationOutcome)> {
        let idea = MealIdea::new(required("title", title)?);
        self.add_entity(idea.into()).await
    }

    pub async fn update_meal_idea(&self, id: &EntityId, title: &str) -> MutationResult<MutationOutcome> {
        let title = required("title", title)?;
        self.update_entity(EntityKind::MealIdea, id, |entity| match entity {
            Entity::MealIdea(idea) => Entity::MealIdea(MealIdea {
                title,
                updated_at: Some(Utc::now()),
                ..idea
            }),
            other => other,
        })
        .await
    }

    pub async fn delete_meal_idea(&self, id: &EntityId) -> MutationResult<MutationOutcome> {
        self.delete_entity(EntityKind::MealIdea, id).await
    }

    /// Create an entity under a fresh local id
    ///
    /// Returns the id the entity ended up with: the server id when the create
    /// went through immediately, the local id when it was queued.
    async fn add_entity(&self, entity: Entity) -> MutationResult<(EntityId, MutationOutcome)> {
        let kind = entity.kind();
        let local_id = entity.id().clone();
        self.state.put_entity(entity.clone());
        self.publish_entity(kind, &local_id, false);

        if !self.connectivity.is_online() {
            self.store.create_local_entity(&entity)?;
            self.queued()?;
            return Ok((local_id, MutationOutcome::Queued));
        }

        self.store.put_entity(&entity)?;
        let change = Change::Create {
            kind,
            id: local_id.clone(),
            payload: entity.payload(),
        };
        let outcome = match self.send_or_queue(None, change).await {
            Ok(outcome) => outcome,
            Err(e) => {
                // Neither confirmed nor queued, so the row would never sync
                self.discard_local_entity(kind, &local_id);
                return Err(e);
            }
        };
        Ok((self.canonical_id(&local_id)?, outcome))
    }

    fn discard_local_entity(&self, kind: EntityKind, id: &EntityId) {
        if let Err(e) = self.store.delete_entity(kind, id) {
            warn!(%id, error = %e, "Failed to remove unsynced entity");
        }
        self.state.remove_entity(kind, id);
        self.publish_entity(kind, id, true);
    }

    async fn update_entity(
        &self,
        kind: EntityKind,
        id: &EntityId,
        apply: impl FnOnce(Entity) -> Entity,
    ) -> MutationResult<MutationOutcome> {
        let id = self.canonical_id(id)?;
        let current = self.find_entity(kind, &id)?;
        let updated = apply(current);

        self.state.put_entity(updated.clone());
        self.publish_entity(kind, &id, false);

        let change = Change::Update {
            kind,
            id: id.clone(),
            payload: updated.payload(),
        };
        self.submit(None, change, |tx| tx.put_entity(&updated)).await
    }

    async fn delete_entity(&self, kind: EntityKind, id: &EntityId) -> MutationResult<MutationOutcome> {
        let id = self.canonical_id(id)?;
        self.find_entity(kind, &id)?;

        self.state.remove_entity(kind, &id);
        self.publish_entity(kind, &id, true);

        let change = Change::Delete {
            kind,
            id: id.clone(),
        };
        self.submit(None, change, |tx| tx.delete_entity(kind, &id).map(|_| ()))
            .await
    }

    fn find_entity(&self, kind: EntityKind, id: &EntityId) -> MutationResult<Entity> {
        if let Some(entity) = self.state.entity(kind, id) {
            return Ok(entity);
        }
        self.store
            .get_entity(kind, id)?
            .ok_or_else(|| MutationError::NotFound {
                kind: kind.label(),
                id: id.to_string(),
            })
    }

    /// Resolve a stale local id to the server id it was confirmed under
    fn canonical_id(&self, id: &EntityId) -> StorageResult<EntityId> {
        if let EntityId::Local(local) = id {
            if let Some(remote) = self.store.resolve_temp_id(local)? {
                return Ok(EntityId::Remote(remote));
            }
        }
        Ok(id.clone())
    }

    fn publish_entity(&self, kind: EntityKind, id: &EntityId, deleted: bool) {
        let id = id.clone();
        self.bus.publish(&match kind {
            EntityKind::Pantry => SyncEvent::PantryUpdated { id, deleted },
            EntityKind::MealIdea => SyncEvent::MealIdeasUpdated { id, deleted },
        });
    }

    // ==================== Calendar ====================

    /// Hide a calendar event
    ///
    /// Hiding an event that is already hidden is a no-op.
    pub async fn hide_event(&self, event: &CalendarEvent) -> MutationResult<MutationOutcome> {
        let request = HideRequest::from(event);
        if self.state.is_hidden(&event.hidden_key())
            || self.store.find_hidden_event(&event.hidden_key())?.is_some()
        {
            debug!(title = %event.title, "Event already hidden");
            return Ok(MutationOutcome::Synced);
        }

        let hidden = HiddenCalendarEvent::from_request(EntityId::new_local(), &request);
        self.state.hide(hidden.clone());
        self.bus.publish(&SyncEvent::EventHidden(hidden.clone()));

        let change = Change::Hide {
            id: hidden.id.clone(),
            request,
        };
        self.submit(None, change, |tx| tx.put_hidden_event(&hidden))
            .await
    }

    /// Unhide the event matching `(event_uid, calendar_name, start_time)`
    pub async fn unhide_event(&self, key: &HiddenEventKey) -> MutationResult<MutationOutcome> {
        let hidden = match self.state.hidden_event(key) {
            Some(hidden) => hidden,
            None => self
                .store
                .find_hidden_event(key)?
                .ok_or_else(|| MutationError::NotFound {
                    kind: "hidden event",
                    id: key.event_uid.clone(),
                })?,
        };
        let id = self.canonical_id(&hidden.id)?;

        self.state.unhide(key);
        self.bus.publish(&SyncEvent::EventUnhidden(key.clone()));

        let change = Change::Unhide {
            id,
            key: key.clone(),
        };
        self.submit(None, change, |tx| tx.delete_hidden_by_key(key).map(|_| ()))
            .await
    }

    // ==================== Submission ====================

    /// Persist, then send immediately or queue
    ///
    /// When queueing, the local write and the queue entry commit together.
    async fn submit(
        &self,
        date: Option<NaiveDate>,
        change: Change,
        persist: impl FnOnce(&StoreTx<'_>) -> StorageResult<()>,
    ) -> MutationResult<MutationOutcome> {
        if !self.connectivity.is_online() || self.must_queue(date, &change)? {
            self.store.write(|tx| {
                persist(tx)?;
                tx.enqueue(date, &change).map(|_| ())
            })?;
            self.queued()?;
            return Ok(MutationOutcome::Queued);
        }

        self.store.write(persist)?;
        self.send_or_queue(date, change).await
    }

    async fn send_or_queue(&self, date: Option<NaiveDate>, change: Change) -> MutationResult<MutationOutcome> {
        match self.engine.dispatch(date, &change, None).await {
            Ok(Step::Applied) => Ok(MutationOutcome::Synced),
            Ok(Step::Orphaned) => {
                self.store.enqueue(date, &change)?;
                self.queued()?;
                Ok(MutationOutcome::Queued)
            }
            Err(SyncError::Api(e)) => {
                warn!(change_type = change.type_tag(), error = %e, "Send failed, queueing");
                if e.retry_class() == ApiRetryClass::ReauthRequired {
                    self.engine.status().set(ConnectionStatus::AuthRequired);
                }
                self.store.enqueue(date, &change)?;
                self.queued()?;
                Ok(MutationOutcome::Queued)
            }
            Err(SyncError::Storage(e)) => Err(e.into()),
        }
    }

    /// Whether the change has to wait behind something already queued
    fn must_queue(&self, date: Option<NaiveDate>, change: &Change) -> StorageResult<bool> {
        let Some(subject) = Subject::of(date, change) else {
            return Ok(false);
        };
        if let Subject::Entity(EntityId::Local(local)) = &subject {
            if !change.is_add() && self.store.resolve_temp_id(local)?.is_none() {
                return Ok(true);
            }
        }
        self.store.has_pending_for(&subject)
    }

    /// Refresh the status indicator after queueing
    fn queued(&self) -> StorageResult<()> {
        let status = self.engine.status();
        if !self.connectivity.is_online() {
            status.set(ConnectionStatus::Offline);
        } else if status.current() != ConnectionStatus::AuthRequired {
            status.set(ConnectionStatus::for_queue(self.store.pending_count()?));
        }
        Ok(())
    }
}
