//! In-memory UI state
//!
//! The copy of the data the UI reads from. Optimistic mutations and realtime
//! merges write here first; the local store is the durable copy behind it.
//! The lock is never held across an await point.

use std::collections::BTreeMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::NaiveDate;

use crate::id::EntityId;
use crate::models::{
    CalendarEvent, Entity, EntityKind, HiddenCalendarEvent, HiddenEventKey, MealIdea, Note,
    PantryItem,
};
use crate::storage::{LocalStore, StorageResult};

/// Where a note's local edits stand
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EditState {
    /// Nothing unsent
    #[default]
    Idle,
    /// Edited locally, waiting for the debounce window
    Dirty,
    /// Being sent
    Committing,
}

#[derive(Default)]
struct ViewData {
    notes: BTreeMap<NaiveDate, Note>,
    pantry: BTreeMap<EntityId, PantryItem>,
    ideas: BTreeMap<EntityId, MealIdea>,
    /// Unfiltered events per date
    calendar: BTreeMap<NaiveDate, Vec<CalendarEvent>>,
    hidden: Vec<HiddenCalendarEvent>,
    /// Notes with edits the server hasn't seen; absent means idle
    edits: BTreeMap<NaiveDate, EditState>,
    show_all: bool,
}

/// Shared in-memory state read by the UI layer
#[derive(Default)]
pub struct AppState {
    data: RwLock<ViewData>,
}

impl AppState {
    pub fn new(show_all: bool) -> Self {
        let state = Self::default();
        state.write().show_all = show_all;
        state
    }

    fn read(&self) -> RwLockReadGuard<'_, ViewData> {
        self.data.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, ViewData> {
        self.data.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Load cached entities, and notes and calendar days in a date range
    pub fn hydrate(&self, store: &LocalStore, start: NaiveDate, end: NaiveDate) -> StorageResult<()> {
        let notes = store.notes_between(start, end)?;
        let days = store.calendar_days_between(start, end)?;
        let pantry = store.list_pantry_items()?;
        let ideas = store.list_meal_ideas()?;
        let hidden = store.list_hidden_events()?;

        let mut data = self.write();
        data.notes.extend(notes.into_iter().map(|n| (n.date, n)));
        data.calendar
            .extend(days.into_iter().map(|d| (d.date, d.events)));
        data.pantry = pantry.into_iter().map(|p| (p.id.clone(), p)).collect();
        data.ideas = ideas.into_iter().map(|i| (i.id.clone(), i)).collect();
        data.hidden = hidden;
        Ok(())
    }

    // ==================== Notes ====================

    /// The note for a date; empty if none is known
    pub fn note(&self, date: NaiveDate) -> Note {
        self.read()
            .notes
            .get(&date)
            .cloned()
            .unwrap_or_else(|| Note::empty(date))
    }

    /// The note for a date if one is loaded
    pub fn cached_note(&self, date: NaiveDate) -> Option<Note> {
        self.read().notes.get(&date).cloned()
    }

    pub fn set_note(&self, note: Note) {
        self.write().notes.insert(note.date, note);
    }

    pub fn edit_state(&self, date: NaiveDate) -> EditState {
        self.read().edits.get(&date).copied().unwrap_or_default()
    }

    pub fn set_edit_state(&self, date: NaiveDate, state: EditState) {
        let mut data = self.write();
        match state {
            EditState::Idle => data.edits.remove(&date),
            state => data.edits.insert(date, state),
        };
    }

    // ==================== Entities ====================

    pub fn pantry_items(&self) -> Vec<PantryItem> {
        let mut items: Vec<_> = self.read().pantry.values().cloned().collect();
        items.sort_by_key(|i| i.name.to_lowercase());
        items
    }

    pub fn meal_ideas(&self) -> Vec<MealIdea> {
        let mut ideas: Vec<_> = self.read().ideas.values().cloned().collect();
        ideas.sort_by_key(|i| i.title.to_lowercase());
        ideas
    }

    pub fn entity(&self, kind: EntityKind, id: &EntityId) -> Option<Entity> {
        let data = self.read();
        match kind {
            EntityKind::Pantry => data.pantry.get(id).cloned().map(Entity::from),
            EntityKind::MealIdea => data.ideas.get(id).cloned().map(Entity::from),
        }
    }

    pub fn put_entity(&self, entity: Entity) {
        let mut data = self.write();
        match entity {
            Entity::Pantry(item) => {
                data.pantry.insert(item.id.clone(), item);
            }
            Entity::MealIdea(idea) => {
                data.ideas.insert(idea.id.clone(), idea);
            }
        }
    }

    pub fn remove_entity(&self, kind: EntityKind, id: &EntityId) -> bool {
        let mut data = self.write();
        match kind {
            EntityKind::Pantry => data.pantry.remove(id).is_some(),
            EntityKind::MealIdea => data.ideas.remove(id).is_some(),
        }
    }

    /// Replace every server-keyed entity of a kind; local entries are kept
    pub fn replace_entities(&self, kind: EntityKind, entities: Vec<Entity>) {
        let mut data = self.write();
        match kind {
            EntityKind::Pantry => data.pantry.retain(|id, _| id.is_local()),
            EntityKind::MealIdea => data.ideas.retain(|id, _| id.is_local()),
        }
        drop(data);
        for entity in entities.into_iter().filter(|e| e.kind() == kind) {
            self.put_entity(entity);
        }
    }

    // ==================== Calendar ====================

    pub fn set_calendar_day(&self, date: NaiveDate, events: Vec<CalendarEvent>) {
        self.write().calendar.insert(date, events);
    }

    /// Every known event for a date, hidden ones included
    pub fn all_events(&self, date: NaiveDate) -> Vec<CalendarEvent> {
        self.read().calendar.get(&date).cloned().unwrap_or_default()
    }

    /// Events to display for a date: hidden ones are filtered out unless
    /// "show all" is on
    pub fn visible_events(&self, date: NaiveDate) -> Vec<CalendarEvent> {
        let data = self.read();
        let events = data.calendar.get(&date).cloned().unwrap_or_default();
        if data.show_all {
            return events;
        }
        events
            .into_iter()
            .filter(|event| {
                let key = event.hidden_key();
                !data.hidden.iter().any(|h| h.key() == key)
            })
            .collect()
    }

    pub fn is_hidden(&self, key: &HiddenEventKey) -> bool {
        self.read().hidden.iter().any(|h| &h.key() == key)
    }

    pub fn hidden_event(&self, key: &HiddenEventKey) -> Option<HiddenCalendarEvent> {
        self.read().hidden.iter().find(|h| &h.key() == key).cloned()
    }

    pub fn hidden_events(&self) -> Vec<HiddenCalendarEvent> {
        self.read().hidden.clone()
    }

    /// Add a hidden event, replacing any entry with the same key
    pub fn hide(&self, hidden: HiddenCalendarEvent) {
        let mut data = self.write();
        let key = hidden.key();
        data.hidden.retain(|h| h.key() != key);
        data.hidden.push(hidden);
    }

    /// Remove every hidden entry with this key
    pub fn unhide(&self, key: &HiddenEventKey) -> bool {
        let mut data = self.write();
        let before = data.hidden.len();
        data.hidden.retain(|h| &h.key() != key);
        data.hidden.len() != before
    }

    /// Replace server-keyed hidden events; local entries are kept
    pub fn replace_hidden(&self, hidden: Vec<HiddenCalendarEvent>) {
        let mut data = self.write();
        data.hidden.retain(|h| h.id.is_local());
        for event in hidden {
            let key = event.key();
            data.hidden.retain(|h| h.key() != key);
            data.hidden.push(event);
        }
    }

    pub fn show_all(&self) -> bool {
        self.read().show_all
    }

    pub fn set_show_all(&self, show_all: bool) {
        self.write().show_all = show_all;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn date(s: &str) -> NaiveDate {
        s.parse().unwrap()
    }

    fn event(uid: &str) -> CalendarEvent {
        CalendarEvent {
            uid: Some(uid.to_string()),
            calendar_name: Some("Family".into()),
            title: format!("Event {uid}"),
            start_time: Utc.with_ymd_and_hms(2024, 3, 1, 18, 0, 0).unwrap(),
            end_time: None,
            all_day: false,
        }
    }

    #[test]
    fn test_visible_events_filter_hidden() {
        let state = AppState::new(false);
        let d = date("2024-03-01");
        state.set_calendar_day(d, vec![event("a"), event("b")]);

        let hidden = HiddenCalendarEvent::from_request(EntityId::new_local(), &(&event("a")).into());
        state.hide(hidden);

        let visible = state.visible_events(d);
        assert_eq!(visible.len(), 1);
        assert_eq!(visible[0].uid.as_deref(), Some("b"));
        assert_eq!(state.all_events(d).len(), 2);

        state.set_show_all(true);
        assert_eq!(state.visible_events(d).len(), 2);
    }

    #[test]
    fn test_unhide_by_key_restores_visibility() {
        let state = AppState::new(false);
        let d = date("2024-03-01");
        state.set_calendar_day(d, vec![event("a")]);
        state.hide(HiddenCalendarEvent::from_request(
            EntityId::remote("h-1"),
            &(&event("a")).into(),
        ));
        assert!(state.visible_events(d).is_empty());

        assert!(state.unhide(&event("a").hidden_key()));
        assert_eq!(state.visible_events(d).len(), 1);
    }

    #[test]
    fn test_edit_state_defaults_to_idle() {
        let state = AppState::new(false);
        let d = date("2024-03-01");
        assert_eq!(state.edit_state(d), EditState::Idle);

        state.set_edit_state(d, EditState::Dirty);
        assert_eq!(state.edit_state(d), EditState::Dirty);
        assert_eq!(state.edit_state(date("2024-03-02")), EditState::Idle);

        state.set_edit_state(d, EditState::Idle);
        assert_eq!(state.edit_state(d), EditState::Idle);
    }

    #[test]
    fn test_replace_entities_keeps_local() {
        let state = AppState::new(false);
        state.put_entity(MealIdea::new("Local").into());
        state.put_entity(
            MealIdea {
                id: EntityId::remote("srv-1"),
                title: "Stale".into(),
                updated_at: None,
            }
            .into(),
        );

        state.replace_entities(
            EntityKind::MealIdea,
            vec![MealIdea {
                id: EntityId::remote("srv-2"),
                title: "Fresh".into(),
                updated_at: None,
            }
            .into()],
        );

        let titles: Vec<_> = state.meal_ideas().into_iter().map(|i| i.title).collect();
        assert_eq!(titles, vec!["Fresh", "Local"]);
    }

    #[test]
    fn test_hydrate_from_store() {
        let store = LocalStore::open_in_memory().unwrap();
        store
            .put_note(&Note::with_text(date("2024-03-01"), "Soup"))
            .unwrap();
        store
            .put_entity(&PantryItem::new("Rice", 1).into())
            .unwrap();

        let state = AppState::new(false);
        state
            .hydrate(&store, date("2024-03-01"), date("2024-03-07"))
            .unwrap();

        assert_eq!(state.note(date("2024-03-01")).text, "Soup");
        assert!(state.note(date("2024-03-02")).is_empty());
        assert_eq!(state.pantry_items().len(), 1);
    }
}
