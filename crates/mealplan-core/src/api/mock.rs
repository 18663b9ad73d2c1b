//! In-memory server used by tests
//!
//! Mirrors the server's behaviour closely enough for sync tests: ids are
//! `srv-1`, `srv-2`, ..., note updates re-derive items from the meal lines,
//! and missing ids answer 404. Every call is recorded, and individual calls
//! can be made to fail.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use serde_json::Value;

use super::{ApiError, ApiResult, DayData, RemoteApi};
use crate::id::EntityId;
use crate::models::{
    CalendarEvent, Entity, EntityKind, HiddenCalendarEvent, HideRequest, Item, MealIdea, Note,
    PantryItem,
};

/// A recorded API call
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum ApiCall {
    CreateEntity { kind: EntityKind, payload: Value },
    UpdateEntity { kind: EntityKind, id: String, payload: Value },
    DeleteEntity { kind: EntityKind, id: String },
    UpdateNote { date: NaiveDate, text: String },
    SetItemized { date: NaiveDate, line_index: usize, itemized: bool },
    HideEvent(HideRequest),
    UnhideEvent(String),
    ListEntities(EntityKind),
    ListHiddenEvents,
    FetchDays,
}

impl ApiCall {
    /// Whether the call changes server state
    pub(crate) fn is_write(&self) -> bool {
        !matches!(
            self,
            ApiCall::ListEntities(_) | ApiCall::ListHiddenEvents | ApiCall::FetchDays
        )
    }
}

/// How an injected failure presents itself
#[derive(Debug, Clone, Copy)]
pub(crate) enum Failure {
    Network,
    Unauthorized,
    Status(u16),
}

impl Failure {
    fn into_error(self) -> ApiError {
        match self {
            Failure::Network => ApiError::Network("connection refused".into()),
            Failure::Unauthorized => ApiError::Unauthorized("token expired".into()),
            Failure::Status(status) => ApiError::api(status, "injected failure"),
        }
    }
}

#[derive(Default)]
struct MockState {
    next_id: u64,
    calls: Vec<ApiCall>,
    fail_calls: HashMap<usize, Failure>,
    fail_all: Option<Failure>,
    notes: BTreeMap<NaiveDate, Note>,
    pantry: BTreeMap<String, PantryItem>,
    ideas: BTreeMap<String, MealIdea>,
    hidden: BTreeMap<String, HiddenCalendarEvent>,
    events: BTreeMap<NaiveDate, Vec<CalendarEvent>>,
}

impl MockState {
    fn next_id(&mut self) -> String {
        self.next_id += 1;
        format!("srv-{}", self.next_id)
    }

    fn not_found(id: &str) -> ApiError {
        ApiError::api(404, format!("{id} not found"))
    }
}

#[derive(Default)]
pub(crate) struct MockApi {
    state: Mutex<MockState>,
}

impl MockApi {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Fail the n-th call (1-based, counting every call)
    pub(crate) fn fail_call(&self, n: usize, failure: Failure) {
        self.lock().fail_calls.insert(n, failure);
    }

    /// Fail every call until cleared
    pub(crate) fn fail_all(&self, failure: Option<Failure>) {
        self.lock().fail_all = failure;
    }

    pub(crate) fn calls(&self) -> Vec<ApiCall> {
        self.lock().calls.clone()
    }

    pub(crate) fn write_calls(&self) -> Vec<ApiCall> {
        self.calls().into_iter().filter(ApiCall::is_write).collect()
    }

    pub(crate) fn note(&self, date: NaiveDate) -> Option<Note> {
        self.lock().notes.get(&date).cloned()
    }

    pub(crate) fn pantry(&self) -> Vec<PantryItem> {
        self.lock().pantry.values().cloned().collect()
    }

    pub(crate) fn ideas(&self) -> Vec<MealIdea> {
        self.lock().ideas.values().cloned().collect()
    }

    pub(crate) fn hidden(&self) -> Vec<HiddenCalendarEvent> {
        self.lock().hidden.values().cloned().collect()
    }

    pub(crate) fn seed_note(&self, note: Note) {
        self.lock().notes.insert(note.date, note);
    }

    pub(crate) fn seed_events(&self, date: NaiveDate, events: Vec<CalendarEvent>) {
        self.lock().events.insert(date, events);
    }

    pub(crate) fn seed_entity(&self, entity: Entity) -> Entity {
        let mut state = self.lock();
        let id = state.next_id();
        match entity {
            Entity::Pantry(item) => {
                let item = PantryItem { id: EntityId::remote(id.clone()), ..item };
                state.pantry.insert(id, item.clone());
                item.into()
            }
            Entity::MealIdea(idea) => {
                let idea = MealIdea { id: EntityId::remote(id.clone()), ..idea };
                state.ideas.insert(id, idea.clone());
                idea.into()
            }
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.state.lock().unwrap()
    }

    /// Record a call and return the state, or the injected failure
    fn begin(&self, call: ApiCall) -> ApiResult<std::sync::MutexGuard<'_, MockState>> {
        let mut state = self.lock();
        state.calls.push(call);
        let n = state.calls.len();
        if let Some(failure) = state.fail_all {
            return Err(failure.into_error());
        }
        if let Some(failure) = state.fail_calls.remove(&n) {
            return Err(failure.into_error());
        }
        Ok(state)
    }
}

fn field_str(payload: &Value, field: &str) -> ApiResult<String> {
    match payload.get(field).and_then(Value::as_str).map(str::trim) {
        Some(value) if !value.is_empty() => Ok(value.to_string()),
        _ => Err(ApiError::api(400, format!("{field} cannot be empty"))),
    }
}

#[async_trait]
impl RemoteApi for MockApi {
    async fn create_entity(&self, kind: EntityKind, payload: &Value) -> ApiResult<Entity> {
        let mut state = self.begin(ApiCall::CreateEntity {
            kind,
            payload: payload.clone(),
        })?;
        let id = state.next_id();
        let entity = match kind {
            EntityKind::Pantry => {
                let item = PantryItem {
                    id: EntityId::remote(id.clone()),
                    name: field_str(payload, "name")?,
                    quantity: payload.get("quantity").and_then(Value::as_i64).unwrap_or(1),
                    updated_at: Some(Utc::now()),
                };
                state.pantry.insert(id, item.clone());
                Entity::Pantry(item)
            }
            EntityKind::MealIdea => {
                let idea = MealIdea {
                    id: EntityId::remote(id.clone()),
                    title: field_str(payload, "title")?,
                    updated_at: Some(Utc::now()),
                };
                state.ideas.insert(id, idea.clone());
                Entity::MealIdea(idea)
            }
        };
        Ok(entity)
    }

    async fn update_entity(&self, kind: EntityKind, id: &str, payload: &Value) -> ApiResult<Entity> {
        let mut state = self.begin(ApiCall::UpdateEntity {
            kind,
            id: id.to_string(),
            payload: payload.clone(),
        })?;
        match kind {
            EntityKind::Pantry => {
                let name = field_str(payload, "name")?;
                let item = state.pantry.get_mut(id).ok_or_else(|| MockState::not_found(id))?;
                item.name = name;
                if let Some(quantity) = payload.get("quantity").and_then(Value::as_i64) {
                    item.quantity = quantity;
                }
                item.updated_at = Some(Utc::now());
                Ok(Entity::Pantry(item.clone()))
            }
            EntityKind::MealIdea => {
                let title = field_str(payload, "title")?;
                let idea = state.ideas.get_mut(id).ok_or_else(|| MockState::not_found(id))?;
                idea.title = title;
                idea.updated_at = Some(Utc::now());
                Ok(Entity::MealIdea(idea.clone()))
            }
        }
    }

    async fn delete_entity(&self, kind: EntityKind, id: &str) -> ApiResult<()> {
        let mut state = self.begin(ApiCall::DeleteEntity {
            kind,
            id: id.to_string(),
        })?;
        let removed = match kind {
            EntityKind::Pantry => state.pantry.remove(id).is_some(),
            EntityKind::MealIdea => state.ideas.remove(id).is_some(),
        };
        if removed {
            Ok(())
        } else {
            Err(MockState::not_found(id))
        }
    }

    async fn update_note(&self, date: NaiveDate, text: &str) -> ApiResult<Note> {
        let mut state = self.begin(ApiCall::UpdateNote {
            date,
            text: text.to_string(),
        })?;
        let note = state.notes.entry(date).or_insert_with(|| Note::empty(date));
        note.set_text(text);
        for line_index in 0..note.meal_lines().len() {
            if !note.items.iter().any(|i| i.line_index == line_index) {
                note.set_item(Item {
                    line_index,
                    itemized: false,
                });
            }
        }
        note.updated_at = Some(Utc::now());
        Ok(note.clone())
    }

    async fn set_itemized(&self, date: NaiveDate, line_index: usize, itemized: bool) -> ApiResult<Item> {
        let mut state = self.begin(ApiCall::SetItemized {
            date,
            line_index,
            itemized,
        })?;
        let item = Item {
            line_index,
            itemized,
        };
        let note = state.notes.entry(date).or_insert_with(|| Note::empty(date));
        note.set_item(item);
        note.updated_at = Some(Utc::now());
        Ok(item)
    }

    async fn hide_event(&self, request: &HideRequest) -> ApiResult<HiddenCalendarEvent> {
        let mut state = self.begin(ApiCall::HideEvent(request.clone()))?;
        let id = state.next_id();
        let hidden = HiddenCalendarEvent::from_request(EntityId::remote(id.clone()), request);
        state.hidden.insert(id, hidden.clone());
        Ok(hidden)
    }

    async fn unhide_event(&self, id: &str) -> ApiResult<()> {
        let mut state = self.begin(ApiCall::UnhideEvent(id.to_string()))?;
        match state.hidden.remove(id) {
            Some(_) => Ok(()),
            None => Err(MockState::not_found(id)),
        }
    }

    async fn list_entities(&self, kind: EntityKind) -> ApiResult<Vec<Entity>> {
        let state = self.begin(ApiCall::ListEntities(kind))?;
        Ok(match kind {
            EntityKind::Pantry => state.pantry.values().cloned().map(Entity::from).collect(),
            EntityKind::MealIdea => state.ideas.values().cloned().map(Entity::from).collect(),
        })
    }

    async fn list_hidden_events(&self) -> ApiResult<Vec<HiddenCalendarEvent>> {
        let state = self.begin(ApiCall::ListHiddenEvents)?;
        Ok(state.hidden.values().cloned().collect())
    }

    async fn fetch_days(&self, start: NaiveDate, end: NaiveDate) -> ApiResult<Vec<DayData>> {
        let state = self.begin(ApiCall::FetchDays)?;
        Ok(start
            .iter_days()
            .take_while(|d| *d <= end)
            .map(|date| DayData {
                date,
                events: state.events.get(&date).cloned().unwrap_or_default(),
                meal_note: state.notes.get(&date).cloned(),
            })
            .collect())
    }
}
