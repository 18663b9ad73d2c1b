//! Data models for the meal planner
//!
//! Notes are keyed by date, pantry items and meal ideas by [`EntityId`].
//! Field names follow the server's JSON so responses and realtime payloads
//! deserialize straight into these types.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::id::EntityId;

/// Itemized state for one meal line of a note
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    /// Index into the note's meal lines (non-blank lines)
    pub line_index: usize,
    pub itemized: bool,
}

/// Free-text meal note for one date
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Note {
    pub date: NaiveDate,
    /// Note content, one meal per line
    #[serde(rename = "notes", default)]
    pub text: String,
    #[serde(default)]
    pub items: Vec<Item>,
    #[serde(default, with = "timestamp::option")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Note {
    /// An empty note for a date with no content yet
    pub fn empty(date: NaiveDate) -> Self {
        Self {
            date,
            text: String::new(),
            items: Vec::new(),
            updated_at: None,
        }
    }

    pub fn with_text(date: NaiveDate, text: impl Into<String>) -> Self {
        let mut note = Self::empty(date);
        note.set_text(text);
        note
    }

    /// Meal lines: the non-blank lines of the note text
    pub fn meal_lines(&self) -> Vec<&str> {
        meal_lines(&self.text)
    }

    pub fn is_empty(&self) -> bool {
        self.meal_lines().is_empty()
    }

    pub fn is_itemized(&self, line_index: usize) -> bool {
        self.items
            .iter()
            .any(|item| item.line_index == line_index && item.itemized)
    }

    /// Replace the text, dropping items whose line no longer exists
    pub fn set_text(&mut self, text: impl Into<String>) {
        self.text = text.into();
        let line_count = self.meal_lines().len();
        self.items.retain(|item| item.line_index < line_count);
    }

    /// Patch one item by line index, inserting it if absent
    pub fn set_item(&mut self, item: Item) {
        match self
            .items
            .iter_mut()
            .find(|existing| existing.line_index == item.line_index)
        {
            Some(existing) => existing.itemized = item.itemized,
            None => {
                self.items.push(item);
                self.items.sort_by_key(|i| i.line_index);
            }
        }
    }

    /// Remove one meal line, renumbering the items after it
    ///
    /// Returns the removed line and whether it was itemized, or `None` if the
    /// index is out of range.
    pub fn take_line(&mut self, line_index: usize) -> Option<(String, bool)> {
        let mut lines: Vec<String> = self.meal_lines().iter().map(|l| l.to_string()).collect();
        if line_index >= lines.len() {
            return None;
        }
        let removed = lines.remove(line_index);
        let was_itemized = self.is_itemized(line_index);

        self.items = self
            .items
            .iter()
            .filter(|item| item.line_index != line_index)
            .map(|item| Item {
                line_index: if item.line_index > line_index {
                    item.line_index - 1
                } else {
                    item.line_index
                },
                itemized: item.itemized,
            })
            .collect();
        self.text = lines.join("\n");

        Some((removed, was_itemized))
    }

    /// Append a meal line, optionally carrying its itemized flag
    pub fn push_line(&mut self, line: &str, itemized: bool) {
        let mut lines: Vec<String> = self.meal_lines().iter().map(|l| l.to_string()).collect();
        let index = lines.len();
        lines.push(line.to_string());
        self.text = lines.join("\n");
        if itemized {
            self.set_item(Item {
                line_index: index,
                itemized: true,
            });
        }
    }
}

/// Non-blank lines of a note text
pub fn meal_lines(text: &str) -> Vec<&str> {
    text.split('\n').filter(|l| !l.trim().is_empty()).collect()
}

/// An item in the pantry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PantryItem {
    pub id: EntityId,
    pub name: String,
    #[serde(default)]
    pub quantity: i64,
    #[serde(default, with = "timestamp::option")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl PantryItem {
    /// A new pantry item with a local id
    pub fn new(name: impl Into<String>, quantity: i64) -> Self {
        Self {
            id: EntityId::new_local(),
            name: name.into(),
            quantity,
            updated_at: Some(Utc::now()),
        }
    }
}

/// A saved meal idea
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MealIdea {
    pub id: EntityId,
    pub title: String,
    #[serde(default, with = "timestamp::option")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl MealIdea {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            id: EntityId::new_local(),
            title: title.into(),
            updated_at: Some(Utc::now()),
        }
    }
}

/// Kinds of id-keyed entities handled by the generic create/update/delete path
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EntityKind {
    Pantry,
    MealIdea,
}

impl EntityKind {
    /// API collection path segment
    pub fn collection(&self) -> &'static str {
        match self {
            EntityKind::Pantry => "pantry",
            EntityKind::MealIdea => "meal-ideas",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            EntityKind::Pantry => "pantry item",
            EntityKind::MealIdea => "meal idea",
        }
    }
}

/// A pantry item or meal idea
#[derive(Debug, Clone, PartialEq)]
pub enum Entity {
    Pantry(PantryItem),
    MealIdea(MealIdea),
}

impl Entity {
    pub fn kind(&self) -> EntityKind {
        match self {
            Entity::Pantry(_) => EntityKind::Pantry,
            Entity::MealIdea(_) => EntityKind::MealIdea,
        }
    }

    pub fn id(&self) -> &EntityId {
        match self {
            Entity::Pantry(item) => &item.id,
            Entity::MealIdea(idea) => &idea.id,
        }
    }

    /// The same entity under another id
    pub fn with_id(self, id: EntityId) -> Self {
        match self {
            Entity::Pantry(item) => Entity::Pantry(PantryItem { id, ..item }),
            Entity::MealIdea(idea) => Entity::MealIdea(MealIdea { id, ..idea }),
        }
    }

    /// Fields sent to the server on create/update
    pub fn payload(&self) -> Value {
        match self {
            Entity::Pantry(item) => json!({ "name": item.name, "quantity": item.quantity }),
            Entity::MealIdea(idea) => json!({ "title": idea.title }),
        }
    }

    /// Decode a server response for the given kind
    pub fn from_value(kind: EntityKind, value: Value) -> serde_json::Result<Self> {
        Ok(match kind {
            EntityKind::Pantry => Entity::Pantry(serde_json::from_value(value)?),
            EntityKind::MealIdea => Entity::MealIdea(serde_json::from_value(value)?),
        })
    }
}

impl From<PantryItem> for Entity {
    fn from(item: PantryItem) -> Self {
        Entity::Pantry(item)
    }
}

impl From<MealIdea> for Entity {
    fn from(idea: MealIdea) -> Self {
        Entity::MealIdea(idea)
    }
}

/// A calendar event as delivered by the server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalendarEvent {
    #[serde(default, alias = "event_uid")]
    pub uid: Option<String>,
    #[serde(default)]
    pub calendar_name: Option<String>,
    pub title: String,
    #[serde(with = "timestamp")]
    pub start_time: DateTime<Utc>,
    #[serde(default, with = "timestamp::option")]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub all_day: bool,
}

impl CalendarEvent {
    /// Identity used to match this event against hidden events
    pub fn hidden_key(&self) -> HiddenEventKey {
        HiddenEventKey {
            event_uid: self.uid.clone().unwrap_or_default(),
            calendar_name: self.calendar_name.clone().unwrap_or_default(),
            start_time: self.start_time,
        }
    }
}

/// Every event known for one date (unfiltered)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalendarDay {
    pub date: NaiveDate,
    pub events: Vec<CalendarEvent>,
}

/// Identity of a calendar-sourced event independent of any local id
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HiddenEventKey {
    pub event_uid: String,
    pub calendar_name: String,
    #[serde(with = "timestamp")]
    pub start_time: DateTime<Utc>,
}

/// A calendar event the user chose to hide
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HiddenCalendarEvent {
    pub id: EntityId,
    #[serde(default)]
    pub event_uid: String,
    #[serde(default)]
    pub calendar_name: String,
    #[serde(with = "timestamp")]
    pub start_time: DateTime<Utc>,
    #[serde(default)]
    pub title: String,
}

impl HiddenCalendarEvent {
    pub fn key(&self) -> HiddenEventKey {
        HiddenEventKey {
            event_uid: self.event_uid.clone(),
            calendar_name: self.calendar_name.clone(),
            start_time: self.start_time,
        }
    }

    /// Build a hidden record with a local id from the server request body
    pub fn from_request(id: EntityId, request: &HideRequest) -> Self {
        Self {
            id,
            event_uid: request.event_uid.clone(),
            calendar_name: request.calendar_name.clone(),
            start_time: request.start_time,
            title: request.title.clone(),
        }
    }
}

/// Body of a hide-event request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HideRequest {
    pub event_uid: String,
    pub calendar_name: String,
    #[serde(with = "timestamp")]
    pub start_time: DateTime<Utc>,
    #[serde(default)]
    pub title: String,
}

impl From<&CalendarEvent> for HideRequest {
    fn from(event: &CalendarEvent) -> Self {
        let key = event.hidden_key();
        Self {
            event_uid: key.event_uid,
            calendar_name: key.calendar_name,
            start_time: key.start_time,
            title: event.title.clone(),
        }
    }
}

/// Timestamps from the server may be RFC 3339 or naive (UTC implied)
pub(crate) mod timestamp {
    use chrono::{DateTime, NaiveDateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn parse(s: &str) -> Option<DateTime<Utc>> {
        if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
            return Some(dt.with_timezone(&Utc));
        }
        NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
            .ok()
            .map(|naive| naive.and_utc())
    }

    pub fn serialize<S: Serializer>(dt: &DateTime<Utc>, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&dt.to_rfc3339())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(d)?;
        parse(&raw).ok_or_else(|| serde::de::Error::custom(format!("invalid timestamp: {raw}")))
    }

    pub mod option {
        use chrono::{DateTime, Utc};
        use serde::{Deserialize, Deserializer, Serializer};

        pub fn serialize<S: Serializer>(dt: &Option<DateTime<Utc>>, s: S) -> Result<S::Ok, S::Error> {
            match dt {
                Some(dt) => s.serialize_str(&dt.to_rfc3339()),
                None => s.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(
            d: D,
        ) -> Result<Option<DateTime<Utc>>, D::Error> {
            match Option::<String>::deserialize(d)? {
                None => Ok(None),
                Some(raw) => super::parse(&raw).map(Some).ok_or_else(|| {
                    serde::de::Error::custom(format!("invalid timestamp: {raw}"))
                }),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(s: &str) -> NaiveDate {
        s.parse().unwrap()
    }

    #[test]
    fn test_meal_lines_skip_blanks() {
        let note = Note::with_text(date("2024-03-01"), "Pasta\n\n  \nSoup");
        assert_eq!(note.meal_lines(), vec!["Pasta", "Soup"]);
    }

    #[test]
    fn test_set_text_drops_out_of_range_items() {
        let mut note = Note::with_text(date("2024-03-01"), "a\nb\nc");
        note.set_item(Item { line_index: 2, itemized: true });
        note.set_item(Item { line_index: 0, itemized: true });
        note.set_text("a");
        assert_eq!(note.items, vec![Item { line_index: 0, itemized: true }]);
    }

    #[test]
    fn test_set_item_patches_or_inserts() {
        let mut note = Note::with_text(date("2024-03-01"), "a\nb");
        note.set_item(Item { line_index: 1, itemized: true });
        note.set_item(Item { line_index: 0, itemized: false });
        note.set_item(Item { line_index: 1, itemized: false });
        assert_eq!(note.items.len(), 2);
        assert!(!note.is_itemized(1));
        assert_eq!(note.items[0].line_index, 0);
    }

    #[test]
    fn test_take_line_renumbers_items() {
        let mut note = Note::with_text(date("2024-03-01"), "a\nb\nc");
        note.set_item(Item { line_index: 0, itemized: true });
        note.set_item(Item { line_index: 2, itemized: true });

        let (line, itemized) = note.take_line(1).unwrap();
        assert_eq!(line, "b");
        assert!(!itemized);
        assert_eq!(note.text, "a\nc");
        assert!(note.is_itemized(0));
        assert!(note.is_itemized(1));
        assert!(note.take_line(5).is_none());
    }

    #[test]
    fn test_push_line_carries_itemized() {
        let mut note = Note::with_text(date("2024-03-02"), "Soup");
        note.push_line("Pasta", true);
        assert_eq!(note.text, "Soup\nPasta");
        assert!(note.is_itemized(1));
        assert!(!note.is_itemized(0));
    }

    #[test]
    fn test_note_deserializes_server_shape() {
        let json = r#"{
            "id": "7d0c",
            "date": "2024-03-01",
            "notes": "Pasta",
            "items": [{"line_index": 0, "itemized": true}],
            "updated_at": "2024-03-01T10:00:00.123456"
        }"#;
        let note: Note = serde_json::from_str(json).unwrap();
        assert_eq!(note.text, "Pasta");
        assert!(note.is_itemized(0));
        assert!(note.updated_at.is_some());
    }

    #[test]
    fn test_entity_payload_and_decode() {
        let item = PantryItem::new("Rice", 2);
        let payload = Entity::from(item).payload();
        assert_eq!(payload, json!({"name": "Rice", "quantity": 2}));

        let decoded = Entity::from_value(
            EntityKind::Pantry,
            json!({"id": "srv-1", "name": "Rice", "quantity": 2}),
        )
        .unwrap();
        assert_eq!(decoded.id(), &EntityId::remote("srv-1"));
        assert_eq!(decoded.kind(), EntityKind::Pantry);
    }

    #[test]
    fn test_hidden_key_matches_event() {
        let event: CalendarEvent = serde_json::from_value(json!({
            "uid": "evt-1",
            "calendar_name": "Family",
            "title": "Dinner out",
            "start_time": "2024-03-01T18:00:00+00:00"
        }))
        .unwrap();
        let request = HideRequest::from(&event);
        let hidden = HiddenCalendarEvent::from_request(EntityId::new_local(), &request);
        assert_eq!(hidden.key(), event.hidden_key());
    }
}
