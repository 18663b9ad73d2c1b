//! Queued mutations
//!
//! A [`Change`] is one unsent mutation. It is stored in the
//! `pending_changes` table split into a `type` tag and a JSON `payload`,
//! which is exactly the serde adjacently-tagged representation.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::id::EntityId;
use crate::models::{EntityKind, HiddenEventKey, HideRequest, Item};

/// One mutation waiting to be applied to the server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum Change {
    /// Replace a note's text
    NoteUpdate { text: String },
    /// Set the itemized flag of one meal line
    ItemToggle { line_index: usize, itemized: bool },
    /// Replace a note's text and item flags together (one half of a move)
    NoteRewrite { text: String, items: Vec<Item> },
    Create {
        kind: EntityKind,
        id: EntityId,
        payload: Value,
    },
    Update {
        kind: EntityKind,
        id: EntityId,
        payload: Value,
    },
    Delete { kind: EntityKind, id: EntityId },
    Hide { id: EntityId, request: HideRequest },
    Unhide { id: EntityId, key: HiddenEventKey },
}

impl Change {
    /// Tag stored in the `type` column
    pub fn type_tag(&self) -> &'static str {
        match self {
            Change::NoteUpdate { .. } => "note_update",
            Change::ItemToggle { .. } => "item_toggle",
            Change::NoteRewrite { .. } => "note_rewrite",
            Change::Create { .. } => "create",
            Change::Update { .. } => "update",
            Change::Delete { .. } => "delete",
            Change::Hide { .. } => "hide",
            Change::Unhide { .. } => "unhide",
        }
    }

    /// Whether this change introduces a new entity (and so may carry a local id)
    pub fn is_add(&self) -> bool {
        matches!(self, Change::Create { .. } | Change::Hide { .. })
    }

    /// Whether this change is scoped to a note date
    pub fn is_note_change(&self) -> bool {
        matches!(
            self,
            Change::NoteUpdate { .. } | Change::ItemToggle { .. } | Change::NoteRewrite { .. }
        )
    }

    /// Id of the entity this change targets, if it is id-keyed
    pub fn entity_id(&self) -> Option<&EntityId> {
        match self {
            Change::Create { id, .. }
            | Change::Update { id, .. }
            | Change::Delete { id, .. }
            | Change::Hide { id, .. }
            | Change::Unhide { id, .. } => Some(id),
            _ => None,
        }
    }

    /// Split into the `(type, payload)` column pair
    pub fn to_columns(&self) -> serde_json::Result<(String, String)> {
        let mut value = serde_json::to_value(self)?;
        let payload = value
            .get_mut("payload")
            .map(Value::take)
            .unwrap_or(Value::Null);
        Ok((self.type_tag().to_string(), serde_json::to_string(&payload)?))
    }

    /// Rebuild from the `(type, payload)` column pair
    pub fn from_columns(change_type: &str, payload: &str) -> serde_json::Result<Self> {
        let payload: Value = serde_json::from_str(payload)?;
        serde_json::from_value(json!({ "type": change_type, "payload": payload }))
    }
}

/// What a queued change is about, used to keep changes to one subject in order
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Subject {
    Note(NaiveDate),
    Entity(EntityId),
}

/// A row of the pending-change queue
#[derive(Debug, Clone, PartialEq)]
pub struct PendingChange {
    /// Surrogate key; queue order
    pub id: i64,
    /// Subject date for note changes
    pub date: Option<NaiveDate>,
    pub change: Change,
    pub created_at: DateTime<Utc>,
}

impl Subject {
    /// Subject of a change scoped to `date` (ignored for id-keyed changes)
    pub fn of(date: Option<NaiveDate>, change: &Change) -> Option<Self> {
        if change.is_note_change() {
            return date.map(Subject::Note);
        }
        change.entity_id().cloned().map(Subject::Entity)
    }
}

impl PendingChange {
    pub fn subject(&self) -> Option<Subject> {
        Subject::of(self.date, &self.change)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_columns_split_tag_and_payload() {
        let change = Change::ItemToggle {
            line_index: 2,
            itemized: true,
        };
        let (tag, payload) = change.to_columns().unwrap();
        assert_eq!(tag, "item_toggle");
        let value: Value = serde_json::from_str(&payload).unwrap();
        assert_eq!(value, json!({"line_index": 2, "itemized": true}));

        assert_eq!(Change::from_columns(&tag, &payload).unwrap(), change);
    }

    #[test]
    fn test_create_payload_keeps_local_id_encoding() {
        let id = EntityId::new_local();
        let change = Change::Create {
            kind: EntityKind::Pantry,
            id: id.clone(),
            payload: json!({"name": "Rice", "quantity": 2}),
        };
        let (tag, payload) = change.to_columns().unwrap();
        assert!(payload.contains("local:"));
        assert!(payload.contains("\"pantry\""));

        let back = Change::from_columns(&tag, &payload).unwrap();
        assert_eq!(back.entity_id(), Some(&id));
        assert!(back.is_add());
    }

    #[test]
    fn test_unknown_type_rejected() {
        assert!(Change::from_columns("teleport", "{}").is_err());
    }

    #[test]
    fn test_subject() {
        let date: NaiveDate = "2024-03-01".parse().unwrap();
        let note = PendingChange {
            id: 1,
            date: Some(date),
            change: Change::NoteUpdate {
                text: "Soup".into(),
            },
            created_at: Utc::now(),
        };
        assert_eq!(note.subject(), Some(Subject::Note(date)));

        let delete = PendingChange {
            id: 2,
            date: None,
            change: Change::Delete {
                kind: EntityKind::MealIdea,
                id: EntityId::remote("srv-3"),
            },
            created_at: Utc::now(),
        };
        assert_eq!(
            delete.subject(),
            Some(Subject::Entity(EntityId::remote("srv-3")))
        );
    }
}
