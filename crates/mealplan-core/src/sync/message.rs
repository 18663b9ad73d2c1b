//! Realtime channel messages
//!
//! Every message is the `data:` payload of one server-sent event, a JSON
//! object `{"type": ..., "payload": ...}`. The recognised types and their
//! payloads:
//!
//! | type                 | payload                                         |
//! |----------------------|-------------------------------------------------|
//! | `notes.updated`      | a full note (`date`, `notes`, `items`)          |
//! | `item.updated`       | `date`, `line_index`, `itemized`                |
//! | `calendar.refreshed` | `events_by_date: {date: [event]}`               |
//! | `calendar.hidden`    | a hidden event (`id`, `event_uid`, ...)         |
//! | `calendar.unhidden`  | `event_uid`, `calendar_name`, `start_time`      |
//! | `pantry.updated`     | `id`, optional `deleted`                        |
//! | `meal-ideas.updated` | `id`, optional `deleted`                        |
//! | `ready`              | none; sent once when the stream opens           |

use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

use crate::id::EntityId;
use crate::models::{CalendarEvent, HiddenCalendarEvent, HiddenEventKey, Item, Note};

/// Errors decoding a realtime message
#[derive(Debug, Error)]
pub enum MessageError {
    #[error("Malformed message: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("Unknown message type: {0}")]
    UnknownType(String),
}

/// A decoded realtime notification
#[derive(Debug, Clone, PartialEq)]
pub enum InboundEvent {
    NoteUpdated(Note),
    ItemUpdated {
        date: NaiveDate,
        item: Item,
    },
    CalendarRefreshed {
        events_by_date: BTreeMap<NaiveDate, Vec<CalendarEvent>>,
    },
    EventHidden(HiddenCalendarEvent),
    EventUnhidden(HiddenEventKey),
    PantryUpdated {
        id: EntityId,
        deleted: bool,
    },
    MealIdeasUpdated {
        id: EntityId,
        deleted: bool,
    },
    /// Stream handshake; carries no data
    Ready,
}

#[derive(Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    payload: Value,
}

#[derive(Deserialize)]
struct ItemPayload {
    date: NaiveDate,
    line_index: usize,
    itemized: bool,
}

#[derive(Deserialize)]
struct RefreshPayload {
    #[serde(default)]
    events_by_date: BTreeMap<NaiveDate, Vec<CalendarEvent>>,
}

#[derive(Deserialize)]
struct ChangedPayload {
    id: EntityId,
    #[serde(default)]
    deleted: bool,
}

impl InboundEvent {
    /// Decode one event payload
    pub fn parse(text: &str) -> Result<Self, MessageError> {
        let envelope: Envelope = serde_json::from_str(text)?;
        let payload = envelope.payload;

        let event = match envelope.kind.as_str() {
            "notes.updated" => InboundEvent::NoteUpdated(serde_json::from_value(payload)?),
            "item.updated" => {
                let p: ItemPayload = serde_json::from_value(payload)?;
                InboundEvent::ItemUpdated {
                    date: p.date,
                    item: Item {
                        line_index: p.line_index,
                        itemized: p.itemized,
                    },
                }
            }
            "calendar.refreshed" => {
                let p: RefreshPayload = serde_json::from_value(payload)?;
                InboundEvent::CalendarRefreshed {
                    events_by_date: p.events_by_date,
                }
            }
            "calendar.hidden" => InboundEvent::EventHidden(serde_json::from_value(payload)?),
            "calendar.unhidden" => InboundEvent::EventUnhidden(serde_json::from_value(payload)?),
            "pantry.updated" => {
                let p: ChangedPayload = serde_json::from_value(payload)?;
                InboundEvent::PantryUpdated {
                    id: p.id,
                    deleted: p.deleted,
                }
            }
            "meal-ideas.updated" => {
                let p: ChangedPayload = serde_json::from_value(payload)?;
                InboundEvent::MealIdeasUpdated {
                    id: p.id,
                    deleted: p.deleted,
                }
            }
            "ready" => InboundEvent::Ready,
            other => return Err(MessageError::UnknownType(other.to_string())),
        };
        Ok(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_note_updated() {
        let event = InboundEvent::parse(
            r#"{"type":"notes.updated","payload":{"date":"2024-03-01","notes":"Pasta\nSoup","items":[{"line_index":1,"itemized":true}]}}"#,
        )
        .unwrap();
        match event {
            InboundEvent::NoteUpdated(note) => {
                assert_eq!(note.meal_lines(), vec!["Pasta", "Soup"]);
                assert!(note.is_itemized(1));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_parse_calendar_refreshed() {
        let event = InboundEvent::parse(
            r#"{"type":"calendar.refreshed","payload":{
                "events_by_date":{"2024-03-01":[{"title":"Dentist","start_time":"2024-03-01T09:00:00","all_day":false}]},
                "last_refresh":"2024-03-01T08:00:00Z"}}"#,
        )
        .unwrap();
        let InboundEvent::CalendarRefreshed { events_by_date } = event else {
            panic!("expected calendar.refreshed");
        };
        let date: NaiveDate = "2024-03-01".parse().unwrap();
        assert_eq!(events_by_date[&date][0].title, "Dentist");
    }

    #[test]
    fn test_parse_entity_changes() {
        assert_eq!(
            InboundEvent::parse(r#"{"type":"pantry.updated","payload":{"id":"p1","deleted":true}}"#)
                .unwrap(),
            InboundEvent::PantryUpdated {
                id: EntityId::remote("p1"),
                deleted: true
            }
        );
        assert_eq!(
            InboundEvent::parse(r#"{"type":"meal-ideas.updated","payload":{"id":"m1"}}"#).unwrap(),
            InboundEvent::MealIdeasUpdated {
                id: EntityId::remote("m1"),
                deleted: false
            }
        );
    }

    #[test]
    fn test_parse_calendar_hidden() {
        let event = InboundEvent::parse(
            r#"{"type":"calendar.hidden","payload":{"id":"h1","event_uid":"evt-1",
                "calendar_name":"Family","start_time":"2024-03-01T18:00:00Z","title":"Dinner out"}}"#,
        )
        .unwrap();
        let InboundEvent::EventHidden(hidden) = event else {
            panic!("expected calendar.hidden");
        };
        assert_eq!(hidden.id, EntityId::remote("h1"));
        assert_eq!(hidden.title, "Dinner out");
        assert_eq!(hidden.key().event_uid, "evt-1");
        assert_eq!(hidden.key().calendar_name, "Family");
        assert_eq!(hidden.start_time.to_rfc3339(), "2024-03-01T18:00:00+00:00");
    }

    #[test]
    fn test_parse_calendar_unhidden() {
        let event = InboundEvent::parse(
            r#"{"type":"calendar.unhidden","payload":{"event_uid":"evt-1",
                "calendar_name":"Family","start_time":"2024-03-01T18:00:00"}}"#,
        )
        .unwrap();
        let InboundEvent::EventUnhidden(key) = event else {
            panic!("expected calendar.unhidden");
        };
        assert_eq!(key.event_uid, "evt-1");
        assert_eq!(key.calendar_name, "Family");
        assert_eq!(key.start_time.to_rfc3339(), "2024-03-01T18:00:00+00:00");

        // A key without its start time can't match anything
        assert!(matches!(
            InboundEvent::parse(r#"{"type":"calendar.unhidden","payload":{"event_uid":"evt-1","calendar_name":"Family"}}"#),
            Err(MessageError::Malformed(_))
        ));
    }

    #[test]
    fn test_parse_ready() {
        assert_eq!(InboundEvent::parse(r#"{"type":"ready"}"#).unwrap(), InboundEvent::Ready);
    }

    #[test]
    fn test_malformed_and_unknown() {
        assert!(matches!(
            InboundEvent::parse("not json"),
            Err(MessageError::Malformed(_))
        ));
        assert!(matches!(
            InboundEvent::parse(r#"{"type":"item.updated","payload":{"date":"2024-03-01"}}"#),
            Err(MessageError::Malformed(_))
        ));
        assert!(matches!(
            InboundEvent::parse(r#"{"type":"weather.changed","payload":{}}"#),
            Err(MessageError::UnknownType(_))
        ));
    }
}
