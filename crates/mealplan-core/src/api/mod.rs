//! Remote API contract
//!
//! The sync layer talks to the server only through [`RemoteApi`], which lets
//! the engine run against the HTTP adapter in production and an in-memory
//! server in tests.

mod error;
pub mod http;
#[cfg(test)]
pub(crate) mod mock;

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub use error::{ApiError, ApiResult, ApiRetryClass};
pub use http::HttpApiClient;

use crate::models::{
    CalendarEvent, Entity, EntityKind, HiddenCalendarEvent, HideRequest, Item, Note,
};

/// Notes and events for one date, as returned by a range fetch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DayData {
    pub date: NaiveDate,
    #[serde(default)]
    pub events: Vec<CalendarEvent>,
    #[serde(default)]
    pub meal_note: Option<Note>,
}

/// Typed operations against the authoritative server
///
/// Every method distinguishes an unauthorized response
/// ([`ApiError::is_unauthorized`]) from other failures.
#[async_trait]
pub trait RemoteApi: Send + Sync {
    /// Create a pantry item or meal idea; the response carries the server id
    async fn create_entity(&self, kind: EntityKind, payload: &Value) -> ApiResult<Entity>;

    async fn update_entity(&self, kind: EntityKind, id: &str, payload: &Value)
        -> ApiResult<Entity>;

    async fn delete_entity(&self, kind: EntityKind, id: &str) -> ApiResult<()>;

    /// Replace the note text for a date; the server re-derives its items
    async fn update_note(&self, date: NaiveDate, text: &str) -> ApiResult<Note>;

    async fn set_itemized(&self, date: NaiveDate, line_index: usize, itemized: bool)
        -> ApiResult<Item>;

    async fn hide_event(&self, request: &HideRequest) -> ApiResult<HiddenCalendarEvent>;

    async fn unhide_event(&self, id: &str) -> ApiResult<()>;

    async fn list_entities(&self, kind: EntityKind) -> ApiResult<Vec<Entity>>;

    async fn list_hidden_events(&self) -> ApiResult<Vec<HiddenCalendarEvent>>;

    /// Notes and events for every date in an inclusive range
    async fn fetch_days(&self, start: NaiveDate, end: NaiveDate) -> ApiResult<Vec<DayData>>;
}
