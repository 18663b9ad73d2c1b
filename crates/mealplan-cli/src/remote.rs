//! Remote API selection for one CLI run
//!
//! With an `api_url` configured the HTTP adapter is used and a health probe
//! decides whether the run starts online. Without one (or with `--offline`)
//! every change is queued locally.

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::NaiveDate;
use serde_json::Value;
use tracing::{info, warn};

use mealplan_core::api::{ApiResult, DayData};
use mealplan_core::models::HideRequest;
use mealplan_core::{
    ApiError, Config, Entity, EntityKind, HiddenCalendarEvent, HttpApiClient, Item, Note,
    RemoteApi,
};

/// Stand-in used when no server is configured; every call fails as a
/// network error so the change stays queued
struct NoServer;

fn no_server<T>() -> ApiResult<T> {
    Err(ApiError::Network("no api_url configured".to_string()))
}

#[async_trait]
impl RemoteApi for NoServer {
    async fn create_entity(&self, _kind: EntityKind, _payload: &Value) -> ApiResult<Entity> {
        no_server()
    }

    async fn update_entity(&self, _kind: EntityKind, _id: &str, _payload: &Value) -> ApiResult<Entity> {
        no_server()
    }

    async fn delete_entity(&self, _kind: EntityKind, _id: &str) -> ApiResult<()> {
        no_server()
    }

    async fn update_note(&self, _date: NaiveDate, _text: &str) -> ApiResult<Note> {
        no_server()
    }

    async fn set_itemized(&self, _date: NaiveDate, _line_index: usize, _itemized: bool) -> ApiResult<Item> {
        no_server()
    }

    async fn hide_event(&self, _request: &HideRequest) -> ApiResult<HiddenCalendarEvent> {
        no_server()
    }

    async fn unhide_event(&self, _id: &str) -> ApiResult<()> {
        no_server()
    }

    async fn list_entities(&self, _kind: EntityKind) -> ApiResult<Vec<Entity>> {
        no_server()
    }

    async fn list_hidden_events(&self) -> ApiResult<Vec<HiddenCalendarEvent>> {
        no_server()
    }

    async fn fetch_days(&self, _start: NaiveDate, _end: NaiveDate) -> ApiResult<Vec<DayData>> {
        no_server()
    }
}

/// Pick the remote API and whether to start online
pub async fn connect(config: &Config, offline: bool) -> Result<(Arc<dyn RemoteApi>, bool)> {
    let Some(http) = HttpApiClient::from_config(config).context("Invalid API configuration")?
    else {
        info!("No api_url configured, working offline");
        return Ok((Arc::new(NoServer), false));
    };

    if offline {
        return Ok((Arc::new(http), false));
    }

    let online = match http.health().await {
        Ok(()) => true,
        // Reachable; the status indicator reports the credential problem
        Err(e) if e.is_unauthorized() => true,
        Err(e) => {
            warn!(url = http.base_url(), error = %e, "Server unreachable, working offline");
            false
        }
    };
    Ok((Arc::new(http), online))
}
