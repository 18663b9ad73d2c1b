//! Client facade
//!
//! Wires every component of the sync engine around one local store and one
//! remote API:
//!
//! ```ignore
//! let api = HttpApiClient::from_config(&config)?;
//! let client = Client::open(config, Arc::new(api), true)?;
//! client.hydrate(start, end)?;
//!
//! client.mutations().add_pantry_item("Rice", 2).await?;
//! let sync = client.spawn_sync();
//! ```

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use tracing::{debug, info};

use crate::api::RemoteApi;
use crate::config::Config;
use crate::connectivity::Connectivity;
use crate::events::{EventBus, SyncEvent};
use crate::models::{CalendarDay, EntityKind};
use crate::mutation::{Mutations, NoteEditor};
use crate::status::{ConnectionStatus, StatusIndicator};
use crate::storage::LocalStore;
use crate::sync::{
    spawn_realtime_task, spawn_sync_task, RealtimeBridge, RealtimeConfig, RealtimeHandle,
    Subject, SyncEngine, SyncHandle, SyncResult,
};
use crate::view::AppState;

/// What a refresh pulled from the server
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RefreshReport {
    /// Days whose calendar events were replaced
    pub days: usize,
    /// Notes replaced with the server's version
    pub notes: usize,
    /// Notes left alone because local edits are still queued
    pub notes_skipped: usize,
    /// Whether hidden events were replaced
    pub hidden_refreshed: bool,
}

/// The assembled sync engine
pub struct Client {
    config: Config,
    store: Arc<LocalStore>,
    state: Arc<AppState>,
    bus: EventBus,
    status: StatusIndicator,
    connectivity: Connectivity,
    engine: Arc<SyncEngine>,
    mutations: Arc<Mutations>,
    editor: NoteEditor,
    bridge: Arc<RealtimeBridge>,
    api: Arc<dyn RemoteApi>,
}

impl Client {
    /// Open the local store named by the config and wire everything to `api`
    pub fn open(config: Config, api: Arc<dyn RemoteApi>, online: bool) -> Result<Self> {
        let store = LocalStore::open(&config).context("Failed to open local store")?;
        Ok(Self::with_store(config, Arc::new(store), api, online))
    }

    /// Wire everything around an already opened store
    pub fn with_store(
        config: Config,
        store: Arc<LocalStore>,
        api: Arc<dyn RemoteApi>,
        online: bool,
    ) -> Self {
        let state = Arc::new(AppState::new(config.show_all_events));
        let bus = EventBus::new();
        let connectivity = Connectivity::new(online);
        let initial = if online {
            ConnectionStatus::Online
        } else {
            ConnectionStatus::Offline
        };
        let status = StatusIndicator::new(initial, bus.clone());

        let engine = Arc::new(SyncEngine::new(
            store.clone(),
            api.clone(),
            connectivity.clone(),
            state.clone(),
            bus.clone(),
            status.clone(),
        ));
        let mutations = Arc::new(Mutations::new(
            store.clone(),
            engine.clone(),
            state.clone(),
            bus.clone(),
            connectivity.clone(),
        ));
        let editor = NoteEditor::new(mutations.clone(), config.edit_debounce());
        let bridge = Arc::new(RealtimeBridge::new(
            store.clone(),
            api.clone(),
            state.clone(),
            bus.clone(),
        ));

        Self {
            config,
            store,
            state,
            bus,
            status,
            connectivity,
            engine,
            mutations,
            editor,
            bridge,
            api,
        }
    }

    /// Load a date window and every entity from the local store
    pub fn hydrate(&self, start: NaiveDate, end: NaiveDate) -> Result<()> {
        self.state
            .hydrate(&self.store, start, end)
            .context("Failed to load cached data")?;
        if let Ok(pending) = self.store.pending_count() {
            if pending > 0 && self.connectivity.is_online() {
                self.status.set(ConnectionStatus::for_queue(pending));
            }
        }
        Ok(())
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &Arc<LocalStore> {
        &self.store
    }

    pub fn state(&self) -> &Arc<AppState> {
        &self.state
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn status(&self) -> &StatusIndicator {
        &self.status
    }

    pub fn connectivity(&self) -> &Connectivity {
        &self.connectivity
    }

    pub fn engine(&self) -> &Arc<SyncEngine> {
        &self.engine
    }

    pub fn mutations(&self) -> &Arc<Mutations> {
        &self.mutations
    }

    pub fn editor(&self) -> &NoteEditor {
        &self.editor
    }

    pub fn bridge(&self) -> &Arc<RealtimeBridge> {
        &self.bridge
    }

    /// Pull a date window and the entity lists from the server
    ///
    /// Calendar days are replaced wholesale. Notes and entities with queued
    /// local changes are left alone; hidden events are only replaced while
    /// nothing is queued.
    pub async fn refresh(&self, start: NaiveDate, end: NaiveDate) -> SyncResult<RefreshReport> {
        let mut report = RefreshReport::default();
        let days = self.api.fetch_days(start, end).await?;

        for day in days {
            self.store.put_calendar_day(&CalendarDay {
                date: day.date,
                events: day.events.clone(),
            })?;
            self.state.set_calendar_day(day.date, day.events);
            report.days += 1;

            let Some(note) = day.meal_note else {
                continue;
            };
            if self.store.has_pending_for(&Subject::Note(note.date))? {
                debug!(date = %note.date, "Keeping locally edited note");
                report.notes_skipped += 1;
                continue;
            }
            self.store.put_note(&note)?;
            self.state.set_note(note.clone());
            self.bus.publish(&SyncEvent::NoteUpdated(note));
            report.notes += 1;
        }
        self.bus.publish(&SyncEvent::CalendarRefreshed {
            dates: start.iter_days().take_while(|d| *d <= end).collect(),
        });

        self.bridge.refetch_entities(EntityKind::Pantry).await?;
        self.bridge.refetch_entities(EntityKind::MealIdea).await?;

        if self.store.pending_count()? == 0 {
            let hidden = self.api.list_hidden_events().await?;
            self.store.replace_hidden_events(&hidden)?;
            self.state.replace_hidden(self.store.list_hidden_events()?);
            report.hidden_refreshed = true;
        }

        info!(
            days = report.days,
            notes = report.notes,
            skipped = report.notes_skipped,
            "Refreshed from server"
        );
        Ok(report)
    }

    /// Start the background drain loop
    pub fn spawn_sync(&self) -> SyncHandle {
        spawn_sync_task(self.engine.clone(), self.config.heartbeat_interval())
    }

    /// Start the realtime subscription; `None` without an API or realtime URL
    pub fn spawn_realtime(&self) -> Option<RealtimeHandle> {
        let config = RealtimeConfig::from_config(&self.config)?;
        Some(spawn_realtime_task(
            config,
            self.bridge.clone(),
            self.connectivity.clone(),
        ))
    }
}
