//! Shared wiring for tests: an in-memory store and a scripted server

use std::sync::Arc;

use chrono::NaiveDate;

use crate::api::mock::MockApi;
use crate::api::RemoteApi;
use crate::connectivity::Connectivity;
use crate::events::EventBus;
use crate::mutation::Mutations;
use crate::status::{ConnectionStatus, StatusIndicator};
use crate::storage::LocalStore;
use crate::sync::{RealtimeBridge, SyncEngine};
use crate::view::AppState;

/// A day in January 2024
pub(crate) fn day(n: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 1, n).unwrap()
}

pub(crate) struct Fixture {
    pub store: Arc<LocalStore>,
    pub api: Arc<MockApi>,
    pub state: Arc<AppState>,
    pub bus: EventBus,
    pub status: StatusIndicator,
    pub connectivity: Connectivity,
    pub engine: Arc<SyncEngine>,
    pub mutations: Arc<Mutations>,
    pub bridge: RealtimeBridge,
}

impl Fixture {
    pub fn online() -> Self {
        Self::new(true)
    }

    pub fn offline() -> Self {
        Self::new(false)
    }

    fn new(online: bool) -> Self {
        let store = Arc::new(LocalStore::open_in_memory().unwrap());
        let api = Arc::new(MockApi::new());
        let remote: Arc<dyn RemoteApi> = api.clone();
        let state = Arc::new(AppState::new(false));
        let bus = EventBus::new();
        let initial = if online {
            ConnectionStatus::Online
        } else {
            ConnectionStatus::Offline
        };
        let status = StatusIndicator::new(initial, bus.clone());
        let connectivity = Connectivity::new(online);

        let engine = Arc::new(SyncEngine::new(
            store.clone(),
            remote.clone(),
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
        let bridge = RealtimeBridge::new(store.clone(), remote, state.clone(), bus.clone());

        Self {
            store,
            api,
            state,
            bus,
            status,
            connectivity,
            engine,
            mutations,
            bridge,
        }
    }

    pub async fn go_online_and_drain(&self) -> crate::sync::DrainReport {
        self.connectivity.set_online(true);
        self.engine.drain().await.unwrap()
    }
}
