//! Realtime event bridge
//!
//! Keeps a server-sent events subscription (`GET /api/stream`) open while
//! online and folds the server's change notifications into the local store
//! and the in-memory state, then republishes them on the event bus. Handles
//! reconnection automatically with exponential backoff.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use futures_util::StreamExt;
use reqwest::header::{ACCEPT, CACHE_CONTROL};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::change::Subject;
use super::engine::SyncResult;
use super::message::InboundEvent;
use super::sse::SseDecoder;
use crate::api::RemoteApi;
use crate::config::Config;
use crate::connectivity::Connectivity;
use crate::events::{EventBus, SyncEvent};
use crate::id::EntityId;
use crate::models::{CalendarDay, Entity, EntityKind, HiddenEventKey, Note};
use crate::storage::LocalStore;
use crate::view::AppState;

/// Merges realtime notifications into local state
pub struct RealtimeBridge {
    store: Arc<LocalStore>,
    api: Arc<dyn RemoteApi>,
    state: Arc<AppState>,
    bus: EventBus,
}

impl RealtimeBridge {
    pub fn new(
        store: Arc<LocalStore>,
        api: Arc<dyn RemoteApi>,
        state: Arc<AppState>,
        bus: EventBus,
    ) -> Self {
        Self {
            store,
            api,
            state,
            bus,
        }
    }

    /// Decode and apply one event payload; malformed payloads are logged and
    /// dropped
    pub async fn handle_message(&self, text: &str) {
        let event = match InboundEvent::parse(text) {
            Ok(event) => event,
            Err(e) => {
                warn!(error = %e, "Dropping realtime message");
                return;
            }
        };

        if let Err(e) = self.apply(event).await {
            warn!(error = %e, "Failed to apply realtime message");
        }
    }

    /// Apply one decoded notification
    pub async fn apply(&self, event: InboundEvent) -> SyncResult<()> {
        match event {
            InboundEvent::NoteUpdated(note) => {
                self.store.put_note(&note)?;
                self.state.set_note(note.clone());
                self.bus.publish(&SyncEvent::NoteUpdated(note));
            }
            InboundEvent::ItemUpdated { date, item } => {
                let note = self.store.write(|tx| {
                    let mut note = tx.get_note(date)?.unwrap_or_else(|| Note::empty(date));
                    note.set_item(item);
                    tx.put_note(&note)?;
                    Ok(note)
                })?;
                self.state.set_note(note);
                self.bus.publish(&SyncEvent::ItemUpdated { date, item });
            }
            InboundEvent::CalendarRefreshed { events_by_date } => {
                self.store.write(|tx| {
                    for (date, events) in &events_by_date {
                        tx.put_calendar_day(&CalendarDay {
                            date: *date,
                            events: events.clone(),
                        })?;
                    }
                    Ok(())
                })?;
                let dates: Vec<_> = events_by_date.keys().copied().collect();
                for (date, events) in events_by_date {
                    self.state.set_calendar_day(date, events);
                }
                debug!(days = dates.len(), "Calendar refreshed");
                self.bus.publish(&SyncEvent::CalendarRefreshed { dates });
            }
            InboundEvent::EventHidden(hidden) => {
                let key = hidden.key();
                self.store.write(|tx| {
                    tx.delete_hidden_by_key(&key)?;
                    tx.put_hidden_event(&hidden)
                })?;
                self.state.hide(hidden.clone());
                self.bus.publish(&SyncEvent::EventHidden(hidden));
            }
            InboundEvent::EventUnhidden(key) => {
                self.unhide(key)?;
            }
            InboundEvent::PantryUpdated { id, deleted } => {
                self.entity_changed(EntityKind::Pantry, id, deleted).await?;
            }
            InboundEvent::MealIdeasUpdated { id, deleted } => {
                self.entity_changed(EntityKind::MealIdea, id, deleted).await?;
            }
            InboundEvent::Ready => debug!("Realtime stream ready"),
        }
        Ok(())
    }

    fn unhide(&self, key: HiddenEventKey) -> SyncResult<()> {
        self.store.delete_hidden_by_key(&key)?;
        self.state.unhide(&key);
        self.bus.publish(&SyncEvent::EventUnhidden(key));
        Ok(())
    }

    /// Drop a deleted entity, or re-fetch the kind's list on any other change
    ///
    /// Entities with queued local changes keep their cached version until
    /// those changes drain.
    async fn entity_changed(&self, kind: EntityKind, id: EntityId, deleted: bool) -> SyncResult<()> {
        if deleted {
            self.store.delete_entity(kind, &id)?;
            self.state.remove_entity(kind, &id);
        } else {
            self.refetch_entities(kind).await?;
        }

        self.bus.publish(&match kind {
            EntityKind::Pantry => SyncEvent::PantryUpdated { id, deleted },
            EntityKind::MealIdea => SyncEvent::MealIdeasUpdated { id, deleted },
        });
        Ok(())
    }

    /// Replace the cached list of a kind with the server's
    ///
    /// Local entries and entities with queued changes keep their cached
    /// version.
    pub async fn refetch_entities(&self, kind: EntityKind) -> SyncResult<()> {
        let fetched = self.api.list_entities(kind).await?;
        let pending: Vec<EntityId> = self
            .store
            .pending_subjects()?
            .into_iter()
            .filter_map(|subject| match subject {
                Subject::Entity(id) => Some(id),
                Subject::Note(_) => None,
            })
            .collect();

        let mut merged: Vec<Entity> = fetched
            .into_iter()
            .filter(|e| !pending.contains(e.id()))
            .collect();
        for id in pending.iter().filter(|id| !id.is_local()) {
            if let Some(cached) = self.store.get_entity(kind, id)? {
                merged.push(cached);
            }
        }

        debug!(kind = kind.label(), count = merged.len(), "Entity list refreshed");
        self.store.replace_entities(kind, &merged)?;
        self.state.replace_entities(kind, merged);
        Ok(())
    }
}

/// Commands sent to the realtime task
#[derive(Debug, Clone)]
pub enum RealtimeCommand {
    /// Shutdown the realtime task
    Shutdown,
}

/// Subscription link status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkStatus {
    /// Not connected, not trying
    Disconnected,
    /// Attempting to connect
    Connecting,
    /// Connected and receiving
    Connected,
}

/// Path of the event stream under the API base URL
const STREAM_PATH: &str = "/api/stream";

/// The server sends a `: ping` comment every 15 seconds; a stream silent for
/// longer than this is treated as dead
const STREAM_IDLE_TIMEOUT: Duration = Duration::from_secs(45);

/// Configuration for the realtime subscription
#[derive(Debug, Clone)]
pub struct RealtimeConfig {
    /// Event stream URL
    pub url: String,
    /// Bearer token sent with the stream request
    pub auth_token: Option<String>,
    /// Timeout for establishing the connection
    pub connect_timeout: Duration,
    /// Initial reconnect delay
    pub initial_reconnect_delay: Duration,
    /// Maximum reconnect delay
    pub max_reconnect_delay: Duration,
}

impl RealtimeConfig {
    /// Realtime settings from the app config
    ///
    /// The stream URL is `realtime_url` if set, else `/api/stream` under the
    /// API URL; `None` when neither is configured.
    pub fn from_config(config: &Config) -> Option<Self> {
        let url = match (&config.realtime_url, &config.api_url) {
            (Some(url), _) => url.clone(),
            (None, Some(api)) => format!("{}{}", api.trim_end_matches('/'), STREAM_PATH),
            (None, None) => return None,
        };
        Some(Self {
            url,
            auth_token: config.auth_token.clone(),
            connect_timeout: config.request_timeout(),
            initial_reconnect_delay: config.initial_reconnect_delay(),
            max_reconnect_delay: config.max_reconnect_delay(),
        })
    }
}

/// Handle to control the realtime task
pub struct RealtimeHandle {
    /// Send commands to the realtime task
    pub command_tx: mpsc::Sender<RealtimeCommand>,
    /// Watch link status
    pub status_rx: watch::Receiver<LinkStatus>,
    task: JoinHandle<()>,
}

impl RealtimeHandle {
    /// Stop the task and wait for it to finish
    pub async fn shutdown(self) {
        let _ = self.command_tx.send(RealtimeCommand::Shutdown).await;
        let _ = self.task.await;
    }
}

/// Next reconnect delay: doubled, capped at `max`
pub fn next_delay(current: Duration, max: Duration) -> Duration {
    (current * 2).min(max)
}

/// Spawn the realtime subscription task
///
/// The task connects only while `connectivity` reads online, drops the
/// stream when it goes offline, and reconnects after transport errors.
pub fn spawn_realtime_task(
    config: RealtimeConfig,
    bridge: Arc<RealtimeBridge>,
    connectivity: Connectivity,
) -> RealtimeHandle {
    let (command_tx, command_rx) = mpsc::channel(4);
    let (status_tx, status_rx) = watch::channel(LinkStatus::Disconnected);

    let task = tokio::spawn(realtime_task_loop(
        config,
        bridge,
        connectivity,
        command_rx,
        status_tx,
    ));

    RealtimeHandle {
        command_tx,
        status_rx,
        task,
    }
}

/// How a connection ended
enum Exit {
    Shutdown,
    WentOffline,
    Closed,
}

/// Main realtime loop with reconnection
async fn realtime_task_loop(
    config: RealtimeConfig,
    bridge: Arc<RealtimeBridge>,
    connectivity: Connectivity,
    mut command_rx: mpsc::Receiver<RealtimeCommand>,
    status_tx: watch::Sender<LinkStatus>,
) {
    let mut reconnect_delay = config.initial_reconnect_delay;

    loop {
        if !connectivity.is_online() {
            tokio::select! {
                _ = connectivity.wait_online() => {}
                cmd = command_rx.recv() => {
                    match cmd {
                        Some(RealtimeCommand::Shutdown) | None => break,
                    }
                }
            }
        }

        let _ = status_tx.send(LinkStatus::Connecting);

        match connect_and_listen(&config, &bridge, &connectivity, &mut command_rx, &status_tx).await
        {
            Ok(Exit::Shutdown) => {
                let _ = status_tx.send(LinkStatus::Disconnected);
                break;
            }
            Ok(Exit::WentOffline) => {
                let _ = status_tx.send(LinkStatus::Disconnected);
                reconnect_delay = config.initial_reconnect_delay;
                continue;
            }
            Ok(Exit::Closed) => {
                // Connection closed normally, reset backoff
                reconnect_delay = config.initial_reconnect_delay;
            }
            Err(e) => {
                warn!(error = %e, delay_ms = reconnect_delay.as_millis() as u64, "Realtime connection error");
            }
        }

        let _ = status_tx.send(LinkStatus::Disconnected);

        // Wait before reconnecting, but check for shutdown command
        tokio::select! {
            _ = tokio::time::sleep(reconnect_delay) => {
                reconnect_delay = next_delay(reconnect_delay, config.max_reconnect_delay);
            }
            cmd = command_rx.recv() => {
                match cmd {
                    Some(RealtimeCommand::Shutdown) | None => break,
                }
            }
        }
    }
    debug!("Realtime task stopped");
}

/// Connect and dispatch events until disconnection, offline or shutdown
async fn connect_and_listen(
    config: &RealtimeConfig,
    bridge: &RealtimeBridge,
    connectivity: &Connectivity,
    command_rx: &mut mpsc::Receiver<RealtimeCommand>,
    status_tx: &watch::Sender<LinkStatus>,
) -> Result<Exit> {
    let client = reqwest::Client::builder()
        .connect_timeout(config.connect_timeout)
        .build()
        .context("Failed to build realtime client")?;

    let mut request = client
        .get(&config.url)
        .header(ACCEPT, "text/event-stream")
        .header(CACHE_CONTROL, "no-cache");
    if let Some(token) = &config.auth_token {
        request = request.bearer_auth(token);
    }

    let response = request
        .send()
        .await
        .context("Failed to connect to realtime server")?;
    let status = response.status();
    if !status.is_success() {
        bail!("Realtime server returned {}", status);
    }

    let mut body = response.bytes_stream();
    let mut decoder = SseDecoder::new();
    let mut online_rx = connectivity.subscribe();
    let idle = tokio::time::sleep(STREAM_IDLE_TIMEOUT);
    tokio::pin!(idle);

    let _ = status_tx.send(LinkStatus::Connected);
    info!(url = %config.url, "Realtime connected");

    loop {
        tokio::select! {
            cmd = command_rx.recv() => {
                match cmd {
                    Some(RealtimeCommand::Shutdown) | None => return Ok(Exit::Shutdown),
                }
            }

            changed = online_rx.changed() => {
                if changed.is_err() || !*online_rx.borrow_and_update() {
                    info!("Realtime disconnected: offline");
                    return Ok(Exit::WentOffline);
                }
            }

            _ = &mut idle => {
                bail!("Realtime stream silent for {}s", STREAM_IDLE_TIMEOUT.as_secs());
            }

            chunk = body.next() => {
                match chunk {
                    Some(Ok(bytes)) => {
                        idle.as_mut().reset(Instant::now() + STREAM_IDLE_TIMEOUT);
                        for data in decoder.push(&bytes) {
                            bridge.handle_message(&data).await;
                        }
                    }
                    Some(Err(e)) => return Err(e).context("Realtime stream failed"),
                    None => return Ok(Exit::Closed),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CalendarEvent, HiddenCalendarEvent, Item, MealIdea, PantryItem};
    use crate::testing::{day, Fixture};
    use chrono::{TimeZone, Utc};
    use std::collections::BTreeMap;

    fn dinner() -> CalendarEvent {
        CalendarEvent {
            uid: Some("evt-1".into()),
            calendar_name: Some("Family".into()),
            title: "Dinner out".into(),
            start_time: Utc.with_ymd_and_hms(2024, 1, 5, 18, 0, 0).unwrap(),
            end_time: None,
            all_day: false,
        }
    }

    #[tokio::test]
    async fn test_malformed_messages_dropped() {
        let fx = Fixture::online();
        fx.bridge.handle_message("not json").await;
        fx.bridge
            .handle_message(r#"{"type":"pantry.exploded","payload":{}}"#)
            .await;
        fx.bridge
            .handle_message(r#"{"type":"item.updated","payload":{"date":"nope"}}"#)
            .await;
        assert!(fx.store.notes_between(day(1), day(31)).unwrap().is_empty());
        assert!(fx.api.calls().is_empty());
    }

    #[tokio::test]
    async fn test_note_updated_replaces_wholesale() {
        let fx = Fixture::online();
        let mut old = Note::with_text(day(2), "Soup\nSalad");
        old.set_item(Item {
            line_index: 1,
            itemized: true,
        });
        fx.store.put_note(&old).unwrap();

        fx.bridge
            .handle_message(
                r#"{"type":"notes.updated","payload":{"date":"2024-01-02","notes":"Pasta","items":[]}}"#,
            )
            .await;

        let cached = fx.store.get_note(day(2)).unwrap().unwrap();
        assert_eq!(cached.text, "Pasta");
        assert!(cached.items.is_empty());
        assert_eq!(fx.state.note(day(2)).text, "Pasta");
    }

    #[tokio::test]
    async fn test_item_updated_patches_or_inserts() {
        let fx = Fixture::online();
        fx.store.put_note(&Note::with_text(day(2), "Soup\nSalad")).unwrap();

        fx.bridge
            .apply(InboundEvent::ItemUpdated {
                date: day(2),
                item: Item {
                    line_index: 1,
                    itemized: true,
                },
            })
            .await
            .unwrap();
        fx.bridge
            .apply(InboundEvent::ItemUpdated {
                date: day(2),
                item: Item {
                    line_index: 1,
                    itemized: false,
                },
            })
            .await
            .unwrap();

        let note = fx.store.get_note(day(2)).unwrap().unwrap();
        assert_eq!(note.text, "Soup\nSalad");
        assert_eq!(note.items.len(), 1);
        assert!(!note.is_itemized(1));
    }

    #[tokio::test]
    async fn test_calendar_refresh_respects_hidden_filter() {
        let fx = Fixture::online();
        let event = dinner();
        let hidden = HiddenCalendarEvent::from_request(
            EntityId::remote("h1"),
            &crate::models::HideRequest::from(&event),
        );
        fx.bridge.apply(InboundEvent::EventHidden(hidden)).await.unwrap();

        let mut events_by_date = BTreeMap::new();
        events_by_date.insert(day(5), vec![event.clone()]);
        fx.bridge
            .apply(InboundEvent::CalendarRefreshed { events_by_date })
            .await
            .unwrap();

        assert_eq!(fx.store.get_calendar_day(day(5)).unwrap().unwrap().events.len(), 1);
        assert!(fx.state.visible_events(day(5)).is_empty());
        fx.state.set_show_all(true);
        assert_eq!(fx.state.visible_events(day(5)).len(), 1);
        fx.state.set_show_all(false);

        fx.bridge
            .apply(InboundEvent::EventUnhidden(event.hidden_key()))
            .await
            .unwrap();
        assert_eq!(fx.state.visible_events(day(5)).len(), 1);
        assert!(fx.store.list_hidden_events().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_entity_deleted_drops_cache() {
        let fx = Fixture::online();
        let idea: Entity = MealIdea {
            id: EntityId::remote("m1"),
            title: "Curry".into(),
            updated_at: None,
        }
        .into();
        fx.store.put_entity(&idea).unwrap();
        fx.state.put_entity(idea);

        fx.bridge
            .handle_message(r#"{"type":"meal-ideas.updated","payload":{"id":"m1","deleted":true}}"#)
            .await;
        assert!(fx.store.list_meal_ideas().unwrap().is_empty());
        assert!(fx.state.meal_ideas().is_empty());
        assert!(fx.api.calls().is_empty());
    }

    #[tokio::test]
    async fn test_entity_refetch_keeps_pending_and_local() {
        let fx = Fixture::offline();
        let flour = fx.api.seed_entity(PantryItem::new("Flour", 1).into());
        let eggs = fx.api.seed_entity(PantryItem::new("Eggs", 6).into());
        fx.store.put_entity(&flour).unwrap();
        fx.store.put_entity(&eggs).unwrap();
        fx.state.put_entity(flour.clone());
        fx.state.put_entity(eggs.clone());

        // Local edit to flour queued; a new local item not yet sent
        fx.mutations
            .update_pantry_item(flour.id(), "Rye flour", 2)
            .await
            .unwrap();
        let (local_id, _) = fx.mutations.add_pantry_item("Milk", 1).await.unwrap();

        fx.connectivity.set_online(true);
        fx.bridge
            .handle_message(r#"{"type":"pantry.updated","payload":{"id":"srv-2"}}"#)
            .await;

        let items = fx.store.list_pantry_items().unwrap();
        assert_eq!(items.len(), 3);
        let find = |id: &EntityId| items.iter().find(|i| &i.id == id).unwrap().clone();
        assert_eq!(find(flour.id()).name, "Rye flour");
        assert_eq!(find(eggs.id()).name, "Eggs");
        assert_eq!(find(&local_id).name, "Milk");
        assert_eq!(fx.state.pantry_items().len(), 3);
    }

    #[test]
    fn test_next_delay_doubles_and_caps() {
        let max = Duration::from_secs(30);
        assert_eq!(next_delay(Duration::from_secs(1), max), Duration::from_secs(2));
        assert_eq!(next_delay(Duration::from_secs(20), max), max);
        assert_eq!(next_delay(max, max), max);
    }

    #[test]
    fn test_realtime_config_from_config() {
        let mut config = Config::default();
        assert!(RealtimeConfig::from_config(&config).is_none());

        config.api_url = Some("http://localhost:8000/".into());
        config.auth_token = Some("secret".into());
        let realtime = RealtimeConfig::from_config(&config).unwrap();
        assert_eq!(realtime.url, "http://localhost:8000/api/stream");
        assert_eq!(realtime.auth_token.as_deref(), Some("secret"));
        assert_eq!(realtime.initial_reconnect_delay, config.initial_reconnect_delay());

        config.realtime_url = Some("https://push.example.com/stream".into());
        let realtime = RealtimeConfig::from_config(&config).unwrap();
        assert_eq!(realtime.url, "https://push.example.com/stream");
    }

    #[tokio::test]
    async fn test_task_waits_while_offline_and_shuts_down() {
        let fx = Fixture::offline();
        let config = RealtimeConfig {
            url: "http://127.0.0.1:9/api/stream".into(),
            auth_token: None,
            connect_timeout: Duration::from_secs(1),
            initial_reconnect_delay: Duration::from_millis(10),
            max_reconnect_delay: Duration::from_millis(20),
        };
        let bridge = Arc::new(RealtimeBridge::new(
            fx.store.clone(),
            fx.api.clone(),
            fx.state.clone(),
            fx.bus.clone(),
        ));
        let handle = spawn_realtime_task(config, bridge, fx.connectivity.clone());

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(*handle.status_rx.borrow(), LinkStatus::Disconnected);
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_task_applies_streamed_events() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};
        use tokio::net::TcpListener;

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 1024];
            while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                let n = socket.read(&mut buf).await.unwrap();
                assert!(n > 0, "client closed before sending headers");
                request.extend_from_slice(&buf[..n]);
            }

            socket
                .write_all(
                    b"HTTP/1.1 200 OK\r\nContent-Type: text/event-stream\r\n\
                      Cache-Control: no-cache\r\nConnection: close\r\n\r\n",
                )
                .await
                .unwrap();
            let chunks: [&[u8]; 4] = [
                b"data: {\"type\":\"ready\",\"payload\":{}}\n\n: ping\n\n",
                b"data: {\"type\":\"notes.updated\",\"payload\":{\"date\":\"2024-01-0",
                b"1\",\"notes\":\"Curry\",\"items\":[]}}\n\n",
                b"data: not json\n\n",
            ];
            for chunk in chunks {
                socket.write_all(chunk).await.unwrap();
                socket.flush().await.unwrap();
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
            // Hold the stream open until the client hangs up
            let _ = socket.read(&mut buf).await;
            String::from_utf8_lossy(&request).to_lowercase()
        });

        let fx = Fixture::online();
        let config = RealtimeConfig {
            url: format!("http://{}/api/stream", addr),
            auth_token: Some("secret".into()),
            connect_timeout: Duration::from_secs(1),
            initial_reconnect_delay: Duration::from_secs(5),
            max_reconnect_delay: Duration::from_secs(5),
        };
        let bridge = Arc::new(RealtimeBridge::new(
            fx.store.clone(),
            fx.api.clone(),
            fx.state.clone(),
            fx.bus.clone(),
        ));
        let handle = spawn_realtime_task(config, bridge, fx.connectivity.clone());

        let mut waited = Duration::ZERO;
        while fx.state.note(day(1)).text != "Curry" && waited < Duration::from_secs(5) {
            tokio::time::sleep(Duration::from_millis(20)).await;
            waited += Duration::from_millis(20);
        }
        assert_eq!(fx.state.note(day(1)).text, "Curry");
        assert_eq!(fx.store.get_note(day(1)).unwrap().unwrap().text, "Curry");
        assert_eq!(*handle.status_rx.borrow(), LinkStatus::Connected);

        handle.shutdown().await;
        let request = server.await.unwrap();
        assert!(request.starts_with("get /api/stream "));
        assert!(request.contains("authorization: bearer secret"));
        assert!(request.contains("accept: text/event-stream"));
    }
}
