//! Sync engine
//!
//! Replays the pending-change queue against the server. A drain works on a
//! snapshot of the queue taken when it starts and applies entries strictly
//! oldest-first; the first API failure stops the pass and leaves the failing
//! entry and everything after it queued for the next drain.
//!
//! The same dispatch code applies a mutation made while online, so a change
//! has one meaning whether it was sent immediately or replayed later.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::change::{Change, PendingChange, Subject};
use crate::api::{ApiError, ApiRetryClass, RemoteApi};
use crate::connectivity::Connectivity;
use crate::events::{EventBus, SyncEvent};
use crate::id::{EntityId, LocalId};
use crate::models::{Entity, EntityKind, HiddenCalendarEvent, Item, Note};
use crate::status::{ConnectionStatus, StatusIndicator};
use crate::storage::{LocalStore, StorageError, StorageResult};
use crate::view::{AppState, EditState};

/// Errors that stop a drain pass or an immediate send
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("API error: {0}")]
    Api(#[from] ApiError),
}

pub type SyncResult<T> = Result<T, SyncError>;

/// Outcome of dispatching one change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// The server accepted the change
    Applied,
    /// The change targets an entity that never reached the server
    Orphaned,
}

/// Summary of one drain pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrainReport {
    /// Changes the server accepted
    pub applied: usize,
    /// Changes dropped as no-ops
    pub discarded: usize,
    /// Changes still queued after the pass
    pub remaining: usize,
    /// The pass stopped on an API failure
    pub halted: bool,
    /// No pass ran (offline, or another drain was in flight)
    pub skipped: bool,
}

/// Drains the pending-change queue
pub struct SyncEngine {
    store: Arc<LocalStore>,
    api: Arc<dyn RemoteApi>,
    connectivity: Connectivity,
    state: Arc<AppState>,
    bus: EventBus,
    status: StatusIndicator,
    draining: AtomicBool,
}

/// Clears the in-flight flag however the drain ends
struct DrainGuard<'a>(&'a AtomicBool);

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl SyncEngine {
    pub fn new(
        store: Arc<LocalStore>,
        api: Arc<dyn RemoteApi>,
        connectivity: Connectivity,
        state: Arc<AppState>,
        bus: EventBus,
        status: StatusIndicator,
    ) -> Self {
        Self {
            store,
            api,
            connectivity,
            state,
            bus,
            status,
            draining: AtomicBool::new(false),
        }
    }

    pub fn status(&self) -> &StatusIndicator {
        &self.status
    }

    pub fn connectivity(&self) -> &Connectivity {
        &self.connectivity
    }

    pub fn is_draining(&self) -> bool {
        self.draining.load(Ordering::SeqCst)
    }

    /// Replay the queue once
    ///
    /// Any API failure halts the pass, whatever its [`ApiRetryClass`]. A
    /// permanent rejection (a 4xx other than 401/403/404) therefore keeps
    /// blocking every change queued behind it until the queue is reset.
    ///
    /// Concurrent calls collapse: if a drain is already running this returns
    /// immediately with `skipped` set.
    pub async fn drain(&self) -> SyncResult<DrainReport> {
        if !self.connectivity.is_online() {
            self.status.set(ConnectionStatus::Offline);
            return Ok(DrainReport {
                remaining: self.store.pending_count()?,
                skipped: true,
                ..Default::default()
            });
        }

        if self.draining.swap(true, Ordering::SeqCst) {
            debug!("Drain already in flight");
            return Ok(DrainReport {
                skipped: true,
                ..Default::default()
            });
        }
        let _guard = DrainGuard(&self.draining);

        let mut report = DrainReport::default();
        let mut auth_failed = false;
        let result = self.drain_pass(&mut report, &mut auth_failed).await;

        report.remaining = self.store.pending_count()?;
        let status = if auth_failed {
            ConnectionStatus::AuthRequired
        } else if !self.connectivity.is_online() {
            ConnectionStatus::Offline
        } else {
            ConnectionStatus::for_queue(report.remaining)
        };
        self.status.set(status);

        result?;
        info!(
            applied = report.applied,
            discarded = report.discarded,
            remaining = report.remaining,
            halted = report.halted,
            "Drain complete"
        );
        Ok(report)
    }

    async fn drain_pass(&self, report: &mut DrainReport, auth_failed: &mut bool) -> SyncResult<()> {
        let queue = self.store.pending_changes()?;
        if queue.is_empty() {
            return Ok(());
        }

        let mut remaining = queue.len();
        self.status.set(ConnectionStatus::Syncing { pending: remaining });

        for pending in queue {
            match self.dispatch(pending.date, &pending.change, Some(pending.id)).await {
                Ok(Step::Applied) => report.applied += 1,
                Ok(Step::Orphaned) => {
                    warn!(
                        id = pending.id,
                        change_type = pending.change.type_tag(),
                        "Discarding change for an entity that never reached the server"
                    );
                    self.store.remove_pending(pending.id)?;
                    report.discarded += 1;
                }
                Err(SyncError::Api(e)) => {
                    report.halted = true;
                    match e.retry_class() {
                        ApiRetryClass::Retryable => {
                            warn!(id = pending.id, error = %e, "Drain halted")
                        }
                        ApiRetryClass::ReauthRequired => {
                            *auth_failed = true;
                            warn!(id = pending.id, error = %e, "Drain halted: re-authentication required");
                        }
                        ApiRetryClass::Permanent => error!(
                            id = pending.id,
                            change_type = pending.change.type_tag(),
                            error = %e,
                            "Server rejected queued change; it blocks the queue until reset"
                        ),
                    }
                    return Ok(());
                }
                Err(e) => return Err(e),
            }

            remaining -= 1;
            self.status.set(ConnectionStatus::for_queue(remaining));
        }
        Ok(())
    }

    /// Send one change to the server and fold the response into local state
    ///
    /// `queued` is the change's queue id when it is being replayed; it is
    /// removed in the same transaction that records the response.
    pub(crate) async fn dispatch(
        &self,
        date: Option<NaiveDate>,
        change: &Change,
        queued: Option<i64>,
    ) -> SyncResult<Step> {
        match change {
            Change::NoteUpdate { text } => {
                let Some(date) = date else {
                    return Ok(Step::Orphaned);
                };
                let note = self.api.update_note(date, text).await?;
                self.reconcile_note(note, queued)?;
                Ok(Step::Applied)
            }
            Change::ItemToggle {
                line_index,
                itemized,
            } => {
                let Some(date) = date else {
                    return Ok(Step::Orphaned);
                };
                let item = self.api.set_itemized(date, *line_index, *itemized).await?;
                self.reconcile_item(date, item, queued)?;
                Ok(Step::Applied)
            }
            Change::NoteRewrite { text, items } => {
                let Some(date) = date else {
                    return Ok(Step::Orphaned);
                };
                let mut note = self.api.update_note(date, text).await?;
                for line_index in 0..note.meal_lines().len() {
                    let desired = items
                        .iter()
                        .any(|i| i.line_index == line_index && i.itemized);
                    if note.is_itemized(line_index) != desired {
                        let item = self.api.set_itemized(date, line_index, desired).await?;
                        note.set_item(item);
                    }
                }
                self.reconcile_note(note, queued)?;
                Ok(Step::Applied)
            }
            Change::Create { kind, id, payload } => {
                let local = match id {
                    EntityId::Local(local) => local,
                    EntityId::Remote(_) => {
                        let entity = self.api.create_entity(*kind, payload).await?;
                        self.finish_entity(entity, queued)?;
                        return Ok(Step::Applied);
                    }
                };
                if self.store.resolve_temp_id(local)?.is_some() {
                    // Already confirmed by an earlier attempt
                    self.remove_queued(queued)?;
                    return Ok(Step::Applied);
                }
                let entity = self.api.create_entity(*kind, payload).await?;
                self.complete_create(*kind, local, entity, queued)?;
                Ok(Step::Applied)
            }
            Change::Update { kind, id, payload } => {
                let Some(remote) = self.resolve(id)? else {
                    return Ok(Step::Orphaned);
                };
                match self.api.update_entity(*kind, &remote, payload).await {
                    Ok(entity) => {
                        self.finish_entity(entity, queued)?;
                        Ok(Step::Applied)
                    }
                    // Deleted on the server in the meantime
                    Err(e) if e.is_not_found() => Ok(Step::Orphaned),
                    Err(e) => Err(e.into()),
                }
            }
            Change::Delete { kind, id } => {
                let Some(remote) = self.resolve(id)? else {
                    return Ok(Step::Orphaned);
                };
                match self.api.delete_entity(*kind, &remote).await {
                    Ok(()) => {}
                    Err(e) if e.is_not_found() => debug!(%remote, "Already deleted"),
                    Err(e) => return Err(e.into()),
                }
                self.store.write(|tx| {
                    tx.delete_entity(*kind, &EntityId::Remote(remote.clone()))?;
                    if let Some(id) = queued {
                        tx.remove_pending(id)?;
                    }
                    Ok(())
                })?;
                Ok(Step::Applied)
            }
            Change::Hide { id, request } => match id {
                EntityId::Local(local) => {
                    if self.store.resolve_temp_id(local)?.is_some() {
                        self.remove_queued(queued)?;
                        return Ok(Step::Applied);
                    }
                    let hidden = self.api.hide_event(request).await?;
                    self.complete_hide(local, hidden, queued)?;
                    Ok(Step::Applied)
                }
                EntityId::Remote(_) => {
                    let hidden = self.api.hide_event(request).await?;
                    self.store.write(|tx| {
                        tx.put_hidden_event(&hidden)?;
                        if let Some(id) = queued {
                            tx.remove_pending(id)?;
                        }
                        Ok(())
                    })?;
                    Ok(Step::Applied)
                }
            },
            Change::Unhide { id, .. } => {
                let Some(remote) = self.resolve(id)? else {
                    return Ok(Step::Orphaned);
                };
                match self.api.unhide_event(&remote).await {
                    Ok(()) => {}
                    Err(e) if e.is_not_found() => debug!(%remote, "Already unhidden"),
                    Err(e) => return Err(e.into()),
                }
                self.store.write(|tx| {
                    tx.delete_hidden_event(&EntityId::Remote(remote.clone()))?;
                    if let Some(id) = queued {
                        tx.remove_pending(id)?;
                    }
                    Ok(())
                })?;
                Ok(Step::Applied)
            }
        }
    }

    /// Server id for an entity id; `None` for an unconfirmed local id
    fn resolve(&self, id: &EntityId) -> StorageResult<Option<String>> {
        match id {
            EntityId::Remote(remote) => Ok(Some(remote.clone())),
            EntityId::Local(local) => self.store.resolve_temp_id(local),
        }
    }

    /// Whether a change newer than `queued` targets the subject
    fn superseded(&self, subject: &Subject, queued: Option<i64>) -> StorageResult<bool> {
        match queued {
            Some(id) => self.store.has_pending_after(id, subject),
            None => self.store.has_pending_for(subject),
        }
    }

    fn remove_queued(&self, queued: Option<i64>) -> StorageResult<()> {
        if let Some(id) = queued {
            self.store.remove_pending(id)?;
        }
        Ok(())
    }

    /// Whether the note editor holds text for `date` newer than this response
    ///
    /// A replayed change never outranks a commit in progress; the editor's
    /// own send (`queued` is `None`) only loses to an edit made after it.
    fn held_by_editor(&self, date: NaiveDate, queued: Option<i64>) -> bool {
        match self.state.edit_state(date) {
            EditState::Idle => false,
            EditState::Dirty => true,
            EditState::Committing => queued.is_some(),
        }
    }

    /// Cache the server's note wholesale unless a newer local edit exists
    fn reconcile_note(&self, note: Note, queued: Option<i64>) -> StorageResult<()> {
        let date = note.date;
        if self.held_by_editor(date, queued) || self.superseded(&Subject::Note(date), queued)? {
            self.remove_queued(queued)?;
            return Ok(());
        }

        self.store.write(|tx| {
            tx.put_note(&note)?;
            if let Some(id) = queued {
                tx.remove_pending(id)?;
            }
            Ok(())
        })?;
        self.state.set_note(note.clone());
        self.bus.publish(&SyncEvent::NoteUpdated(note));
        Ok(())
    }

    fn reconcile_item(&self, date: NaiveDate, item: Item, queued: Option<i64>) -> StorageResult<()> {
        if self.superseded(&Subject::Note(date), queued)? {
            self.remove_queued(queued)?;
            return Ok(());
        }

        let note = self.store.write(|tx| {
            let mut note = tx.get_note(date)?.unwrap_or_else(|| Note::empty(date));
            note.set_item(item);
            tx.put_note(&note)?;
            if let Some(id) = queued {
                tx.remove_pending(id)?;
            }
            Ok(note)
        })?;
        self.state.set_note(note);
        self.bus.publish(&SyncEvent::ItemUpdated { date, item });
        Ok(())
    }

    /// Cache a server-keyed entity response unless a newer change is queued
    fn finish_entity(&self, entity: Entity, queued: Option<i64>) -> StorageResult<()> {
        if self.superseded(&Subject::Entity(entity.id().clone()), queued)? {
            self.remove_queued(queued)?;
            return Ok(());
        }

        self.store.write(|tx| {
            tx.put_entity(&entity)?;
            if let Some(id) = queued {
                tx.remove_pending(id)?;
            }
            Ok(())
        })?;
        self.publish_entity(&entity, false);
        self.state.put_entity(entity);
        Ok(())
    }

    /// Map a confirmed local entity to its server id and re-key the cache
    ///
    /// With newer changes queued, the cached local row already holds the
    /// latest intent, so it is re-keyed as is instead of being overwritten
    /// by the response (and left absent if it was deleted locally).
    fn complete_create(
        &self,
        kind: EntityKind,
        local: &LocalId,
        entity: Entity,
        queued: Option<i64>,
    ) -> StorageResult<()> {
        let local_id = EntityId::Local(local.clone());
        let remote_id = entity.id().clone();
        let Some(remote) = remote_id.as_remote() else {
            return Err(StorageError::invalid(
                "temp_id_map",
                local.as_str(),
                "server returned a local id",
            ));
        };

        let cached = if self.superseded(&Subject::Entity(local_id.clone()), queued)? {
            self.store
                .get_entity(kind, &local_id)?
                .map(|e| e.with_id(remote_id.clone()))
        } else {
            Some(entity)
        };

        self.store
            .complete_create(queued, kind, local, remote, cached.as_ref())?;
        self.state.remove_entity(kind, &local_id);
        if let Some(entity) = cached {
            self.publish_entity(&entity, false);
            self.state.put_entity(entity);
        }
        info!(%local, %remote, kind = kind.label(), "Local id resolved");
        self.bus.publish(&SyncEvent::IdResolved {
            local: local.clone(),
            remote: remote_id,
        });
        Ok(())
    }

    fn complete_hide(
        &self,
        local: &LocalId,
        hidden: HiddenCalendarEvent,
        queued: Option<i64>,
    ) -> StorageResult<()> {
        let local_id = EntityId::Local(local.clone());
        let remote_id = hidden.id.clone();
        let Some(remote) = remote_id.as_remote() else {
            return Err(StorageError::invalid(
                "temp_id_map",
                local.as_str(),
                "server returned a local id",
            ));
        };

        let cached = if self.superseded(&Subject::Entity(local_id.clone()), queued)? {
            self.store
                .get_hidden_event(&local_id)?
                .map(|h| HiddenCalendarEvent {
                    id: remote_id.clone(),
                    ..h
                })
        } else {
            Some(hidden)
        };

        self.store
            .complete_hide(queued, local, remote, cached.as_ref())?;
        if let Some(hidden) = cached {
            self.state.hide(hidden);
        }
        self.bus.publish(&SyncEvent::IdResolved {
            local: local.clone(),
            remote: remote_id,
        });
        Ok(())
    }

    fn publish_entity(&self, entity: &Entity, deleted: bool) {
        let id = entity.id().clone();
        self.bus.publish(&match entity.kind() {
            EntityKind::Pantry => SyncEvent::PantryUpdated { id, deleted },
            EntityKind::MealIdea => SyncEvent::MealIdeasUpdated { id, deleted },
        });
    }
}

/// Commands sent to the sync task
#[derive(Debug, Clone)]
pub enum SyncCommand {
    /// Drain the queue now
    DrainNow,
    /// Shutdown the sync task
    Shutdown,
}

/// Handle to control the background sync task
pub struct SyncHandle {
    /// Send commands to the sync task
    pub command_tx: mpsc::Sender<SyncCommand>,
    task: JoinHandle<()>,
}

impl SyncHandle {
    /// Ask for a drain; returns false if the task has stopped
    pub async fn drain_now(&self) -> bool {
        self.command_tx.send(SyncCommand::DrainNow).await.is_ok()
    }

    /// Stop the task and wait for it to finish
    pub async fn shutdown(self) {
        let _ = self.command_tx.send(SyncCommand::Shutdown).await;
        if let Err(e) = self.task.await {
            error!(error = %e, "Sync task panicked");
        }
    }
}

/// Spawn the background sync task
///
/// Drains on every offline-to-online transition, on each heartbeat tick
/// while online (unless the server wants re-authentication) and on
/// [`SyncCommand::DrainNow`].
pub fn spawn_sync_task(engine: Arc<SyncEngine>, heartbeat: Duration) -> SyncHandle {
    let (command_tx, command_rx) = mpsc::channel(16);
    let task = tokio::spawn(sync_task_loop(engine, heartbeat, command_rx));
    SyncHandle { command_tx, task }
}

async fn sync_task_loop(
    engine: Arc<SyncEngine>,
    heartbeat: Duration,
    mut command_rx: mpsc::Receiver<SyncCommand>,
) {
    let mut online_rx = engine.connectivity.subscribe();
    let mut ticker = tokio::time::interval(heartbeat);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    if !engine.connectivity.is_online() {
        engine.status.set(ConnectionStatus::Offline);
    }

    loop {
        tokio::select! {
            changed = online_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let online = *online_rx.borrow_and_update();
                if online {
                    run_drain(&engine, "reconnect").await;
                } else {
                    engine.status.set(ConnectionStatus::Offline);
                }
            }
            _ = ticker.tick() => {
                if engine.connectivity.is_online()
                    && engine.status.current() != ConnectionStatus::AuthRequired
                {
                    run_drain(&engine, "heartbeat").await;
                }
            }
            cmd = command_rx.recv() => {
                match cmd {
                    Some(SyncCommand::DrainNow) => run_drain(&engine, "manual").await,
                    Some(SyncCommand::Shutdown) | None => break,
                }
            }
        }
    }
    debug!("Sync task stopped");
}

async fn run_drain(engine: &SyncEngine, trigger: &str) {
    debug!(trigger, "Drain triggered");
    if let Err(e) = engine.drain().await {
        error!(trigger, error = %e, "Drain failed");
    }
}
