//! Per-note edit coalescing
//!
//! Keystroke-level edits are applied and persisted immediately but only sent
//! after the note has been quiet for the debounce window. Each date runs a
//! small state machine:
//!
//! ```text
//! Idle --edit--> Dirty --timer/flush--> Committing --done--> Idle
//!                  ^                        |
//!                  +---------edit-----------+  (recommits after)
//! ```
//!
//! A new edit cancels the pending timer. Commits are serialized so two
//! versions of the same note are never in flight at once. The state lives in
//! [`AppState`](crate::view::AppState) so the sync engine leaves a note alone
//! while it holds unsent text.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::NaiveDate;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::{MutationOutcome, MutationResult, Mutations};
pub use crate::view::EditState;

struct Slot {
    generation: u64,
    text: String,
    timer: Option<JoinHandle<()>>,
}

struct Inner {
    mutations: Arc<Mutations>,
    debounce: Duration,
    slots: Mutex<HashMap<NaiveDate, Slot>>,
    commit_lock: tokio::sync::Mutex<()>,
}

/// Debounced note editor
#[derive(Clone)]
pub struct NoteEditor {
    inner: Arc<Inner>,
}

impl NoteEditor {
    pub fn new(mutations: Arc<Mutations>, debounce: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                mutations,
                debounce,
                slots: Mutex::new(HashMap::new()),
                commit_lock: tokio::sync::Mutex::new(()),
            }),
        }
    }

    /// Record an edit to a note
    ///
    /// The text is visible and persisted once this returns; sending happens
    /// after the debounce window unless another edit arrives first.
    pub fn edit(&self, date: NaiveDate, text: &str) -> MutationResult<()> {
        let note = self.inner.mutations.apply_note_text(date, text);
        self.inner.mutations.persist_note(&note)?;

        let mut slots = self.inner.slots();
        let slot = slots.entry(date).or_insert_with(|| Slot {
            generation: 0,
            text: String::new(),
            timer: None,
        });
        slot.generation += 1;
        self.inner.mutations.state.set_edit_state(date, EditState::Dirty);
        slot.text = text.to_string();
        if let Some(timer) = slot.timer.take() {
            timer.abort();
        }

        let inner = Arc::clone(&self.inner);
        let generation = slot.generation;
        slot.timer = Some(tokio::spawn(async move {
            tokio::time::sleep(inner.debounce).await;
            if !inner.claim_timer(date, generation) {
                return;
            }
            if let Err(e) = inner.commit(date, generation).await {
                warn!(%date, error = %e, "Debounced note commit failed");
            }
        }));
        Ok(())
    }

    /// Send a note's pending edit now
    ///
    /// Returns `None` when there was nothing to send.
    pub async fn flush(&self, date: NaiveDate) -> MutationResult<Option<MutationOutcome>> {
        let generation = {
            let mut slots = self.inner.slots();
            let Some(slot) = slots.get_mut(&date) else {
                return Ok(None);
            };
            if let Some(timer) = slot.timer.take() {
                timer.abort();
            }
            slot.generation
        };
        self.inner.commit(date, generation).await
    }

    /// Send every pending edit now
    pub async fn flush_all(&self) -> MutationResult<()> {
        let dates: Vec<NaiveDate> = self.inner.slots().keys().copied().collect();
        for date in dates {
            self.flush(date).await?;
        }
        Ok(())
    }

    pub fn state(&self, date: NaiveDate) -> EditState {
        self.inner.mutations.state.edit_state(date)
    }
}

impl Inner {
    fn slots(&self) -> MutexGuard<'_, HashMap<NaiveDate, Slot>> {
        self.slots.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Detach a fired timer from its slot so a later edit cannot abort the
    /// commit it is about to run
    fn claim_timer(&self, date: NaiveDate, generation: u64) -> bool {
        match self.slots().get_mut(&date) {
            Some(slot) if slot.generation == generation => {
                slot.timer.take();
                true
            }
            _ => false,
        }
    }

    async fn commit(&self, date: NaiveDate, generation: u64) -> MutationResult<Option<MutationOutcome>> {
        let _guard = self.commit_lock.lock().await;

        let state = &self.mutations.state;
        let text = {
            let slots = self.slots();
            match slots.get(&date) {
                Some(slot)
                    if slot.generation == generation
                        && state.edit_state(date) == EditState::Dirty =>
                {
                    state.set_edit_state(date, EditState::Committing);
                    slot.text.clone()
                }
                _ => return Ok(None),
            }
        };

        debug!(%date, generation, "Committing note edit");
        let result = self.mutations.commit_note(date, &text).await;

        let mut slots = self.slots();
        if slots.get(&date).is_some_and(|slot| slot.generation == generation) {
            slots.remove(&date);
            state.set_edit_state(date, EditState::Idle);
        }
        result.map(Some)
    }
}
