//! Meal planner sync core
//!
//! This crate provides the offline-first sync engine behind the meal
//! planner: every user action is applied locally first and reaches the
//! server when connectivity allows.
//!
//! # Architecture
//!
//! - **Local store**: SQLite cache of notes, pantry items, meal ideas,
//!   calendar days and hidden events, plus the pending-change queue
//! - **Optimistic mutations**: apply, persist, then send or queue
//! - **Sync engine**: drains the queue in order when connectivity returns
//! - **Realtime bridge**: merges server-pushed changes into local state
//!
//! # Quick Start
//!
//! ```text
//! let client = Client::open(config, api, true)?;
//! client.hydrate(start, end)?;
//!
//! // Works offline too; queued until the next drain
//! client.mutations().add_pantry_item("Rice", 2).await?;
//!
//! let report = client.engine().drain().await?;
//! ```
//!
//! # Modules
//!
//! - `client`: Wires all components together (main entry point)
//! - `models`: Notes, pantry items, meal ideas and calendar events
//! - `id`: Local and server entity identities
//! - `storage`: SQLite local store and pending-change queue
//! - `api`: Remote API contract and HTTP adapter
//! - `sync`: Queue drain and realtime merge
//! - `mutation`: Optimistic user actions and note edit coalescing
//! - `connectivity`, `status`, `events`, `view`: shared state and notifications
//! - `config`: Application configuration

pub mod api;
pub mod client;
pub mod config;
pub mod connectivity;
pub mod events;
pub mod id;
pub mod models;
pub mod mutation;
pub mod status;
pub mod storage;
pub mod sync;
pub mod view;

#[cfg(test)]
pub(crate) mod testing;

pub use api::{ApiError, ApiRetryClass, HttpApiClient, RemoteApi};
pub use client::{Client, RefreshReport};
pub use config::Config;
pub use connectivity::Connectivity;
pub use events::{EventBus, EventKind, Subscription, SyncEvent};
pub use id::{EntityId, LocalId};
pub use models::{
    CalendarDay, CalendarEvent, Entity, EntityKind, HiddenCalendarEvent, HiddenEventKey, Item,
    MealIdea, Note, PantryItem,
};
pub use mutation::{EditState, MutationError, MutationOutcome, Mutations, NoteEditor};
pub use status::{ConnectionStatus, StatusIndicator};
pub use storage::{LocalStore, StorageError};
pub use sync::{Change, DrainReport, PendingChange, SyncEngine, SyncError};
pub use view::AppState;
