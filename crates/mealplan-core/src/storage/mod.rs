//! Storage layer
//!
//! A single SQLite database holds the cached entities, the pending-change
//! queue and the temp-id map.
//!
//! ## Tables
//!
//! - `notes` - one note per date (items as JSON)
//! - `pantry_items` / `meal_ideas` - id-keyed entities, local ids included
//! - `calendar_days` - unfiltered events per date
//! - `hidden_calendar_events` - events the user chose to hide
//! - `pending_changes` - unsent mutations in application order
//! - `temp_id_map` - local id to server id, written once per confirmed add

pub mod error;
mod local_store;
pub mod schema;

pub use error::{StorageError, StorageResult};
pub use local_store::{LocalStore, StoreTx};
pub use schema::{init_schema, needs_init, SCHEMA_VERSION};
