//! Durable local store
//!
//! All access goes through one connection guarded by a mutex, so the store
//! can be shared as `Arc<LocalStore>` between the mutation layer, the sync
//! engine and the realtime bridge. Every call runs in its own transaction;
//! [`LocalStore::write`] groups several operations into one.

use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use tracing::debug;

use crate::config::Config;
use crate::id::{EntityId, LocalId};
use crate::models::{
    timestamp, CalendarDay, CalendarEvent, Entity, EntityKind, HiddenCalendarEvent,
    HiddenEventKey, Item, MealIdea, Note, PantryItem,
};
use crate::storage::error::{StorageError, StorageResult};
use crate::storage::schema::{init_schema, needs_init};
use crate::sync::change::{Change, PendingChange, Subject};

/// Durable keyed tables, the pending-change queue and the temp-id map
pub struct LocalStore {
    conn: Mutex<Connection>,
}

impl LocalStore {
    /// Open or create the database under the configured data directory
    pub fn open(config: &Config) -> StorageResult<Self> {
        Self::open_at(&config.sqlite_path())
    }

    pub fn open_at(path: &Path) -> StorageResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| StorageError::from_io(e, parent.to_path_buf()))?;
        }

        let conn = Connection::open(path)?;
        // Writes must be on disk before a mutation reports success
        let _mode: String = conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
        conn.execute_batch("PRAGMA synchronous = FULL;")?;

        if needs_init(&conn) {
            init_schema(&conn)?;
        }
        debug!(path = %path.display(), "Opened local store");

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run raw SQL against the database (for testing)
    #[cfg(test)]
    pub(crate) fn execute_batch(&self, sql: &str) -> StorageResult<()> {
        self.lock().execute_batch(sql)?;
        Ok(())
    }

    /// Run several operations in one transaction
    ///
    /// Nothing is committed if the closure returns an error.
    pub fn write<T>(&self, f: impl FnOnce(&StoreTx<'_>) -> StorageResult<T>) -> StorageResult<T> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;
        let value = f(&StoreTx { conn: &tx })?;
        tx.commit()?;
        Ok(value)
    }

    fn read<T>(&self, f: impl FnOnce(&StoreTx<'_>) -> StorageResult<T>) -> StorageResult<T> {
        let conn = self.lock();
        f(&StoreTx { conn: &conn })
    }

    // ==================== Notes ====================

    pub fn put_note(&self, note: &Note) -> StorageResult<()> {
        self.write(|tx| tx.put_note(note))
    }

    pub fn get_note(&self, date: NaiveDate) -> StorageResult<Option<Note>> {
        self.read(|tx| tx.get_note(date))
    }

    /// Notes between two inclusive dates, sorted by date
    pub fn notes_between(&self, start: NaiveDate, end: NaiveDate) -> StorageResult<Vec<Note>> {
        self.read(|tx| tx.notes_between(start, end))
    }

    // ==================== Entities ====================

    pub fn put_entity(&self, entity: &Entity) -> StorageResult<()> {
        self.write(|tx| tx.put_entity(entity))
    }

    pub fn get_entity(&self, kind: EntityKind, id: &EntityId) -> StorageResult<Option<Entity>> {
        self.read(|tx| tx.get_entity(kind, id))
    }

    pub fn delete_entity(&self, kind: EntityKind, id: &EntityId) -> StorageResult<bool> {
        self.write(|tx| tx.delete_entity(kind, id))
    }

    pub fn list_entities(&self, kind: EntityKind) -> StorageResult<Vec<Entity>> {
        self.read(|tx| tx.list_entities(kind))
    }

    pub fn list_pantry_items(&self) -> StorageResult<Vec<PantryItem>> {
        Ok(self
            .list_entities(EntityKind::Pantry)?
            .into_iter()
            .filter_map(|entity| match entity {
                Entity::Pantry(item) => Some(item),
                Entity::MealIdea(_) => None,
            })
            .collect())
    }

    pub fn list_meal_ideas(&self) -> StorageResult<Vec<MealIdea>> {
        Ok(self
            .list_entities(EntityKind::MealIdea)?
            .into_iter()
            .filter_map(|entity| match entity {
                Entity::MealIdea(idea) => Some(idea),
                Entity::Pantry(_) => None,
            })
            .collect())
    }

    /// Replace every server-keyed entity of a kind; local entries are kept
    pub fn replace_entities(&self, kind: EntityKind, entities: &[Entity]) -> StorageResult<()> {
        self.write(|tx| tx.replace_entities(kind, entities))
    }

    /// Insert a locally-created entity together with its queued create
    ///
    /// Neither row exists without the other.
    pub fn create_local_entity(&self, entity: &Entity) -> StorageResult<PendingChange> {
        self.write(|tx| {
            tx.put_entity(entity)?;
            tx.enqueue(
                None,
                &Change::Create {
                    kind: entity.kind(),
                    id: entity.id().clone(),
                    payload: entity.payload(),
                },
            )
        })
    }

    /// Record a confirmed create: mapping, re-key of the cached row, dequeue
    ///
    /// `entity` is the server-keyed row to cache in place of the local one,
    /// or `None` when the entity no longer exists locally.
    pub fn complete_create(
        &self,
        change_id: Option<i64>,
        kind: EntityKind,
        local: &LocalId,
        remote: &str,
        entity: Option<&Entity>,
    ) -> StorageResult<()> {
        self.write(|tx| {
            tx.put_temp_mapping(local, remote)?;
            tx.delete_entity(kind, &EntityId::Local(local.clone()))?;
            if let Some(entity) = entity {
                if entity.id().as_remote() != Some(remote) {
                    return Err(StorageError::invalid(
                        entity_table(kind),
                        entity.id().to_string(),
                        format!("expected server id {remote}"),
                    ));
                }
                tx.put_entity(entity)?;
            }
            if let Some(id) = change_id {
                tx.remove_pending(id)?;
            }
            Ok(())
        })
    }

    /// Record a confirmed hide: mapping, re-key of the hidden row, dequeue
    pub fn complete_hide(
        &self,
        change_id: Option<i64>,
        local: &LocalId,
        remote: &str,
        hidden: Option<&HiddenCalendarEvent>,
    ) -> StorageResult<()> {
        self.write(|tx| {
            tx.put_temp_mapping(local, remote)?;
            tx.delete_hidden_event(&EntityId::Local(local.clone()))?;
            if let Some(hidden) = hidden {
                if hidden.id.as_remote() != Some(remote) {
                    return Err(StorageError::invalid(
                        "hidden_calendar_events",
                        hidden.id.to_string(),
                        format!("expected server id {remote}"),
                    ));
                }
                tx.put_hidden_event(hidden)?;
            }
            if let Some(id) = change_id {
                tx.remove_pending(id)?;
            }
            Ok(())
        })
    }

    // ==================== Calendar ====================

    pub fn put_calendar_day(&self, day: &CalendarDay) -> StorageResult<()> {
        self.write(|tx| tx.put_calendar_day(day))
    }

    pub fn get_calendar_day(&self, date: NaiveDate) -> StorageResult<Option<CalendarDay>> {
        self.read(|tx| tx.get_calendar_day(date))
    }

    /// Calendar days between two inclusive dates, sorted by date
    pub fn calendar_days_between(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> StorageResult<Vec<CalendarDay>> {
        self.read(|tx| tx.calendar_days_between(start, end))
    }

    pub fn put_hidden_event(&self, hidden: &HiddenCalendarEvent) -> StorageResult<()> {
        self.write(|tx| tx.put_hidden_event(hidden))
    }

    pub fn get_hidden_event(&self, id: &EntityId) -> StorageResult<Option<HiddenCalendarEvent>> {
        self.read(|tx| tx.get_hidden_event(id))
    }

    pub fn delete_hidden_event(&self, id: &EntityId) -> StorageResult<bool> {
        self.write(|tx| tx.delete_hidden_event(id))
    }

    /// Remove every hidden row matching an event key, whatever its id
    pub fn delete_hidden_by_key(&self, key: &HiddenEventKey) -> StorageResult<usize> {
        self.write(|tx| tx.delete_hidden_by_key(key))
    }

    pub fn find_hidden_event(&self, key: &HiddenEventKey) -> StorageResult<Option<HiddenCalendarEvent>> {
        self.read(|tx| tx.find_hidden_event(key))
    }

    pub fn list_hidden_events(&self) -> StorageResult<Vec<HiddenCalendarEvent>> {
        self.read(|tx| tx.list_hidden_events())
    }

    /// Bulk-replace the server-keyed hidden events; local entries are kept
    pub fn replace_hidden_events(&self, hidden: &[HiddenCalendarEvent]) -> StorageResult<()> {
        self.write(|tx| tx.replace_hidden_events(hidden))
    }

    // ==================== Queue ====================

    /// Append a change to the end of the queue
    pub fn enqueue(&self, date: Option<NaiveDate>, change: &Change) -> StorageResult<PendingChange> {
        self.write(|tx| tx.enqueue(date, change))
    }

    /// The whole queue, oldest first
    pub fn pending_changes(&self) -> StorageResult<Vec<PendingChange>> {
        self.read(|tx| tx.pending_changes())
    }

    pub fn remove_pending(&self, id: i64) -> StorageResult<bool> {
        self.write(|tx| tx.remove_pending(id))
    }

    pub fn pending_count(&self) -> StorageResult<usize> {
        self.read(|tx| tx.pending_count())
    }

    /// Whether any queued change targets the subject
    pub fn has_pending_for(&self, subject: &Subject) -> StorageResult<bool> {
        self.read(|tx| tx.has_pending_after(0, subject))
    }

    /// Whether a change queued after `change_id` targets the subject
    pub fn has_pending_after(&self, change_id: i64, subject: &Subject) -> StorageResult<bool> {
        self.read(|tx| tx.has_pending_after(change_id, subject))
    }

    /// Subjects of every queued change, local ids resolved where possible
    pub fn pending_subjects(&self) -> StorageResult<Vec<Subject>> {
        self.read(|tx| tx.pending_subjects())
    }

    // ==================== Temp ids ====================

    pub fn put_temp_mapping(&self, local: &LocalId, remote: &str) -> StorageResult<()> {
        self.write(|tx| tx.put_temp_mapping(local, remote))
    }

    pub fn resolve_temp_id(&self, local: &LocalId) -> StorageResult<Option<String>> {
        self.read(|tx| tx.resolve_temp_id(local))
    }

    pub fn temp_mapping_count(&self) -> StorageResult<usize> {
        self.read(|tx| tx.count("temp_id_map"))
    }

    /// Clear every table, temp-id mappings included
    pub fn reset(&self) -> StorageResult<()> {
        self.write(|tx| {
            tx.conn.execute_batch(
                r#"
                DELETE FROM notes;
                DELETE FROM pending_changes;
                DELETE FROM pantry_items;
                DELETE FROM meal_ideas;
                DELETE FROM temp_id_map;
                DELETE FROM calendar_days;
                DELETE FROM hidden_calendar_events;
                DELETE FROM sqlite_sequence WHERE name = 'pending_changes';
                "#,
            )?;
            Ok(())
        })
    }
}

/// Store operations bound to one open transaction
pub struct StoreTx<'a> {
    conn: &'a Connection,
}

fn entity_table(kind: EntityKind) -> &'static str {
    match kind {
        EntityKind::Pantry => "pantry_items",
        EntityKind::MealIdea => "meal_ideas",
    }
}

fn parse_id(table: &'static str, raw: &str) -> StorageResult<EntityId> {
    raw.parse()
        .map_err(|e| StorageError::invalid(table, raw, e))
}

fn parse_date(table: &'static str, raw: &str) -> StorageResult<NaiveDate> {
    raw.parse()
        .map_err(|e| StorageError::invalid(table, raw, e))
}

fn parse_time(table: &'static str, key: &str, raw: &str) -> StorageResult<DateTime<Utc>> {
    timestamp::parse(raw)
        .ok_or_else(|| StorageError::invalid(table, key, format!("invalid timestamp {raw:?}")))
}

fn parse_optional_time(
    table: &'static str,
    key: &str,
    raw: Option<String>,
) -> StorageResult<Option<DateTime<Utc>>> {
    raw.map(|raw| parse_time(table, key, &raw)).transpose()
}

impl StoreTx<'_> {
    pub fn put_note(&self, note: &Note) -> StorageResult<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO notes (date, text, items, updated_at) VALUES (?1, ?2, ?3, ?4)",
            params![
                note.date.to_string(),
                note.text,
                serde_json::to_string(&note.items)?,
                note.updated_at.map(|t| t.to_rfc3339()),
            ],
        )?;
        Ok(())
    }

    pub fn get_note(&self, date: NaiveDate) -> StorageResult<Option<Note>> {
        let row = self
            .conn
            .query_row(
                "SELECT date, text, items, updated_at FROM notes WHERE date = ?",
                params![date.to_string()],
                NoteRow::from_row,
            )
            .optional()?;
        row.map(NoteRow::into_note).transpose()
    }

    pub fn notes_between(&self, start: NaiveDate, end: NaiveDate) -> StorageResult<Vec<Note>> {
        let mut stmt = self.conn.prepare(
            "SELECT date, text, items, updated_at FROM notes WHERE date BETWEEN ?1 AND ?2 ORDER BY date",
        )?;
        let rows = stmt.query_map(
            params![start.to_string(), end.to_string()],
            NoteRow::from_row,
        )?;

        let mut notes = Vec::new();
        for row in rows {
            notes.push(row?.into_note()?);
        }
        Ok(notes)
    }

    pub fn put_entity(&self, entity: &Entity) -> StorageResult<()> {
        match entity {
            Entity::Pantry(item) => self.conn.execute(
                "INSERT OR REPLACE INTO pantry_items (id, name, quantity, updated_at) VALUES (?1, ?2, ?3, ?4)",
                params![
                    item.id.storage_key(),
                    item.name,
                    item.quantity,
                    item.updated_at.map(|t| t.to_rfc3339()),
                ],
            )?,
            Entity::MealIdea(idea) => self.conn.execute(
                "INSERT OR REPLACE INTO meal_ideas (id, title, updated_at) VALUES (?1, ?2, ?3)",
                params![
                    idea.id.storage_key(),
                    idea.title,
                    idea.updated_at.map(|t| t.to_rfc3339()),
                ],
            )?,
        };
        Ok(())
    }

    pub fn get_entity(&self, kind: EntityKind, id: &EntityId) -> StorageResult<Option<Entity>> {
        let key = id.storage_key();
        match kind {
            EntityKind::Pantry => {
                let row = self
                    .conn
                    .query_row(
                        "SELECT id, name, quantity, updated_at FROM pantry_items WHERE id = ?",
                        params![key],
                        PantryRow::from_row,
                    )
                    .optional()?;
                row.map(PantryRow::into_entity).transpose()
            }
            EntityKind::MealIdea => {
                let row = self
                    .conn
                    .query_row(
                        "SELECT id, title, updated_at FROM meal_ideas WHERE id = ?",
                        params![key],
                        IdeaRow::from_row,
                    )
                    .optional()?;
                row.map(IdeaRow::into_entity).transpose()
            }
        }
    }

    pub fn delete_entity(&self, kind: EntityKind, id: &EntityId) -> StorageResult<bool> {
        let sql = format!("DELETE FROM {} WHERE id = ?", entity_table(kind));
        let count = self.conn.execute(&sql, params![id.storage_key()])?;
        Ok(count > 0)
    }

    pub fn list_entities(&self, kind: EntityKind) -> StorageResult<Vec<Entity>> {
        let mut entities = Vec::new();
        match kind {
            EntityKind::Pantry => {
                let mut stmt = self.conn.prepare(
                    "SELECT id, name, quantity, updated_at FROM pantry_items ORDER BY name COLLATE NOCASE",
                )?;
                let rows = stmt.query_map([], PantryRow::from_row)?;
                for row in rows {
                    entities.push(row?.into_entity()?);
                }
            }
            EntityKind::MealIdea => {
                let mut stmt = self
                    .conn
                    .prepare("SELECT id, title, updated_at FROM meal_ideas ORDER BY title COLLATE NOCASE")?;
                let rows = stmt.query_map([], IdeaRow::from_row)?;
                for row in rows {
                    entities.push(row?.into_entity()?);
                }
            }
        }
        Ok(entities)
    }

    pub fn replace_entities(&self, kind: EntityKind, entities: &[Entity]) -> StorageResult<()> {
        let sql = format!(
            "DELETE FROM {} WHERE id NOT LIKE 'local:%'",
            entity_table(kind)
        );
        self.conn.execute(&sql, [])?;
        for entity in entities.iter().filter(|e| e.kind() == kind) {
            self.put_entity(entity)?;
        }
        Ok(())
    }

    pub fn put_calendar_day(&self, day: &CalendarDay) -> StorageResult<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO calendar_days (date, events) VALUES (?1, ?2)",
            params![day.date.to_string(), serde_json::to_string(&day.events)?],
        )?;
        Ok(())
    }

    pub fn get_calendar_day(&self, date: NaiveDate) -> StorageResult<Option<CalendarDay>> {
        let row: Option<(String, String)> = self
            .conn
            .query_row(
                "SELECT date, events FROM calendar_days WHERE date = ?",
                params![date.to_string()],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        row.map(|(date, events)| decode_day(&date, &events)).transpose()
    }

    pub fn calendar_days_between(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> StorageResult<Vec<CalendarDay>> {
        let mut stmt = self.conn.prepare(
            "SELECT date, events FROM calendar_days WHERE date BETWEEN ?1 AND ?2 ORDER BY date",
        )?;
        let rows = stmt.query_map(params![start.to_string(), end.to_string()], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;

        let mut days = Vec::new();
        for row in rows {
            let (date, events) = row?;
            days.push(decode_day(&date, &events)?);
        }
        Ok(days)
    }

    pub fn put_hidden_event(&self, hidden: &HiddenCalendarEvent) -> StorageResult<()> {
        self.conn.execute(
            r#"INSERT OR REPLACE INTO hidden_calendar_events
               (id, event_uid, calendar_name, start_time, title) VALUES (?1, ?2, ?3, ?4, ?5)"#,
            params![
                hidden.id.storage_key(),
                hidden.event_uid,
                hidden.calendar_name,
                hidden.start_time.to_rfc3339(),
                hidden.title,
            ],
        )?;
        Ok(())
    }

    pub fn get_hidden_event(&self, id: &EntityId) -> StorageResult<Option<HiddenCalendarEvent>> {
        let row = self
            .conn
            .query_row(
                "SELECT id, event_uid, calendar_name, start_time, title FROM hidden_calendar_events WHERE id = ?",
                params![id.storage_key()],
                HiddenRow::from_row,
            )
            .optional()?;
        row.map(HiddenRow::into_hidden).transpose()
    }

    pub fn delete_hidden_event(&self, id: &EntityId) -> StorageResult<bool> {
        let count = self.conn.execute(
            "DELETE FROM hidden_calendar_events WHERE id = ?",
            params![id.storage_key()],
        )?;
        Ok(count > 0)
    }

    pub fn delete_hidden_by_key(&self, key: &HiddenEventKey) -> StorageResult<usize> {
        let count = self.conn.execute(
            "DELETE FROM hidden_calendar_events WHERE event_uid = ?1 AND calendar_name = ?2 AND start_time = ?3",
            params![key.event_uid, key.calendar_name, key.start_time.to_rfc3339()],
        )?;
        Ok(count)
    }

    pub fn find_hidden_event(&self, key: &HiddenEventKey) -> StorageResult<Option<HiddenCalendarEvent>> {
        let row = self
            .conn
            .query_row(
                r#"SELECT id, event_uid, calendar_name, start_time, title FROM hidden_calendar_events
                   WHERE event_uid = ?1 AND calendar_name = ?2 AND start_time = ?3"#,
                params![key.event_uid, key.calendar_name, key.start_time.to_rfc3339()],
                HiddenRow::from_row,
            )
            .optional()?;
        row.map(HiddenRow::into_hidden).transpose()
    }

    pub fn list_hidden_events(&self) -> StorageResult<Vec<HiddenCalendarEvent>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, event_uid, calendar_name, start_time, title FROM hidden_calendar_events ORDER BY start_time",
        )?;
        let rows = stmt.query_map([], HiddenRow::from_row)?;

        let mut hidden = Vec::new();
        for row in rows {
            hidden.push(row?.into_hidden()?);
        }
        Ok(hidden)
    }

    pub fn replace_hidden_events(&self, hidden: &[HiddenCalendarEvent]) -> StorageResult<()> {
        self.conn.execute(
            "DELETE FROM hidden_calendar_events WHERE id NOT LIKE 'local:%'",
            [],
        )?;
        for event in hidden {
            self.put_hidden_event(event)?;
        }
        Ok(())
    }

    pub fn enqueue(&self, date: Option<NaiveDate>, change: &Change) -> StorageResult<PendingChange> {
        let (change_type, payload) = change.to_columns()?;
        let created_at = Utc::now();
        self.conn.execute(
            "INSERT INTO pending_changes (date, type, payload, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![
                date.map(|d| d.to_string()).unwrap_or_default(),
                change_type,
                payload,
                created_at.to_rfc3339(),
            ],
        )?;
        let id = self.conn.last_insert_rowid();
        debug!(id, change_type = %change.type_tag(), "Queued change");

        Ok(PendingChange {
            id,
            date,
            change: change.clone(),
            created_at,
        })
    }

    pub fn pending_changes(&self) -> StorageResult<Vec<PendingChange>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, date, type, payload, created_at FROM pending_changes ORDER BY id")?;
        let rows = stmt.query_map([], PendingRow::from_row)?;

        let mut changes = Vec::new();
        for row in rows {
            changes.push(row?.into_pending()?);
        }
        Ok(changes)
    }

    pub fn remove_pending(&self, id: i64) -> StorageResult<bool> {
        let count = self
            .conn
            .execute("DELETE FROM pending_changes WHERE id = ?", params![id])?;
        Ok(count > 0)
    }

    pub fn pending_count(&self) -> StorageResult<usize> {
        self.count("pending_changes")
    }

    fn count(&self, table: &str) -> StorageResult<usize> {
        let sql = format!("SELECT COUNT(*) FROM {table}");
        let count: i64 = self.conn.query_row(&sql, [], |row| row.get(0))?;
        Ok(count as usize)
    }

    /// Resolve a local entity subject through the temp-id map
    fn canonical(&self, subject: &Subject) -> StorageResult<Subject> {
        if let Subject::Entity(EntityId::Local(local)) = subject {
            if let Some(remote) = self.resolve_temp_id(local)? {
                return Ok(Subject::Entity(EntityId::Remote(remote)));
            }
        }
        Ok(subject.clone())
    }

    pub fn has_pending_after(&self, change_id: i64, subject: &Subject) -> StorageResult<bool> {
        let target = self.canonical(subject)?;
        for pending in self.pending_changes()? {
            if pending.id <= change_id {
                continue;
            }
            if let Some(other) = pending.subject() {
                if self.canonical(&other)? == target {
                    return Ok(true);
                }
            }
        }
        Ok(false)
    }

    pub fn pending_subjects(&self) -> StorageResult<Vec<Subject>> {
        let mut subjects = Vec::new();
        for pending in self.pending_changes()? {
            if let Some(subject) = pending.subject() {
                let subject = self.canonical(&subject)?;
                if !subjects.contains(&subject) {
                    subjects.push(subject);
                }
            }
        }
        Ok(subjects)
    }

    pub fn put_temp_mapping(&self, local: &LocalId, remote: &str) -> StorageResult<()> {
        // A mapping is written once and never changed
        self.conn.execute(
            "INSERT OR IGNORE INTO temp_id_map (temp_id, real_id) VALUES (?1, ?2)",
            params![local.as_str(), remote],
        )?;
        Ok(())
    }

    pub fn resolve_temp_id(&self, local: &LocalId) -> StorageResult<Option<String>> {
        Ok(self
            .conn
            .query_row(
                "SELECT real_id FROM temp_id_map WHERE temp_id = ?",
                params![local.as_str()],
                |row| row.get(0),
            )
            .optional()?)
    }
}

fn decode_day(date: &str, events: &str) -> StorageResult<CalendarDay> {
    let events: Vec<CalendarEvent> = serde_json::from_str(events)?;
    Ok(CalendarDay {
        date: parse_date("calendar_days", date)?,
        events,
    })
}

struct NoteRow {
    date: String,
    text: String,
    items: String,
    updated_at: Option<String>,
}

impl NoteRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            date: row.get(0)?,
            text: row.get(1)?,
            items: row.get(2)?,
            updated_at: row.get(3)?,
        })
    }

    fn into_note(self) -> StorageResult<Note> {
        let items: Vec<Item> = serde_json::from_str(&self.items)?;
        Ok(Note {
            date: parse_date("notes", &self.date)?,
            updated_at: parse_optional_time("notes", &self.date, self.updated_at)?,
            text: self.text,
            items,
        })
    }
}

struct PantryRow {
    id: String,
    name: String,
    quantity: i64,
    updated_at: Option<String>,
}

impl PantryRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            name: row.get(1)?,
            quantity: row.get(2)?,
            updated_at: row.get(3)?,
        })
    }

    fn into_entity(self) -> StorageResult<Entity> {
        Ok(Entity::Pantry(PantryItem {
            id: parse_id("pantry_items", &self.id)?,
            updated_at: parse_optional_time("pantry_items", &self.id, self.updated_at)?,
            name: self.name,
            quantity: self.quantity,
        }))
    }
}

struct IdeaRow {
    id: String,
    title: String,
    updated_at: Option<String>,
}

impl IdeaRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            title: row.get(1)?,
            updated_at: row.get(2)?,
        })
    }

    fn into_entity(self) -> StorageResult<Entity> {
        Ok(Entity::MealIdea(MealIdea {
            id: parse_id("meal_ideas", &self.id)?,
            updated_at: parse_optional_time("meal_ideas", &self.id, self.updated_at)?,
            title: self.title,
        }))
    }
}

struct HiddenRow {
    id: String,
    event_uid: String,
    calendar_name: String,
    start_time: String,
    title: String,
}

impl HiddenRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            event_uid: row.get(1)?,
            calendar_name: row.get(2)?,
            start_time: row.get(3)?,
            title: row.get(4)?,
        })
    }

    fn into_hidden(self) -> StorageResult<HiddenCalendarEvent> {
        const TABLE: &str = "hidden_calendar_events";
        Ok(HiddenCalendarEvent {
            id: parse_id(TABLE, &self.id)?,
            start_time: parse_time(TABLE, &self.id, &self.start_time)?,
            event_uid: self.event_uid,
            calendar_name: self.calendar_name,
            title: self.title,
        })
    }
}

struct PendingRow {
    id: i64,
    date: String,
    change_type: String,
    payload: String,
    created_at: String,
}

impl PendingRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            date: row.get(1)?,
            change_type: row.get(2)?,
            payload: row.get(3)?,
            created_at: row.get(4)?,
        })
    }

    fn into_pending(self) -> StorageResult<PendingChange> {
        const TABLE: &str = "pending_changes";
        let key = self.id.to_string();
        let date = if self.date.is_empty() {
            None
        } else {
            Some(parse_date(TABLE, &self.date)?)
        };
        let change = Change::from_columns(&self.change_type, &self.payload)
            .map_err(|e| StorageError::invalid(TABLE, key.clone(), e))?;

        Ok(PendingChange {
            id: self.id,
            date,
            change,
            created_at: parse_time(TABLE, &key, &self.created_at)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn date(s: &str) -> NaiveDate {
        s.parse().unwrap()
    }

    fn event(uid: &str, start: &str) -> CalendarEvent {
        serde_json::from_value(json!({
            "uid": uid,
            "calendar_name": "Family",
            "title": format!("Event {uid}"),
            "start_time": start,
        }))
        .unwrap()
    }

    #[test]
    fn test_note_roundtrip_and_range() {
        let store = LocalStore::open_in_memory().unwrap();
        for (d, text) in [("2024-03-03", "c"), ("2024-03-01", "a"), ("2024-03-05", "e")] {
            let mut note = Note::with_text(date(d), text);
            note.set_item(Item {
                line_index: 0,
                itemized: true,
            });
            store.put_note(&note).unwrap();
        }

        let note = store.get_note(date("2024-03-01")).unwrap().unwrap();
        assert_eq!(note.text, "a");
        assert!(note.is_itemized(0));
        assert!(store.get_note(date("2024-03-02")).unwrap().is_none());

        let range = store
            .notes_between(date("2024-03-01"), date("2024-03-03"))
            .unwrap();
        let texts: Vec<_> = range.iter().map(|n| n.text.as_str()).collect();
        assert_eq!(texts, vec!["a", "c"]);
    }

    #[test]
    fn test_queue_is_fifo() {
        let store = LocalStore::open_in_memory().unwrap();
        let d = date("2024-03-01");
        let first = store
            .enqueue(Some(d), &Change::NoteUpdate { text: "a".into() })
            .unwrap();
        let second = store
            .enqueue(
                Some(d),
                &Change::ItemToggle {
                    line_index: 0,
                    itemized: true,
                },
            )
            .unwrap();
        let third = store
            .enqueue(
                None,
                &Change::Delete {
                    kind: EntityKind::Pantry,
                    id: EntityId::remote("srv-9"),
                },
            )
            .unwrap();

        let queue = store.pending_changes().unwrap();
        let ids: Vec<_> = queue.iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![first.id, second.id, third.id]);
        assert_eq!(queue[0].date, Some(d));
        assert_eq!(queue[2].date, None);
        assert_eq!(queue[1].change, second.change);

        assert!(store.remove_pending(second.id).unwrap());
        assert!(!store.remove_pending(second.id).unwrap());
        assert_eq!(store.pending_count().unwrap(), 2);
    }

    #[test]
    fn test_create_local_entity_writes_entity_and_queue_together() {
        let store = LocalStore::open_in_memory().unwrap();
        let entity = Entity::from(PantryItem::new("Rice", 2));

        let pending = store.create_local_entity(&entity).unwrap();
        assert!(pending.change.is_add());
        assert_eq!(store.pending_count().unwrap(), 1);
        assert_eq!(
            store.get_entity(EntityKind::Pantry, entity.id()).unwrap(),
            Some(entity)
        );
    }

    #[test]
    fn test_failed_write_commits_nothing() {
        let store = LocalStore::open_in_memory().unwrap();
        let entity = Entity::from(MealIdea::new("Tacos"));

        let result: StorageResult<()> = store.write(|tx| {
            tx.put_entity(&entity)?;
            Err(StorageError::invalid("meal_ideas", "x", "forced"))
        });
        assert!(result.is_err());
        assert!(store.list_meal_ideas().unwrap().is_empty());
    }

    #[test]
    fn test_complete_create_rekeys() {
        let store = LocalStore::open_in_memory().unwrap();
        let item = PantryItem::new("Rice", 2);
        let local = item.id.as_local().unwrap().clone();
        let pending = store.create_local_entity(&item.clone().into()).unwrap();

        let confirmed = Entity::from(PantryItem {
            id: EntityId::remote("srv-1"),
            ..item
        });
        store
            .complete_create(
                Some(pending.id),
                EntityKind::Pantry,
                &local,
                "srv-1",
                Some(&confirmed),
            )
            .unwrap();

        assert_eq!(store.resolve_temp_id(&local).unwrap().as_deref(), Some("srv-1"));
        assert_eq!(store.temp_mapping_count().unwrap(), 1);
        assert_eq!(store.pending_count().unwrap(), 0);
        let items = store.list_pantry_items().unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].id, EntityId::remote("srv-1"));
    }

    #[test]
    fn test_complete_create_requires_matching_server_id() {
        let store = LocalStore::open_in_memory().unwrap();
        let entity = Entity::from(MealIdea::new("Soup"));
        let local = entity.id().as_local().unwrap().clone();
        let result = store.complete_create(None, EntityKind::MealIdea, &local, "srv-1", Some(&entity));
        assert!(result.is_err());
        assert_eq!(store.temp_mapping_count().unwrap(), 0);
    }

    #[test]
    fn test_complete_create_without_row() {
        let store = LocalStore::open_in_memory().unwrap();
        let entity = Entity::from(MealIdea::new("Soup"));
        let local = entity.id().as_local().unwrap().clone();
        let pending = store.create_local_entity(&entity).unwrap();
        store.delete_entity(EntityKind::MealIdea, entity.id()).unwrap();

        store
            .complete_create(Some(pending.id), EntityKind::MealIdea, &local, "srv-4", None)
            .unwrap();

        assert_eq!(store.resolve_temp_id(&local).unwrap().as_deref(), Some("srv-4"));
        assert!(store.list_meal_ideas().unwrap().is_empty());
        assert_eq!(store.pending_count().unwrap(), 0);
    }

    #[test]
    fn test_mapping_written_once() {
        let store = LocalStore::open_in_memory().unwrap();
        let local = LocalId::generate();
        store.put_temp_mapping(&local, "srv-1").unwrap();
        store.put_temp_mapping(&local, "srv-2").unwrap();
        assert_eq!(store.resolve_temp_id(&local).unwrap().as_deref(), Some("srv-1"));
    }

    #[test]
    fn test_calendar_days_and_hidden_events() {
        let store = LocalStore::open_in_memory().unwrap();
        let day = CalendarDay {
            date: date("2024-03-01"),
            events: vec![event("e1", "2024-03-01T18:00:00Z")],
        };
        store.put_calendar_day(&day).unwrap();
        assert_eq!(store.get_calendar_day(day.date).unwrap(), Some(day.clone()));

        let hidden = HiddenCalendarEvent::from_request(
            EntityId::new_local(),
            &(&day.events[0]).into(),
        );
        store.put_hidden_event(&hidden).unwrap();
        let key = day.events[0].hidden_key();
        assert_eq!(store.find_hidden_event(&key).unwrap(), Some(hidden.clone()));

        // A bulk replace keeps the local row
        let server = HiddenCalendarEvent {
            id: EntityId::remote("h-1"),
            ..HiddenCalendarEvent::from_request(
                EntityId::new_local(),
                &(&event("e2", "2024-03-02T12:00:00Z")).into(),
            )
        };
        store.replace_hidden_events(&[server]).unwrap();
        assert_eq!(store.list_hidden_events().unwrap().len(), 2);

        assert_eq!(store.delete_hidden_by_key(&key).unwrap(), 1);
        assert!(store.find_hidden_event(&key).unwrap().is_none());
    }

    #[test]
    fn test_replace_entities_keeps_local_rows() {
        let store = LocalStore::open_in_memory().unwrap();
        let local = Entity::from(MealIdea::new("Local idea"));
        store.put_entity(&local).unwrap();
        store
            .put_entity(&Entity::from(MealIdea {
                id: EntityId::remote("old"),
                title: "Old".into(),
                updated_at: None,
            }))
            .unwrap();

        let fresh = Entity::from(MealIdea {
            id: EntityId::remote("new"),
            title: "New".into(),
            updated_at: None,
        });
        store
            .replace_entities(EntityKind::MealIdea, &[fresh.clone()])
            .unwrap();

        let ideas = store.list_entities(EntityKind::MealIdea).unwrap();
        assert_eq!(ideas.len(), 2);
        assert!(ideas.contains(&local));
        assert!(ideas.contains(&fresh));
    }

    #[test]
    fn test_pending_subject_resolves_mapping() {
        let store = LocalStore::open_in_memory().unwrap();
        let local = LocalId::generate();
        let queued = store
            .enqueue(
                None,
                &Change::Update {
                    kind: EntityKind::Pantry,
                    id: EntityId::Local(local.clone()),
                    payload: json!({"name": "Rice", "quantity": 3}),
                },
            )
            .unwrap();
        store.put_temp_mapping(&local, "srv-1").unwrap();

        let subject = Subject::Entity(EntityId::remote("srv-1"));
        assert!(store.has_pending_for(&subject).unwrap());
        assert!(!store.has_pending_after(queued.id, &subject).unwrap());
        assert!(!store
            .has_pending_for(&Subject::Note(date("2024-03-01")))
            .unwrap());
    }

    #[test]
    fn test_reset_clears_everything() {
        let store = LocalStore::open_in_memory().unwrap();
        store.put_note(&Note::with_text(date("2024-03-01"), "a")).unwrap();
        store
            .create_local_entity(&Entity::from(PantryItem::new("Rice", 1)))
            .unwrap();
        store.put_temp_mapping(&LocalId::generate(), "srv-1").unwrap();

        store.reset().unwrap();

        assert!(store.get_note(date("2024-03-01")).unwrap().is_none());
        assert_eq!(store.pending_count().unwrap(), 0);
        assert_eq!(store.temp_mapping_count().unwrap(), 0);
        assert!(store.list_pantry_items().unwrap().is_empty());
    }

    #[test]
    fn test_store_survives_reopen() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("data").join("mealplan.db");

        {
            let store = LocalStore::open_at(&path).unwrap();
            store
                .enqueue(
                    Some(date("2024-03-01")),
                    &Change::NoteUpdate {
                        text: "Soup".into(),
                    },
                )
                .unwrap();
        }

        let store = LocalStore::open_at(&path).unwrap();
        let queue = store.pending_changes().unwrap();
        assert_eq!(queue.len(), 1);
        assert_eq!(
            queue[0].change,
            Change::NoteUpdate {
                text: "Soup".into()
            }
        );
    }
}
