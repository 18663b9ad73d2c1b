//! Output formatting for CLI
//!
//! Provides consistent output formatting across all commands:
//! - Human-readable default output
//! - JSON output (--json flag)
//! - Quiet mode for scripting (--quiet flag)

use serde::Serialize;

use mealplan_core::{
    CalendarEvent, ConnectionStatus, MealIdea, Note, PantryItem, PendingChange, SyncEvent,
};

/// Output format options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human-readable output (default)
    Human,
    /// JSON output
    Json,
    /// Quiet mode - minimal output
    Quiet,
}

impl OutputFormat {
    /// Create format from CLI flags
    pub fn from_flags(json: bool, quiet: bool) -> Self {
        if quiet {
            OutputFormat::Quiet
        } else if json {
            OutputFormat::Json
        } else {
            OutputFormat::Human
        }
    }
}

/// Output helper for consistent formatting
pub struct Output {
    /// The output format
    pub format: OutputFormat,
}

impl Output {
    pub fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    /// Check if output is in quiet mode
    pub fn is_quiet(&self) -> bool {
        matches!(self.format, OutputFormat::Quiet)
    }

    pub fn is_json(&self) -> bool {
        matches!(self.format, OutputFormat::Json)
    }

    /// Print any serializable value as pretty JSON
    pub fn json<T: Serialize + ?Sized>(&self, value: &T) {
        match serde_json::to_string_pretty(value) {
            Ok(text) => println!("{}", text),
            Err(e) => eprintln!("Failed to encode output: {}", e),
        }
    }

    /// Print one day's note with its meal lines numbered
    pub fn print_note(&self, note: &Note) {
        match self.format {
            OutputFormat::Human => {
                println!("── {} ──", note.date.format("%a %Y-%m-%d"));
                let lines = note.meal_lines();
                if lines.is_empty() {
                    println!("(no meals planned)");
                    return;
                }
                for (index, line) in lines.iter().enumerate() {
                    let mark = if note.is_itemized(index) { "x" } else { " " };
                    println!("{:>2} [{}] {}", index, mark, line);
                }
            }
            OutputFormat::Json => self.json(note),
            OutputFormat::Quiet => {
                for line in note.meal_lines() {
                    println!("{}", line);
                }
            }
        }
    }

    /// Print pantry items
    pub fn print_pantry_items(&self, items: &[PantryItem]) {
        match self.format {
            OutputFormat::Human => {
                if items.is_empty() {
                    println!("Pantry is empty.");
                    return;
                }
                for item in items {
                    println!(
                        "{} | {} x{}{}",
                        truncate(&item.id.to_string(), 24),
                        truncate(&item.name, 40),
                        item.quantity,
                        pending_marker(item.id.is_local())
                    );
                }
                println!("\n{} item(s)", items.len());
            }
            OutputFormat::Json => self.json(items),
            OutputFormat::Quiet => {
                for item in items {
                    println!("{}", item.id);
                }
            }
        }
    }

    /// Print meal ideas
    pub fn print_meal_ideas(&self, ideas: &[MealIdea]) {
        match self.format {
            OutputFormat::Human => {
                if ideas.is_empty() {
                    println!("No meal ideas.");
                    return;
                }
                for idea in ideas {
                    println!(
                        "{} | {}{}",
                        truncate(&idea.id.to_string(), 24),
                        truncate(&idea.title, 50),
                        pending_marker(idea.id.is_local())
                    );
                }
                println!("\n{} idea(s)", ideas.len());
            }
            OutputFormat::Json => self.json(ideas),
            OutputFormat::Quiet => {
                for idea in ideas {
                    println!("{}", idea.id);
                }
            }
        }
    }

    /// Print calendar events for a day; `hidden` flags events the user hid
    pub fn print_events(&self, events: &[(CalendarEvent, bool)]) {
        match self.format {
            OutputFormat::Human => {
                if events.is_empty() {
                    println!("No events.");
                    return;
                }
                for (index, (event, hidden)) in events.iter().enumerate() {
                    let when = if event.all_day {
                        "all day".to_string()
                    } else {
                        event.start_time.format("%H:%M").to_string()
                    };
                    println!(
                        "{:>2} {:>7}  {}{}{}",
                        index,
                        when,
                        truncate(&event.title, 50),
                        event
                            .calendar_name
                            .as_deref()
                            .map(|c| format!(" ({})", c))
                            .unwrap_or_default(),
                        if *hidden { " [hidden]" } else { "" }
                    );
                }
            }
            OutputFormat::Json => {
                let json: Vec<_> = events
                    .iter()
                    .map(|(event, hidden)| serde_json::json!({"event": event, "hidden": hidden}))
                    .collect();
                self.json(&json);
            }
            OutputFormat::Quiet => {
                for (event, _) in events {
                    println!("{}", event.title);
                }
            }
        }
    }

    /// Print the pending-change queue, oldest first
    pub fn print_pending(&self, changes: &[PendingChange]) {
        match self.format {
            OutputFormat::Human => {
                if changes.is_empty() {
                    println!("Nothing waiting to sync.");
                    return;
                }
                for pending in changes {
                    let subject = match (&pending.date, pending.change.entity_id()) {
                        (Some(date), _) => date.to_string(),
                        (None, Some(id)) => id.to_string(),
                        (None, None) => String::new(),
                    };
                    println!(
                        "#{:<4} {} {:<13} {}",
                        pending.id,
                        pending.created_at.format("%Y-%m-%d %H:%M"),
                        pending.change.type_tag(),
                        subject
                    );
                }
                println!("\n{} pending change(s)", changes.len());
            }
            OutputFormat::Json => {
                let json: Vec<_> = changes
                    .iter()
                    .map(|p| {
                        serde_json::json!({
                            "id": p.id,
                            "date": p.date,
                            "change": p.change,
                            "created_at": p.created_at,
                        })
                    })
                    .collect();
                self.json(&json);
            }
            OutputFormat::Quiet => println!("{}", changes.len()),
        }
    }

    /// Print one event received while listening
    pub fn print_sync_event(&self, event: &SyncEvent) {
        match self.format {
            OutputFormat::Human => println!("{}", describe_event(event)),
            OutputFormat::Json => println!(
                "{}",
                serde_json::json!({
                    "kind": format!("{:?}", event.kind()),
                    "detail": describe_event(event),
                })
            ),
            OutputFormat::Quiet => {}
        }
    }

    pub fn print_status(&self, status: ConnectionStatus) {
        match self.format {
            OutputFormat::Json => self.json(&status),
            _ => println!("{}", status),
        }
    }

    /// Print a success message
    pub fn success(&self, message: &str) {
        match self.format {
            OutputFormat::Human => println!("✓ {}", message),
            OutputFormat::Json => {
                println!(
                    "{}",
                    serde_json::json!({"status": "success", "message": message})
                );
            }
            OutputFormat::Quiet => {}
        }
    }

    /// Check if we should prompt for confirmation
    pub fn should_prompt(&self) -> bool {
        self.format == OutputFormat::Human
    }

    /// Print an informational message
    pub fn message(&self, msg: &str) {
        match self.format {
            OutputFormat::Human => println!("{}", msg),
            OutputFormat::Json => {
                println!("{}", serde_json::json!({"message": msg}));
            }
            OutputFormat::Quiet => {}
        }
    }
}

fn pending_marker(is_local: bool) -> &'static str {
    if is_local {
        " (not synced)"
    } else {
        ""
    }
}

/// One-line description of a sync event
pub fn describe_event(event: &SyncEvent) -> String {
    match event {
        SyncEvent::NoteUpdated(note) => {
            format!("note {} updated: {} meal(s)", note.date, note.meal_lines().len())
        }
        SyncEvent::ItemUpdated { date, item } => format!(
            "note {} line {} {}",
            date,
            item.line_index,
            if item.itemized { "itemized" } else { "not itemized" }
        ),
        SyncEvent::CalendarRefreshed { dates } => {
            format!("calendar refreshed for {} day(s)", dates.len())
        }
        SyncEvent::EventHidden(hidden) => format!("event hidden: {}", hidden.title),
        SyncEvent::EventUnhidden(key) => format!("event unhidden: {}", key.event_uid),
        SyncEvent::PantryUpdated { id, deleted: true } => format!("pantry item {} deleted", id),
        SyncEvent::PantryUpdated { id, .. } => format!("pantry item {} updated", id),
        SyncEvent::MealIdeasUpdated { id, deleted: true } => format!("meal idea {} deleted", id),
        SyncEvent::MealIdeasUpdated { id, .. } => format!("meal idea {} updated", id),
        SyncEvent::IdResolved { local, remote } => format!("local:{} is now {}", local, remote),
        SyncEvent::StatusChanged(status) => format!("status: {}", status),
    }
}

/// Truncate a string to max characters, adding "..." if truncated
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use mealplan_core::{EntityId, Item};

    #[test]
    fn test_format_from_flags() {
        assert_eq!(OutputFormat::from_flags(false, false), OutputFormat::Human);
        assert_eq!(OutputFormat::from_flags(true, false), OutputFormat::Json);
        assert_eq!(OutputFormat::from_flags(false, true), OutputFormat::Quiet);
        // Quiet takes precedence
        assert_eq!(OutputFormat::from_flags(true, true), OutputFormat::Quiet);
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("this is a long string", 10), "this is...");
        assert_eq!(truncate("crème brûlée tart", 8), "crème...");
    }

    #[test]
    fn test_describe_event() {
        let date = NaiveDate::from_ymd_opt(2024, 1, 2).unwrap();
        assert_eq!(
            describe_event(&SyncEvent::ItemUpdated {
                date,
                item: Item {
                    line_index: 1,
                    itemized: true
                }
            }),
            "note 2024-01-02 line 1 itemized"
        );
        assert_eq!(
            describe_event(&SyncEvent::PantryUpdated {
                id: EntityId::remote("p1"),
                deleted: true
            }),
            "pantry item p1 deleted"
        );
        assert_eq!(
            describe_event(&SyncEvent::StatusChanged(ConnectionStatus::Syncing { pending: 2 })),
            "status: syncing (2 pending)"
        );
    }
}
