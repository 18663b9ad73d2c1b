//! Note, item and move command handlers
//!
//! A day's note is its list of meals, one per line. Items track whether a
//! meal's ingredients have been added to the shopping list.

use anyhow::{bail, Result};
use chrono::NaiveDate;

use mealplan_core::{Client, MutationOutcome};

use crate::editor::edit_note;
use crate::output::Output;

/// Show the note for one or more consecutive days
pub fn show(client: &Client, date: NaiveDate, days: u32, output: &Output) -> Result<()> {
    let end = date + chrono::Duration::days(i64::from(days.max(1)) - 1);
    client.hydrate(date, end)?;

    let notes: Vec<_> = date
        .iter_days()
        .take_while(|d| *d <= end)
        .map(|d| client.state().note(d))
        .collect();

    if output.is_json() {
        output.json(&notes);
        return Ok(());
    }
    for (i, note) in notes.iter().enumerate() {
        if i > 0 {
            println!();
        }
        output.print_note(note);
    }
    Ok(())
}

/// Replace a note's text, opening $EDITOR when no text is given
pub async fn set(client: &Client, date: NaiveDate, text: Option<String>, output: &Output) -> Result<()> {
    client.hydrate(date, date)?;
    let current = client.state().note(date);

    let text = match text {
        Some(text) => text.replace("\\n", "\n"),
        None => edit_note(date, &current.text)?,
    };
    if text.trim() == current.text.trim() {
        output.message("No changes.");
        return Ok(());
    }

    let editor = client.editor();
    editor.edit(date, &text)?;
    let outcome = editor.flush(date).await?;
    report(output, outcome.unwrap_or(MutationOutcome::Queued), &format!("Updated {}", date));
    Ok(())
}

/// Flip a meal line's itemized flag
pub async fn toggle_item(client: &Client, date: NaiveDate, line: usize, output: &Output) -> Result<()> {
    client.hydrate(date, date)?;
    let note = client.state().note(date);
    let lines = note.meal_lines();
    let Some(meal) = lines.get(line) else {
        bail!(
            "No meal line {} on {} ({} line(s))",
            line,
            date,
            lines.len()
        );
    };

    let itemized = !note.is_itemized(line);
    let message = format!(
        "{} '{}'",
        if itemized { "Itemized" } else { "Un-itemized" },
        meal
    );
    let outcome = client.mutations().set_itemized(date, line, itemized).await?;
    report(output, outcome, &message);
    Ok(())
}

/// Move one meal line to the end of another day
pub async fn move_line(
    client: &Client,
    from: NaiveDate,
    line: usize,
    to: NaiveDate,
    output: &Output,
) -> Result<()> {
    client.hydrate(from, from)?;
    client.hydrate(to, to)?;
    let (first, second) = client.mutations().move_meal_line(from, line, to).await?;

    let outcome = if first == MutationOutcome::Synced && second == MutationOutcome::Synced {
        MutationOutcome::Synced
    } else {
        MutationOutcome::Queued
    };
    report(output, outcome, &format!("Moved line {} from {} to {}", line, from, to));
    Ok(())
}

/// Report a mutation, noting when it is waiting to sync
pub fn report(output: &Output, outcome: MutationOutcome, message: &str) {
    match outcome {
        MutationOutcome::Synced => output.success(message),
        MutationOutcome::Queued => output.success(&format!("{} (queued for sync)", message)),
    }
}
