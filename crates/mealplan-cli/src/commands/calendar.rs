//! Calendar command handlers
//!
//! Events are addressed by their position in `calendar show --all`, which
//! lists every event of the day including hidden ones.

use anyhow::{bail, Result};
use chrono::NaiveDate;

use mealplan_core::{CalendarEvent, Client};

use super::note::report;
use crate::output::Output;

/// List a day's events; hidden ones only with `all` (or `show_all_events`)
pub fn show(client: &Client, date: NaiveDate, all: bool, output: &Output) -> Result<()> {
    client.hydrate(date, date)?;
    let state = client.state();

    let events: Vec<(CalendarEvent, bool)> = if all || state.show_all() {
        state
            .all_events(date)
            .into_iter()
            .map(|event| {
                let hidden = state.is_hidden(&event.hidden_key());
                (event, hidden)
            })
            .collect()
    } else {
        state
            .visible_events(date)
            .into_iter()
            .map(|event| (event, false))
            .collect()
    };

    if !output.is_json() && !output.is_quiet() {
        println!("── {} ──", date.format("%a %Y-%m-%d"));
    }
    output.print_events(&events);
    Ok(())
}

fn event_at(client: &Client, date: NaiveDate, index: usize) -> Result<CalendarEvent> {
    client.hydrate(date, date)?;
    let events = client.state().all_events(date);
    match events.get(index) {
        Some(event) => Ok(event.clone()),
        None => bail!(
            "No event {} on {} ({} event(s)). List them with:\n  mealplan calendar show {} --all",
            index,
            date,
            events.len(),
            date
        ),
    }
}

pub async fn hide(client: &Client, date: NaiveDate, index: usize, output: &Output) -> Result<()> {
    let event = event_at(client, date, index)?;
    if client.state().is_hidden(&event.hidden_key()) {
        output.message(&format!("'{}' is already hidden", event.title));
        return Ok(());
    }
    let outcome = client.mutations().hide_event(&event).await?;
    report(output, outcome, &format!("Hid '{}'", event.title));
    Ok(())
}

pub async fn unhide(client: &Client, date: NaiveDate, index: usize, output: &Output) -> Result<()> {
    let event = event_at(client, date, index)?;
    if !client.state().is_hidden(&event.hidden_key()) {
        output.message(&format!("'{}' is not hidden", event.title));
        return Ok(());
    }
    let outcome = client
        .mutations()
        .unhide_event(&event.hidden_key())
        .await?;
    report(output, outcome, &format!("Unhid '{}'", event.title));
    Ok(())
}
