//! Sync, pending, refresh and listen command handlers

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;

use mealplan_core::{Client, ConnectionStatus};

use crate::output::Output;

/// Drain the pending-change queue once
pub async fn sync(client: &Client, output: &Output) -> Result<()> {
    if !client.connectivity().is_online() {
        bail!(
            "Server not reachable; {} change(s) stay queued.\n\
             Check the server address with:\n  mealplan config show",
            client.store().pending_count()?
        );
    }

    let report = client.engine().drain().await.context("Sync failed")?;

    if output.is_json() {
        println!(
            "{}",
            serde_json::json!({
                "applied": report.applied,
                "discarded": report.discarded,
                "remaining": report.remaining,
                "halted": report.halted,
                "status": client.status().current(),
            })
        );
        return Ok(());
    }

    if client.status().current() == ConnectionStatus::AuthRequired {
        bail!(
            "The server rejected the access token; {} change(s) stay queued.\n\
             Set a new one with:\n  mealplan config set auth_token <token>",
            report.remaining
        );
    }

    if report.applied == 0 && report.discarded == 0 && report.remaining == 0 {
        output.success("Already up to date");
    } else if report.halted {
        output.message(&format!(
            "Sync stopped after {} change(s); {} still queued (will retry)",
            report.applied, report.remaining
        ));
    } else {
        output.success(&format!("Synced {} change(s)", report.applied));
    }
    if report.discarded > 0 {
        output.message(&format!(
            "  Dropped {} change(s) for items that never reached the server",
            report.discarded
        ));
    }
    Ok(())
}

/// List queued changes
pub fn pending(client: &Client, output: &Output) -> Result<()> {
    let changes = client.store().pending_changes()?;
    output.print_pending(&changes);
    Ok(())
}

/// Pull a date range from the server into the local cache
pub async fn refresh(client: &Client, start: NaiveDate, end: NaiveDate, output: &Output) -> Result<()> {
    if end < start {
        bail!("End date {} is before start date {}", end, start);
    }
    if !client.connectivity().is_online() {
        bail!("Server not reachable; showing cached data only");
    }

    let report = client
        .refresh(start, end)
        .await
        .context("Refresh failed")?;

    if output.is_json() {
        println!(
            "{}",
            serde_json::json!({
                "days": report.days,
                "notes": report.notes,
                "notes_skipped": report.notes_skipped,
                "hidden_refreshed": report.hidden_refreshed,
            })
        );
    } else {
        output.success(&format!(
            "Refreshed {} day(s) from {} to {}",
            report.days, start, end
        ));
        if report.notes_skipped > 0 {
            output.message(&format!(
                "  Kept {} note(s) with unsynced local edits",
                report.notes_skipped
            ));
        }
    }
    Ok(())
}

/// Stay connected, draining the queue and printing pushed changes
pub async fn listen(client: &Client, duration: Option<u64>, output: &Output) -> Result<()> {
    if client.config().realtime_url.is_none() && client.config().api_url.is_none() {
        bail!(
            "Server not configured. Set it with:\n  \
             mealplan config set api_url http://your-server:8000"
        );
    }

    let printer = Arc::new(Output::new(output.format));
    let subscription = client
        .bus()
        .subscribe_all(move |event| printer.print_sync_event(event));

    let sync = client.spawn_sync();
    let realtime = client.spawn_realtime();

    output.message("Listening for changes (Ctrl+C to stop)...");
    match duration {
        Some(secs) => tokio::time::sleep(Duration::from_secs(secs)).await,
        None => tokio::signal::ctrl_c()
            .await
            .context("Failed to wait for Ctrl+C")?,
    }

    if let Some(realtime) = realtime {
        realtime.shutdown().await;
    }
    sync.shutdown().await;
    client.bus().unsubscribe(subscription);
    Ok(())
}
