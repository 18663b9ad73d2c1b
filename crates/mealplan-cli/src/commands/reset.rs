//! Reset command handler

use anyhow::{Context, Result};

use mealplan_core::{Config, LocalStore};

use crate::editor::confirm;
use crate::output::Output;

/// Wipe every locally cached table, including queued changes
pub fn reset(config: &Config, yes: bool, output: &Output) -> Result<()> {
    let store = LocalStore::open(config).context("Failed to open local store")?;
    let pending = store.pending_count()?;

    if !yes {
        if !output.should_prompt() {
            anyhow::bail!("Refusing to reset without --yes in non-interactive mode");
        }
        let prompt = if pending > 0 {
            format!(
                "Delete all local data, including {} change(s) not yet synced?",
                pending
            )
        } else {
            "Delete all local data?".to_string()
        };
        if !confirm(&prompt)? {
            output.message("Cancelled.");
            return Ok(());
        }
    }

    store.reset().context("Failed to reset local store")?;
    output.success(&format!(
        "Local data cleared ({} unsynced change(s) discarded)",
        pending
    ));
    Ok(())
}

