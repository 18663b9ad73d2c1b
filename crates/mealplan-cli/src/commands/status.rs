//! Status command handler

use anyhow::Result;

use mealplan_core::Client;

use crate::output::{Output, OutputFormat};

/// Show connection status, queue depth and where data lives
pub fn show(client: &Client, output: &Output) -> Result<()> {
    let config = client.config();
    let store = client.store();
    let status = client.status().current();
    let pending = store.pending_count()?;
    let resolved = store.temp_mapping_count()?;
    let pantry = client.state().pantry_items().len();
    let ideas = client.state().meal_ideas().len();
    let hidden = client.state().hidden_events().len();

    match output.format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::json!({
                    "status": status,
                    "online": client.connectivity().is_online(),
                    "pending": pending,
                    "resolved_ids": resolved,
                    "api_url": config.api_url,
                    "realtime_url": config.realtime_url,
                    "database": config.sqlite_path(),
                    "counts": {
                        "pantry_items": pantry,
                        "meal_ideas": ideas,
                        "hidden_events": hidden
                    }
                })
            );
        }
        OutputFormat::Quiet => {
            println!("{}", status);
        }
        OutputFormat::Human => {
            println!("Meal Planner Status");
            println!("===================");
            println!();
            println!("Sync:");
            println!("  Status:  {}", status);
            println!("  Pending: {}", pending);
            println!(
                "  Server:  {}",
                config.api_url.as_deref().unwrap_or("(not set)")
            );
            println!(
                "  Push:    {}",
                config.realtime_url.as_deref().unwrap_or("(not set)")
            );
            println!();
            println!("Storage:");
            println!("  Database: {}", config.sqlite_path().display());
            println!("  Resolved local ids: {}", resolved);
            println!();
            println!("Contents:");
            println!("  Pantry items:  {}", pantry);
            println!("  Meal ideas:    {}", ideas);
            println!("  Hidden events: {}", hidden);
        }
    }

    Ok(())
}
