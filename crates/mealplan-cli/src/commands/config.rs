//! Config command handlers

use std::path::PathBuf;

use anyhow::{bail, Context, Result};

use mealplan_core::Config;

use crate::output::{Output, OutputFormat};

const VALID_KEYS: &str = "data_dir, api_url, realtime_url, auth_token, edit_debounce_ms, \
    heartbeat_secs, initial_reconnect_delay_ms, max_reconnect_delay_secs, \
    request_timeout_secs, show_all_events";

/// Show current configuration
pub fn show(config_path: Option<&PathBuf>, output: &Output) -> Result<()> {
    let config =
        Config::load_with_cli_override(config_path).context("Failed to load configuration")?;
    let token = config.auth_token.as_deref().map(mask);

    match output.format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::json!({
                    "data_dir": config.data_dir,
                    "api_url": config.api_url,
                    "realtime_url": config.realtime_url,
                    "auth_token": token,
                    "edit_debounce_ms": config.edit_debounce_ms,
                    "heartbeat_secs": config.heartbeat_secs,
                    "initial_reconnect_delay_ms": config.initial_reconnect_delay_ms,
                    "max_reconnect_delay_secs": config.max_reconnect_delay_secs,
                    "request_timeout_secs": config.request_timeout_secs,
                    "show_all_events": config.show_all_events
                })
            );
        }
        OutputFormat::Quiet => {
            println!("{}", config.data_dir.display());
        }
        OutputFormat::Human => {
            let effective_path = config_path
                .cloned()
                .unwrap_or_else(Config::config_file_path);
            let unset = "(not set)";
            println!("Configuration:");
            println!("  data_dir:                   {}", config.data_dir.display());
            println!(
                "  api_url:                    {}",
                config.api_url.as_deref().unwrap_or(unset)
            );
            println!(
                "  realtime_url:               {}",
                config.realtime_url.as_deref().unwrap_or(unset)
            );
            println!(
                "  auth_token:                 {}",
                token.as_deref().unwrap_or(unset)
            );
            println!("  edit_debounce_ms:           {}", config.edit_debounce_ms);
            println!("  heartbeat_secs:             {}", config.heartbeat_secs);
            println!(
                "  initial_reconnect_delay_ms: {}",
                config.initial_reconnect_delay_ms
            );
            println!(
                "  max_reconnect_delay_secs:   {}",
                config.max_reconnect_delay_secs
            );
            println!("  request_timeout_secs:       {}", config.request_timeout_secs);
            println!("  show_all_events:            {}", config.show_all_events);
            println!();
            println!("Config file: {}", effective_path.display());
        }
    }

    Ok(())
}

/// Set a configuration value
pub fn set(
    key: String,
    value: String,
    config_path: Option<&PathBuf>,
    output: &Output,
) -> Result<()> {
    let mut config =
        Config::load_with_cli_override(config_path).context("Failed to load configuration")?;

    apply(&mut config, &key, &value)?;

    // Save to the CLI-specified path or default
    let save_path = config_path
        .cloned()
        .unwrap_or_else(Config::config_file_path);
    config
        .save_to_path(&save_path)
        .context("Failed to save configuration")?;

    let shown = if key == "auth_token" { mask(&value) } else { value };
    output.success(&format!("Set {} = {}", key, shown));

    Ok(())
}

fn apply(config: &mut Config, key: &str, value: &str) -> Result<()> {
    match key {
        "data_dir" => config.data_dir = value.into(),
        "api_url" => config.api_url = optional(value),
        "realtime_url" => config.realtime_url = optional(value),
        "auth_token" => config.auth_token = optional(value),
        "edit_debounce_ms" => config.edit_debounce_ms = number(key, value)?,
        "heartbeat_secs" => config.heartbeat_secs = number(key, value)?,
        "initial_reconnect_delay_ms" => config.initial_reconnect_delay_ms = number(key, value)?,
        "max_reconnect_delay_secs" => config.max_reconnect_delay_secs = number(key, value)?,
        "request_timeout_secs" => config.request_timeout_secs = number(key, value)?,
        "show_all_events" => {
            config.show_all_events = value
                .parse()
                .context("Invalid value for show_all_events. Use 'true' or 'false'.")?;
        }
        _ => {
            bail!(
                "Unknown configuration key: '{}'\nValid keys: {}",
                key,
                VALID_KEYS
            );
        }
    }
    Ok(())
}

fn optional(value: &str) -> Option<String> {
    if value.is_empty() || value == "none" {
        None
    } else {
        Some(value.to_string())
    }
}

fn number(key: &str, value: &str) -> Result<u64> {
    value
        .parse()
        .with_context(|| format!("Invalid value for {}. Use a whole number.", key))
}

/// Show only the last four characters of a secret
fn mask(secret: &str) -> String {
    let count = secret.chars().count();
    if count <= 4 {
        return "****".to_string();
    }
    let tail: String = secret.chars().skip(count - 4).collect();
    format!("****{}", tail)
}
