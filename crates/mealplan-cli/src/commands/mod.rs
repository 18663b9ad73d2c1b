//! Command handlers

pub mod calendar;
pub mod config;
pub mod entity;
pub mod note;
pub mod reset;
pub mod status;
pub mod sync;

use anyhow::{anyhow, Context, Result};
use chrono::{Duration, Local, NaiveDate};

use mealplan_core::{Client, Config, EntityId};

use crate::remote;

/// Days before and after today loaded into memory for every command
const WINDOW_BEHIND: i64 = 7;
const WINDOW_AHEAD: i64 = 28;

/// Open the local store, pick the remote API and load the default window
pub async fn open_client(config: Config, offline: bool) -> Result<Client> {
    let (api, online) = remote::connect(&config, offline).await?;
    let client = Client::open(config, api, online)?;
    let (start, end) = default_window();
    client.hydrate(start, end)?;
    Ok(client)
}

/// Date range loaded by default: one week back, four weeks ahead
pub fn default_window() -> (NaiveDate, NaiveDate) {
    let today = Local::now().date_naive();
    (
        today - Duration::days(WINDOW_BEHIND),
        today + Duration::days(WINDOW_AHEAD),
    )
}

/// Parse `today`, `tomorrow`, `yesterday`, `+N`/`-N` days, or `YYYY-MM-DD`
pub fn parse_date(input: &str) -> Result<NaiveDate> {
    parse_date_from(input, Local::now().date_naive())
}

fn parse_date_from(input: &str, today: NaiveDate) -> Result<NaiveDate> {
    let input = input.trim();
    match input.to_lowercase().as_str() {
        "today" => return Ok(today),
        "tomorrow" => return Ok(today + Duration::days(1)),
        "yesterday" => return Ok(today - Duration::days(1)),
        _ => {}
    }
    let offset = match input.as_bytes().first() {
        Some(b'+') => Some(1),
        Some(b'-') => Some(-1),
        _ => None,
    };
    if let Some(sign) = offset {
        let days: i64 = input[1..]
            .parse()
            .with_context(|| format!("Invalid day offset: {}", input))?;
        return Ok(today + Duration::days(sign * days));
    }
    NaiveDate::parse_from_str(input, "%Y-%m-%d")
        .with_context(|| format!("Invalid date '{}'. Use YYYY-MM-DD, today, tomorrow or +N", input))
}

/// Parse an entity id as printed by the list commands
pub fn parse_id(input: &str) -> Result<EntityId> {
    input
        .trim()
        .parse()
        .map_err(|e| anyhow!("Invalid id '{}': {}", input, e))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_parse_relative_dates() {
        let today = day(2024, 1, 31);
        assert_eq!(parse_date_from("today", today).unwrap(), today);
        assert_eq!(parse_date_from("Tomorrow", today).unwrap(), day(2024, 2, 1));
        assert_eq!(parse_date_from("yesterday", today).unwrap(), day(2024, 1, 30));
        assert_eq!(parse_date_from("+3", today).unwrap(), day(2024, 2, 3));
        assert_eq!(parse_date_from("-2", today).unwrap(), day(2024, 1, 29));
    }

    #[test]
    fn test_parse_absolute_dates() {
        let today = day(2024, 1, 31);
        assert_eq!(parse_date_from("2024-03-05", today).unwrap(), day(2024, 3, 5));
        assert!(parse_date_from("03/05/2024", today).is_err());
        assert!(parse_date_from("+x", today).is_err());
    }

    #[test]
    fn test_parse_id() {
        assert_eq!(parse_id("srv-1").unwrap(), EntityId::remote("srv-1"));
        assert!(parse_id("local:1700000000000-abcd1234").unwrap().is_local());
        assert!(parse_id("  ").is_err());
    }

    #[test]
    fn test_default_window_contains_today() {
        let (start, end) = default_window();
        let today = Local::now().date_naive();
        assert!(start < today && today < end);
    }
}
