//! Meal planner CLI
//!
//! Command-line interface for the offline-first meal planner. Every change
//! is written locally first and synced when the server is reachable.

use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use mealplan_core::Config;

mod commands;
mod editor;
mod output;
mod remote;

use commands::{parse_date, parse_id};
use output::{Output, OutputFormat};

#[derive(Parser)]
#[command(name = "mealplan")]
#[command(about = "Offline-first meal planner")]
#[command(version)]
#[command(propagate_version = true)]
struct Cli {
    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Quiet mode - minimal output
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Don't contact the server; queue every change
    #[arg(long, global = true)]
    offline: bool,

    /// Log to stderr (-v for info, -vv for debug, -vvv for trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Use this config file instead of the default
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show connection status and queued changes
    Status,
    /// Send queued changes to the server now
    Sync,
    /// List changes waiting to sync
    Pending,
    /// Show or edit a day's meals
    Note {
        #[command(subcommand)]
        command: NoteCommands,
    },
    /// Manage shopping-list items of a day's meals
    Item {
        #[command(subcommand)]
        command: ItemCommands,
    },
    /// Move a meal to another day
    Move {
        /// Day the meal is on
        #[arg(allow_hyphen_values = true)]
        from: String,
        /// Meal line number (as shown by `note show`)
        line: usize,
        /// Day to move it to
        #[arg(allow_hyphen_values = true)]
        to: String,
    },
    /// Manage pantry items
    Pantry {
        #[command(subcommand)]
        command: PantryCommands,
    },
    /// Manage meal ideas
    Idea {
        #[command(subcommand)]
        command: IdeaCommands,
    },
    /// Show, hide or unhide calendar events
    Calendar {
        #[command(subcommand)]
        command: CalendarCommands,
    },
    /// Pull a date range from the server into the local cache
    Refresh {
        /// First day (default: a week ago)
        #[arg(long, allow_hyphen_values = true)]
        from: Option<String>,
        /// Last day (default: four weeks ahead)
        #[arg(long, allow_hyphen_values = true)]
        to: Option<String>,
    },
    /// Stay connected and print changes pushed by the server
    Listen {
        /// Stop after this many seconds
        #[arg(long, value_name = "SECS")]
        duration: Option<u64>,
    },
    /// Show or set configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
    /// Delete all local data, including unsynced changes
    Reset {
        /// Don't ask for confirmation
        #[arg(long)]
        yes: bool,
    },
}

#[derive(Subcommand)]
enum NoteCommands {
    /// Show the meals for a day
    Show {
        /// Day (YYYY-MM-DD, today, tomorrow, +N)
        #[arg(default_value = "today", allow_hyphen_values = true)]
        date: String,
        /// Number of days to show
        #[arg(short, long, default_value_t = 1)]
        days: u32,
    },
    /// Replace the meals for a day (opens $EDITOR without TEXT)
    Set {
        #[arg(allow_hyphen_values = true)]
        date: String,
        /// New note text; use \n between meals
        text: Option<String>,
    },
}

#[derive(Subcommand)]
enum ItemCommands {
    /// Flip whether a meal's ingredients are on the shopping list
    Toggle {
        #[arg(allow_hyphen_values = true)]
        date: String,
        /// Meal line number
        line: usize,
    },
}

#[derive(Subcommand)]
enum PantryCommands {
    /// List pantry items
    #[command(alias = "ls")]
    List,
    /// Add a pantry item
    Add {
        name: String,
        #[arg(short = 'n', long, default_value_t = 1)]
        quantity: i64,
    },
    /// Rename an item or change its quantity
    Update {
        id: String,
        #[arg(long)]
        name: Option<String>,
        #[arg(short = 'n', long)]
        quantity: Option<i64>,
    },
    /// Remove a pantry item
    #[command(alias = "rm")]
    Delete { id: String },
}

#[derive(Subcommand)]
enum IdeaCommands {
    /// List meal ideas
    #[command(alias = "ls")]
    List,
    /// Add a meal idea
    Add { title: String },
    /// Rename a meal idea
    Update { id: String, title: String },
    /// Remove a meal idea
    #[command(alias = "rm")]
    Delete { id: String },
}

#[derive(Subcommand)]
enum CalendarCommands {
    /// List a day's events
    Show {
        #[arg(default_value = "today", allow_hyphen_values = true)]
        date: String,
        /// Include hidden events
        #[arg(short, long)]
        all: bool,
    },
    /// Hide an event (number from `calendar show --all`)
    Hide {
        #[arg(allow_hyphen_values = true)]
        date: String,
        index: usize,
    },
    /// Show a hidden event again
    Unhide {
        #[arg(allow_hyphen_values = true)]
        date: String,
        index: usize,
    },
}

#[derive(Subcommand, Clone)]
enum ConfigCommands {
    /// Show current configuration
    Show,
    /// Set a configuration value
    Set {
        /// Configuration key (api_url, realtime_url, auth_token, ...)
        key: String,
        /// Configuration value ("none" clears optional keys)
        value: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    let output = Output::new(OutputFormat::from_flags(cli.json, cli.quiet));
    let config_path = cli.config.as_ref();

    // Commands that don't need the store
    if let Commands::Config { command } = &cli.command {
        return match command.clone() {
            Some(ConfigCommands::Show) | None => commands::config::show(config_path, &output),
            Some(ConfigCommands::Set { key, value }) => {
                commands::config::set(key, value, config_path, &output)
            }
        };
    }

    let config =
        Config::load_with_cli_override(config_path).context("Failed to load configuration")?;

    if let Commands::Reset { yes } = cli.command {
        return commands::reset::reset(&config, yes, &output);
    }

    let client = commands::open_client(config, cli.offline).await?;

    let result = match cli.command {
        Commands::Config { .. } | Commands::Reset { .. } => unreachable!(), // Handled above
        Commands::Status => commands::status::show(&client, &output),
        Commands::Sync => commands::sync::sync(&client, &output).await,
        Commands::Pending => commands::sync::pending(&client, &output),
        Commands::Note { command } => match command {
            NoteCommands::Show { date, days } => {
                commands::note::show(&client, parse_date(&date)?, days, &output)
            }
            NoteCommands::Set { date, text } => {
                commands::note::set(&client, parse_date(&date)?, text, &output).await
            }
        },
        Commands::Item {
            command: ItemCommands::Toggle { date, line },
        } => commands::note::toggle_item(&client, parse_date(&date)?, line, &output).await,
        Commands::Move { from, line, to } => {
            commands::note::move_line(&client, parse_date(&from)?, line, parse_date(&to)?, &output)
                .await
        }
        Commands::Pantry { command } => handle_pantry_command(command, &client, &output).await,
        Commands::Idea { command } => handle_idea_command(command, &client, &output).await,
        Commands::Calendar { command } => {
            handle_calendar_command(command, &client, &output).await
        }
        Commands::Refresh { from, to } => {
            let (default_start, default_end) = commands::default_window();
            let start = optional_date(from.as_deref())?.unwrap_or(default_start);
            let end = optional_date(to.as_deref())?.unwrap_or(default_end);
            commands::sync::refresh(&client, start, end, &output).await
        }
        Commands::Listen { duration } => commands::sync::listen(&client, duration, &output).await,
    };

    // Drain anything queued by this command or earlier offline runs
    if result.is_ok() && client.connectivity().is_online() {
        if let Err(e) = client.engine().drain().await {
            if !output.is_quiet() {
                eprintln!("⚠ Sync failed: {}", e);
            }
        }
    }

    result
}

fn optional_date(input: Option<&str>) -> Result<Option<NaiveDate>> {
    input.map(parse_date).transpose()
}

async fn handle_pantry_command(
    command: PantryCommands,
    client: &mealplan_core::Client,
    output: &Output,
) -> Result<()> {
    use commands::entity;
    match command {
        PantryCommands::List => entity::list_pantry(client, output),
        PantryCommands::Add { name, quantity } => {
            entity::add_pantry(client, name, quantity, output).await
        }
        PantryCommands::Update { id, name, quantity } => {
            entity::update_pantry(client, parse_id(&id)?, name, quantity, output).await
        }
        PantryCommands::Delete { id } => entity::remove_pantry(client, parse_id(&id)?, output).await,
    }
}

async fn handle_idea_command(
    command: IdeaCommands,
    client: &mealplan_core::Client,
    output: &Output,
) -> Result<()> {
    use commands::entity;
    match command {
        IdeaCommands::List => entity::list_ideas(client, output),
        IdeaCommands::Add { title } => entity::add_idea(client, title, output).await,
        IdeaCommands::Update { id, title } => {
            entity::update_idea(client, parse_id(&id)?, title, output).await
        }
        IdeaCommands::Delete { id } => entity::remove_idea(client, parse_id(&id)?, output).await,
    }
}

async fn handle_calendar_command(
    command: CalendarCommands,
    client: &mealplan_core::Client,
    output: &Output,
) -> Result<()> {
    use commands::calendar;
    match command {
        CalendarCommands::Show { date, all } => {
            calendar::show(client, parse_date(&date)?, all, output)
        }
        CalendarCommands::Hide { date, index } => {
            calendar::hide(client, parse_date(&date)?, index, output).await
        }
        CalendarCommands::Unhide { date, index } => {
            calendar::unhide(client, parse_date(&date)?, index, output).await
        }
    }
}

/// Log to stderr; `RUST_LOG` overrides the level picked by `--verbose`
fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!("mealplan_core={},mealplan_cli={}", level, level))
    });

    // Ignore the error if a subscriber is already installed
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_move_with_relative_days() {
        let cli = Cli::try_parse_from(["mealplan", "move", "today", "0", "+1"]).unwrap();
        match cli.command {
            Commands::Move { from, line, to } => {
                assert_eq!(from, "today");
                assert_eq!(line, 0);
                assert_eq!(to, "+1");
            }
            _ => panic!("expected move"),
        }
    }

    #[test]
    fn test_parse_global_flags() {
        let cli =
            Cli::try_parse_from(["mealplan", "pantry", "add", "Rice", "-n", "2", "--offline", "--json", "-vv"])
                .unwrap();
        assert!(cli.offline);
        assert!(cli.json);
        assert_eq!(cli.verbose, 2);
        assert!(matches!(
            cli.command,
            Commands::Pantry {
                command: PantryCommands::Add { quantity: 2, .. }
            }
        ));
    }
}
