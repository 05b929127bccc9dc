//! feather-queue - Inspect the scheduled-post queue
//!
//! Unix-style tool for looking at reservations and their status counts.

use clap::{Parser, Subcommand};
use libfeatherpost::{Config, Database, Result, ScheduledPost};

#[derive(Parser, Debug)]
#[command(name = "feather-queue")]
#[command(version)]
#[command(about = "Inspect the scheduled-post queue")]
#[command(long_about = "\
feather-queue - Inspect the scheduled-post queue

DESCRIPTION:
    feather-queue lists scheduled-post reservations and shows queue
    statistics. Reservations are written by the scheduling flow and consumed
    by the feather-send daemon; this tool only reads them.

COMMANDS:
    list        List reservations
    stats       Show reservation counts per status

USAGE EXAMPLES:
    # List the most recent reservations
    feather-queue list

    # List one account's reservations as JSON
    feather-queue list --account acc_1234 --format json

    # Show queue statistics
    feather-queue stats

CONFIGURATION:
    Configuration file: ~/.config/featherpost/config.toml
    Database location: ~/.local/share/featherpost/posts.db

    Override with environment variables:
        FEATHERPOST_CONFIG - Path to config file

EXIT CODES:
    0 - Success
    1 - Operation failed
    3 - Invalid input
")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging to stderr
    #[arg(short, long, global = true)]
    #[arg(help = "Enable verbose logging to stderr (useful for debugging)")]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List reservations
    List {
        /// Output format: text or json
        #[arg(short, long, default_value = "text")]
        format: String,

        /// Filter by account id
        #[arg(short, long)]
        account: Option<String>,

        /// Maximum rows to show
        #[arg(short, long, default_value_t = 20)]
        limit: usize,
    },

    /// Show reservation counts per status
    Stats {
        /// Output format: text or json
        #[arg(short, long, default_value = "text")]
        format: String,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if cli.verbose {
        tracing_subscriber::fmt()
            .with_env_filter("debug")
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter("error")
            .with_writer(std::io::stderr)
            .init();
    }

    if let Err(e) = run(cli).await {
        eprintln!("Error: {}", e);
        std::process::exit(e.exit_code());
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = Config::load()?;
    let db = Database::new(&config.database.path).await?;

    match cli.command {
        Commands::List {
            format,
            account,
            limit,
        } => {
            let reservations = db.list_reservations(account.as_deref(), limit).await?;
            match format.as_str() {
                "json" => print_json(&reservations)?,
                "text" => print_text(&reservations),
                other => {
                    return Err(libfeatherpost::FeatherError::InvalidInput(format!(
                        "Unknown format '{}'. Valid options: text, json",
                        other
                    )))
                }
            }
        }
        Commands::Stats { format } => {
            let counts = db.status_counts().await?;
            match format.as_str() {
                "json" => {
                    let map: serde_json::Map<String, serde_json::Value> = counts
                        .into_iter()
                        .map(|(status, n)| (status, serde_json::json!(n)))
                        .collect();
                    println!("{}", serde_json::to_string_pretty(&map).unwrap_or_default());
                }
                "text" => {
                    if counts.is_empty() {
                        println!("Queue is empty");
                    }
                    for (status, n) in counts {
                        println!("{:<14} {}", status, n);
                    }
                }
                other => {
                    return Err(libfeatherpost::FeatherError::InvalidInput(format!(
                        "Unknown format '{}'. Valid options: text, json",
                        other
                    )))
                }
            }
        }
    }

    Ok(())
}

fn print_json(reservations: &[ScheduledPost]) -> Result<()> {
    let json = serde_json::to_string_pretty(reservations)
        .map_err(|e| libfeatherpost::FeatherError::InvalidInput(e.to_string()))?;
    println!("{}", json);
    Ok(())
}

fn print_text(reservations: &[ScheduledPost]) {
    if reservations.is_empty() {
        println!("No reservations");
        return;
    }

    for r in reservations {
        let when = chrono::DateTime::from_timestamp(r.scheduled_at, 0)
            .map(|dt| dt.format("%Y-%m-%d %H:%M UTC").to_string())
            .unwrap_or_else(|| r.scheduled_at.to_string());
        let preview: String = r.content.chars().take(40).collect();

        println!(
            "{}  {}  [{}]  {}{}",
            r.account_id,
            r.slot_key,
            r.status,
            when,
            if preview.is_empty() {
                String::new()
            } else {
                format!("  \"{}\"", preview)
            }
        );

        if let Some(post_id) = &r.post_id {
            println!("    posted as {}", post_id);
        }
        if let Some(error) = &r.last_post_error {
            println!(
                "    last error{}: {}",
                if r.permanent_failure { " (permanent)" } else { "" },
                error
            );
        }
    }
}
