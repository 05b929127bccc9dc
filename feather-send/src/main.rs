//! feather-send - Background daemon for scheduled auto-posting
//!
//! Runs the auto-post pipeline on a recurring timer: discovers due
//! reservations per account, resolves content from the shared pool, uploads
//! media and publishes posts, recording every outcome durably.

use clap::Parser;
use libfeatherpost::api::http::HttpPublishingApi;
use libfeatherpost::media::FsMediaStore;
use libfeatherpost::time::{SystemClock, TokioSleeper};
use libfeatherpost::{AutoPostWorker, Config, Database, EventBus, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::time::{sleep, Duration};
use tracing::{debug, error, info};

#[derive(Parser, Debug)]
#[command(name = "feather-send")]
#[command(version)]
#[command(about = "Background daemon for scheduled auto-posting")]
#[command(long_about = "\
feather-send - Background daemon for scheduled auto-posting

DESCRIPTION:
    feather-send is a long-running daemon that monitors the scheduled-post
    queue and automatically publishes due reservations.

    On every tick it processes each active account independently: due
    reservations are fetched, past-window ones expire, empty ones claim
    content from the shared pool, attached media is uploaded through the
    publishing API's chunked protocol, and the post is submitted. Completion
    is recorded with a conditional write, so concurrently running workers
    never publish a reservation twice.

USAGE:
    # Run in foreground (logs to stderr)
    feather-send

    # Run with custom tick interval
    feather-send --poll-interval 30

    # Enable verbose logging
    feather-send --verbose

SIGNALS:
    SIGTERM, SIGINT - Graceful shutdown (finishes the current tick)

CONFIGURATION:
    Configuration file: ~/.config/featherpost/config.toml
    Database location: ~/.local/share/featherpost/posts.db

    [worker]
    poll_interval = 60                 # seconds between ticks
    batch_size = 5                     # due reservations fetched per account
    posts_per_tick = 1                 # successful posts per account per tick
    token_refresh_threshold_secs = 300 # proactive token refresh window

EXIT CODES:
    0 - Clean shutdown
    1 - Runtime error
    2 - Authentication error
")]
struct Cli {
    /// Tick interval in seconds (overrides config)
    #[arg(long, value_name = "SECONDS")]
    #[arg(help = "How often to check for due posts (default: from config)")]
    poll_interval: Option<u64>,

    /// Enable verbose logging to stderr
    #[arg(short, long)]
    #[arg(help = "Enable verbose logging (useful for debugging)")]
    verbose: bool,

    /// Run one tick and exit (for testing)
    #[arg(long, hide = true)]
    #[arg(help = "Process due posts once and exit (for testing)")]
    once: bool,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    if let Err(e) = run(cli).await {
        error!("{}", e);
        std::process::exit(e.exit_code());
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = Config::load()?;
    let db = Database::new(&config.database.path).await?;
    let api = HttpPublishingApi::from_config(&config.api)?;

    let media_root = shellexpand::tilde(&config.worker.media_root).to_string();
    let events = EventBus::default();
    spawn_event_logger(&events);

    let poll_interval = cli.poll_interval.unwrap_or(config.worker.poll_interval);

    let worker = AutoPostWorker::new(
        db,
        Arc::new(api),
        Arc::new(FsMediaStore::new(media_root)),
        Arc::new(TokioSleeper),
        Arc::new(SystemClock),
        events,
        config.worker,
    );

    info!("feather-send daemon starting");

    let shutdown = Arc::new(AtomicBool::new(false));
    setup_signal_handlers(shutdown.clone())?;

    if cli.once {
        run_tick(&worker).await;
        info!("feather-send: processed one tick, exiting");
    } else {
        info!("Tick interval: {}s", poll_interval);
        run_daemon_loop(&worker, poll_interval, shutdown).await;
    }

    info!("feather-send daemon stopped");
    Ok(())
}

/// Initialize logging based on verbosity level
fn init_logging(verbose: bool) {
    use tracing_subscriber::EnvFilter;

    let filter = if verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Log every pipeline event at debug level (the audit sink is
/// fire-and-forget: the daemon never waits on it)
fn spawn_event_logger(events: &EventBus) {
    let mut receiver = events.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = receiver.recv().await {
            debug!(?event, "pipeline event");
        }
    });
}

/// Set up signal handlers for graceful shutdown
#[cfg(unix)]
fn setup_signal_handlers(shutdown: Arc<AtomicBool>) -> Result<()> {
    use signal_hook::consts::{SIGINT, SIGTERM};
    use signal_hook::iterator::Signals;

    let mut signals = Signals::new([SIGINT, SIGTERM]).map_err(|e| {
        libfeatherpost::FeatherError::InvalidInput(format!("Signal setup failed: {}", e))
    })?;

    std::thread::spawn(move || {
        for sig in signals.forever() {
            match sig {
                SIGTERM | SIGINT => {
                    info!("Received shutdown signal, stopping gracefully...");
                    shutdown.store(true, Ordering::Relaxed);
                    break;
                }
                _ => {}
            }
        }
    });

    Ok(())
}

#[cfg(not(unix))]
fn setup_signal_handlers(_shutdown: Arc<AtomicBool>) -> Result<()> {
    Ok(())
}

/// Main daemon loop
async fn run_daemon_loop(worker: &AutoPostWorker, poll_interval: u64, shutdown: Arc<AtomicBool>) {
    loop {
        if shutdown.load(Ordering::Relaxed) {
            info!("Shutdown requested, stopping daemon loop");
            break;
        }

        run_tick(worker).await;

        // Sleep until the next tick, checking for shutdown every second
        for _ in 0..poll_interval {
            if shutdown.load(Ordering::Relaxed) {
                break;
            }
            sleep(Duration::from_secs(1)).await;
        }
    }
}

/// Run one tick, logging its outcome
async fn run_tick(worker: &AutoPostWorker) {
    match worker.run_tick().await {
        Ok(summary) => {
            let posted = summary.total_posted();
            if posted > 0 || !summary.failed_accounts.is_empty() {
                info!(
                    posted,
                    accounts = summary.reports.len(),
                    failed_accounts = summary.failed_accounts.len(),
                    "tick complete"
                );
            }
            for (account_id, error) in &summary.failed_accounts {
                error!(account_id = %account_id, error = %error, "account tick failed");
            }
        }
        Err(e) => error!("Tick failed: {}", e),
    }
}
