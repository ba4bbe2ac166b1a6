//! Chatlog - inspect Claude Code session logs from the command line.
//!
//! Every command prints JSON lines on stdout; logs go to stderr.
//!
//! # Commands
//!
//! - `chatlog sessions`: List sessions, most recent first
//! - `chatlog projects`: List project paths
//! - `chatlog show <id>`: Print a whole session
//! - `chatlog tail <id>`: Print messages appended after an offset
//! - `chatlog watch`: Print change notifications
//!
//! # Environment Variables
//!
//! See the [`config`](chatlog_engine::config) module for available options.

use std::io::{self, Write};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tokio::signal;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use chatlog_engine::broadcast::ChangeFilter;
use chatlog_engine::config::Config;
use chatlog_engine::store::SessionStore;
use chatlog_engine::watcher::ChangeWatcher;

/// Chatlog - inspect Claude Code session logs.
#[derive(Parser, Debug)]
#[command(name = "chatlog")]
#[command(author, version, about, long_about = None)]
#[command(after_help = "\
ENVIRONMENT VARIABLES:
    CHATLOG_CLAUDE_DIR     Claude directory (default: ~/.claude)
    CHATLOG_DEBOUNCE_MS    Change settle window in ms (default: 100)
    CHATLOG_EVENT_BUFFER   Change notification buffer (default: 1000)
    RUST_LOG               Log filter (default: info)

EXAMPLES:
    # Most recent sessions
    chatlog sessions

    # Follow a session as it is written
    chatlog tail 6e45a55c-3124-4cc8-ad85-040a5c316009 --follow
")]
struct Cli {
    /// Emit logs as JSON objects instead of text.
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

/// CLI subcommands.
#[derive(Subcommand, Debug)]
enum Command {
    /// List sessions, most recent first.
    Sessions,

    /// List distinct project paths.
    Projects,

    /// Print every message of a session (summaries first).
    Show {
        /// Session id.
        id: String,
    },

    /// Print user and assistant messages appended after a byte offset.
    Tail {
        /// Session id.
        id: String,

        /// Byte offset to start from.
        #[arg(short, long, default_value_t = 0)]
        offset: u64,

        /// Keep printing new messages as the session grows.
        #[arg(short, long)]
        follow: bool,
    },

    /// Print change notifications until interrupted.
    Watch,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(cli.json_logs);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to create tokio runtime")?;

    runtime.block_on(run(cli.command))
}

async fn run(command: Command) -> Result<()> {
    let config = Config::from_env().context("Failed to load configuration")?;
    debug!(
        claude_dir = %config.claude_dir.display(),
        debounce_ms = config.debounce.as_millis(),
        event_buffer = config.event_buffer,
        "Configuration loaded"
    );

    let store = SessionStore::open(config).await;

    match command {
        Command::Sessions => {
            for session in store.list_sessions().await? {
                print_json(&session)?;
            }
        }
        Command::Projects => {
            for project in store.list_projects().await? {
                print_json(&project)?;
            }
        }
        Command::Show { id } => {
            for message in store.read_all(&id).await? {
                print_json(&message)?;
            }
        }
        Command::Tail { id, offset, follow } => run_tail(&store, &id, offset, follow).await?,
        Command::Watch => run_watch(&store).await?,
    }

    debug!(stats = ?store.stats(), "Done");
    Ok(())
}

/// Prints appended messages, then optionally keeps following the session.
async fn run_tail(store: &SessionStore, id: &str, mut offset: u64, follow: bool) -> Result<()> {
    let watcher = if follow {
        Some(ChangeWatcher::start(store.config()).context("Failed to start change watcher")?)
    } else {
        None
    };
    let _sync = watcher.as_ref().map(|w| store.attach(w));
    // Subscribed before the first read so no append is missed in between.
    let changes = watcher
        .as_ref()
        .map(|w| w.subscribe_filtered(ChangeFilter::new().with_session(id)));

    offset = print_chunk(store, id, offset).await?;

    let Some(mut changes) = changes else {
        return Ok(());
    };

    info!(session_id = %id, offset, "Following session");
    let shutdown = wait_for_shutdown();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            () = &mut shutdown => break,
            change = changes.recv() => match change {
                Ok(_) | Err(RecvError::Lagged(_)) => {
                    offset = print_chunk(store, id, offset).await?;
                }
                Err(RecvError::Closed) => break,
            },
        }
    }

    info!(offset, "Stopped following");
    Ok(())
}

async fn print_chunk(store: &SessionStore, id: &str, offset: u64) -> Result<u64> {
    let chunk = store
        .read_from(id, offset)
        .await
        .with_context(|| format!("Failed to read session {id}"))?;
    for message in &chunk.messages {
        print_json(message)?;
    }
    Ok(chunk.next_offset)
}

/// Prints every change notification until interrupted.
async fn run_watch(store: &SessionStore) -> Result<()> {
    let watcher = ChangeWatcher::start(store.config()).context("Failed to start change watcher")?;
    let mut changes = watcher.subscribe();
    info!(root = %watcher.root().display(), "Watching for changes");

    let shutdown = wait_for_shutdown();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            () = &mut shutdown => break,
            change = changes.recv() => match change {
                Ok(event) => print_json(&event)?,
                Err(RecvError::Lagged(missed)) => warn!(missed, "Missed change notifications"),
                Err(RecvError::Closed) => break,
            },
        }
    }

    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let mut stdout = io::stdout().lock();
    serde_json::to_writer(&mut stdout, value).context("Failed to serialize output")?;
    writeln!(stdout).context("Failed to write output")?;
    Ok(())
}

/// Initializes the tracing subscriber on stderr.
fn init_logging(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(true)
        .with_level(true);

    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Waits for a shutdown signal (SIGINT or SIGTERM).
async fn wait_for_shutdown() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}
