//! # Wheel CLI
//!
//! A line-oriented presentation layer for one spinsync client.
//! Run two of them against the same database and session to watch draws
//! mirror between terminals.
//!
//! ```text
//! wheel-cli --session friday --database-url postgres://localhost/wheel
//! ```
//!
//! Without `--database-url` the session lives in process memory.

use anyhow::{Context, Result};
use clap::Parser;
use spinsync::{
    session_param_from_query, EngineBuilder, EngineHandle, KeyStore, Outcome, Projection,
    RemoteStore, SessionConfig, SessionIdentityResolver,
};
use spinsync_persistence::FileKeyStore;
use spinsync_store_postgres::PgSessionStore;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "wheel-cli", about = "Shared elimination wheel in your terminal")]
struct Args {
    /// Session to join; remembered for later runs
    #[arg(long)]
    session: Option<String>,

    /// Share link to join; its session parameter wins over --session
    #[arg(long)]
    link: Option<String>,

    /// JSON file overriding roster, timeouts and the default session key
    #[arg(long)]
    config: Option<PathBuf>,

    /// PostgreSQL URL; in-memory store when absent
    #[arg(long, env = "DATABASE_URL")]
    database_url: Option<String>,

    /// Where the session key is remembered
    #[arg(long, default_value = ".spinsync/session.json")]
    key_file: PathBuf,

    /// Base URL used for share links
    #[arg(long, default_value = "http://localhost:5173/")]
    share_base: String,
}

// ============================================================================
// Wiring
// ============================================================================

async fn open_store(database_url: Option<&str>) -> Result<Arc<dyn RemoteStore>> {
    match database_url {
        Some(url) => {
            let pool = sqlx::PgPool::connect(url)
                .await
                .with_context(|| format!("connect to {url}"))?;
            let store = PgSessionStore::new(pool);
            store.migrate().await?;
            Ok(Arc::new(store))
        }
        None => Ok(Arc::new(spinsync::MemoryStore::new())),
    }
}

// ============================================================================
// Rendering
// ============================================================================

fn render(p: &Projection) {
    if p.is_awaiting_remote() {
        println!("connecting...");
        return;
    }
    let remaining = p.remaining();
    match remaining.len() {
        0 => println!("All done! Reset the wheel to start again."),
        1 => println!("Last one: {} (spin to draw them)", remaining[0]),
        n => println!("{n} left: {}", remaining.join(", ")),
    }
    if let Some(selection) = &p.current_selection {
        let banner = if p.celebrating { " 🎉" } else { "" };
        println!(
            "This time you draw: {} [{}]{banner}",
            selection.identifier, selection.display_image
        );
    }
    if !p.drawn_set.is_empty() {
        println!("History: {}", p.drawn_set.join(" <- "));
    }
}

fn report(outcome: &Outcome) {
    match outcome {
        Outcome::Drawn { selection, spin } => match spin {
            Some(spin) => println!(
                "spinning {} turns, landing on slot {}: {}",
                spin.extra_turns, spin.wheel_index, selection.identifier
            ),
            None => println!("last one standing: {}", selection.identifier),
        },
        Outcome::Undone => println!("undone"),
        Outcome::Reset => println!("wheel reset"),
        Outcome::Dismissed => {}
        Outcome::NoOp(reason) => println!("({reason})"),
    }
}

async fn handle_command(handle: &EngineHandle, line: &str, share_base: &str) -> Result<bool> {
    let outcome = match line.trim() {
        "" => return Ok(true),
        "spin" | "s" => handle.request_draw().await?,
        "undo" | "u" => handle.request_undo().await?,
        "reset" => handle.request_reset().await?,
        "dismiss" | "d" => handle.dismiss_selection().await?,
        "show" => {
            render(&handle.projection());
            return Ok(true);
        }
        "link" => {
            println!("{}", handle.session_key().share_link(share_base));
            return Ok(true);
        }
        "quit" | "q" => return Ok(false),
        other => {
            println!("unknown command {other:?}; try spin, undo, reset, dismiss, show, link, quit");
            return Ok(true);
        }
    };
    report(&outcome);
    Ok(true)
}

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let config = match &args.config {
        Some(path) => SessionConfig::from_json_path(path)?,
        None => SessionConfig::default(),
    };

    let from_link = args
        .link
        .as_deref()
        .and_then(|link| link.split_once('?'))
        .and_then(|(_, query)| session_param_from_query(query));
    let key_store: Arc<dyn KeyStore> = Arc::new(FileKeyStore::new(&args.key_file));
    let key = SessionIdentityResolver::new(key_store)
        .with_default_key(config.default_key.clone())
        .resolve(from_link.as_deref().or(args.session.as_deref()));

    let store = open_store(args.database_url.as_deref()).await?;
    let handle = EngineBuilder::new(store)
        .with_config(config)
        .with_session_key(key)
        .build()
        .start();

    println!("session: {}", handle.session_key());
    let mut changes = handle.watch();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            changed = changes.changed() => {
                if changed.is_err() {
                    break;
                }
                let projection = Projection::clone(&changes.borrow_and_update());
                render(&projection);
            }
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                if !handle_command(&handle, &line, &args.share_base).await? {
                    break;
                }
            }
        }
    }

    handle.shutdown().await;
    Ok(())
}
