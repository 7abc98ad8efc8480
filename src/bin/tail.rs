//! feedsync-tail - follow a discussion scope from the terminal.
//!
//! Bootstraps a scope feed (cache seed plus live fetch), optionally posts a
//! message, then follows the scope and reprints the tree whenever it
//! changes. Ctrl-C tears the background tasks down.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use feedsync::{
    AuthorIdentity, FeedConfig, Item, ScopeFeed, SessionId, SortMode, DEFAULT_SERVER_URL,
};
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Follow a discussion scope and print the tree as it changes.
#[derive(Parser, Debug)]
#[command(name = "feedsync-tail")]
#[command(about = "Follow a feed scope and print the discussion tree live")]
struct Args {
    /// Server URL (also reads from FEEDSYNC_SERVER env var)
    #[arg(short, long, default_value = DEFAULT_SERVER_URL, env = "FEEDSYNC_SERVER")]
    server: String,

    /// Scope key: a campus feed id or a confession id
    #[arg(short = 'c', long, env = "FEEDSYNC_SCOPE")]
    scope: String,

    /// Session id; a random one is generated when omitted
    #[arg(long, env = "FEEDSYNC_SESSION")]
    session: Option<String>,

    /// Display name attached to items posted from this session
    #[arg(long, default_value = "anonymous")]
    name: String,

    /// Root ordering: popularity, new, old or best
    #[arg(long, default_value = "new")]
    sort: SortMode,

    /// Poll cadence in milliseconds
    #[arg(long, default_value_t = 2500)]
    poll_ms: u64,

    /// Directory for the opportunistic snapshot cache
    #[arg(long)]
    cache_dir: Option<PathBuf>,

    /// Post this text to the scope before tailing
    #[arg(long)]
    post: Option<String>,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "feedsync=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut config = FeedConfig::new(args.server, args.scope);
    if let Some(session) = args.session {
        config.session = SessionId::new(session);
    }
    config.author = AuthorIdentity::named(args.name);
    config.sort = args.sort;
    config.poll_interval = Duration::from_millis(args.poll_ms);
    config.cache_dir = args.cache_dir;

    let feed = ScopeFeed::new(config);
    tracing::info!(scope = %feed.scope(), session = %feed.session(), "starting");

    if let Err(e) = feed.bootstrap().await {
        tracing::warn!("initial load failed, starting empty: {}", e);
    }

    if let Some(text) = args.post {
        match feed.post(&text).await {
            Ok(id) => tracing::info!("posted as {}", id),
            Err(e) => {
                eprintln!("failed to post: {e}");
                std::process::exit(1);
            }
        }
    }

    let tasks = feed.follow();
    let mut changes = feed.subscribe_changes();
    render(&feed).await;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            result = changes.recv() => match result {
                // A lagged receiver only missed intermediate ticks; the
                // current state is still worth rendering.
                Ok(()) | Err(RecvError::Lagged(_)) => render(&feed).await,
                Err(RecvError::Closed) => break,
            },
        }
    }

    tracing::info!("shutting down");
    tasks.shutdown();
}

async fn render(feed: &Arc<ScopeFeed>) {
    let items = feed.items().await;
    println!(
        "=== {} ({} roots, sort: {}) ===",
        feed.scope(),
        items.len(),
        feed.sort_mode().await
    );
    for item in &items {
        print_item(item);
    }
}

fn print_item(item: &Item) {
    let indent = "  ".repeat(item.depth);
    let mut flags = String::new();
    if item.is_edited {
        flags.push_str(" (edited)");
    }
    if item.is_provisional() {
        flags.push_str(" [pending]");
    }
    println!(
        "{indent}[{:>3}] {} - {}{flags}",
        item.score, item.author.name, item.content
    );
    for child in &item.children {
        print_item(child);
    }
}
