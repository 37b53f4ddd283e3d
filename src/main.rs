mod commands;
mod render;
mod utils;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};
use webcal_core::store::DirectoryStore;
use webcal_core::{Subscription, WebcalConfig};

#[derive(Parser)]
#[command(name = "webcal")]
#[command(about = "Subscribe to remote calendar feeds and keep a local copy in sync")]
struct Cli {
    /// Log what the sync engine is doing (to stderr)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Subscribe to a calendar feed
    Add(commands::add::AddArgs),
    /// List subscriptions
    List,
    /// Unsubscribe and delete the cached copy
    Remove {
        /// Subscription to remove (by slug)
        subscription: String,
    },
    /// Poll subscriptions and update the local cache
    Sync {
        /// Only poll this subscription (by slug), even if it is not due
        #[arg(short, long)]
        subscription: Option<String>,
    },
    /// Show what a sync would change, without writing anything
    Status {
        /// Only check this subscription (by slug)
        #[arg(short, long)]
        subscription: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = WebcalConfig::load().context("Failed to load configuration")?;
    let store = DirectoryStore::from_config(&config);
    tracing::debug!(data_dir = %store.root().display(), "Configuration loaded");

    match cli.command {
        Commands::Add(args) => commands::add::run(&store, args),
        Commands::List => commands::list::run(&store),
        Commands::Remove { subscription } => commands::remove::run(&store, &subscription),
        Commands::Sync { subscription } => {
            require_subscriptions(&store)?;
            let selected = match subscription {
                Some(slug) => Some(resolve_subscription(&store, &slug)?),
                None => None,
            };
            commands::sync::run(&config, store, selected).await
        }
        Commands::Status { subscription } => {
            require_subscriptions(&store)?;
            let subscriptions = match subscription {
                Some(slug) => vec![resolve_subscription(&store, &slug)?],
                None => store.subscriptions()?,
            };
            commands::status::run(&config, store, subscriptions).await
        }
    }
}

/// Engine logs go to stderr so they never mix with rendered output.
fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| default.into()))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn require_subscriptions(store: &DirectoryStore) -> Result<()> {
    if store.subscriptions()?.is_empty() {
        anyhow::bail!(
            "No subscriptions found.\n\n\
            Subscribe to your first calendar with:\n  \
            webcal add <url>\n\n\
            Example:\n  \
            webcal add webcal://example.com/holidays.ics --name holidays"
        );
    }

    Ok(())
}

fn resolve_subscription(store: &DirectoryStore, slug: &str) -> Result<Subscription> {
    let all_subscriptions = store.subscriptions()?;

    match all_subscriptions.iter().find(|s| s.uri == slug) {
        Some(subscription) => Ok(subscription.clone()),
        None => {
            let available: Vec<_> = all_subscriptions.iter().map(|s| s.uri.as_str()).collect();
            anyhow::bail!(
                "Subscription '{}' not found. Available: {}",
                slug,
                available.join(", ")
            );
        }
    }
}
