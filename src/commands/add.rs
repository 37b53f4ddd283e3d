use anyhow::Result;
use clap::Args;
use owo_colors::OwoColorize;
use webcal_core::Subscription;
use webcal_core::fetch::normalize_source;
use webcal_core::store::DirectoryStore;
use webcal_core::subscription::{RefreshInterval, StripFlag};

use super::LOCAL_PRINCIPAL;
use crate::render::Render;

#[derive(Args)]
pub struct AddArgs {
    /// Feed URL (webcal://, http:// or https://)
    pub url: String,

    /// Display name, also used for the subscription's slug
    #[arg(short, long)]
    pub name: Option<String>,

    /// How often to poll, as an ISO-8601 duration (e.g. "PT6H", "P1D").
    /// Without it the feed's own suggestion is used.
    #[arg(short, long)]
    pub refresh: Option<String>,

    /// Keep reminders (VALARM) from the feed
    #[arg(long)]
    pub keep_alarms: bool,

    /// Keep attachments (ATTACH) from the feed
    #[arg(long)]
    pub keep_attachments: bool,

    /// Keep to-dos (VTODO) from the feed
    #[arg(long)]
    pub keep_todos: bool,
}

pub fn run(store: &DirectoryStore, args: AddArgs) -> Result<()> {
    // reject bad URLs now rather than on the first poll
    normalize_source(&args.url)?;

    let refresh_interval = args
        .refresh
        .as_deref()
        .map(str::parse::<RefreshInterval>)
        .transpose()
        .map_err(|e| anyhow::anyhow!(e))?;

    let mut subscription = Subscription::new(0, LOCAL_PRINCIPAL, "", &args.url);
    subscription.display_name = args.name;
    subscription.refresh_interval = refresh_interval;
    subscription.strip_alarms = keep_flag(args.keep_alarms);
    subscription.strip_attachments = keep_flag(args.keep_attachments);
    subscription.strip_todos = keep_flag(args.keep_todos);

    let subscription = store.create_subscription(subscription)?;

    println!("{} {}", "Subscribed:".green(), subscription.render());
    println!(
        "{}",
        format!("Run `webcal sync -s {}` to fetch it.", subscription.uri).dimmed()
    );

    Ok(())
}

fn keep_flag(keep: bool) -> StripFlag {
    if keep { StripFlag::Keep } else { StripFlag::Unset }
}
