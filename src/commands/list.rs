use anyhow::Result;
use owo_colors::OwoColorize;
use webcal_core::schedule;
use webcal_core::store::DirectoryStore;

use crate::render::{Render, render_time};

pub fn run(store: &DirectoryStore) -> Result<()> {
    let subscriptions = store.subscriptions()?;

    if subscriptions.is_empty() {
        println!("{}", "No subscriptions. Add one with `webcal add <url>`.".dimmed());
        return Ok(());
    }

    for (i, subscription) in subscriptions.iter().enumerate() {
        println!("{}", subscription.render());
        println!("   {}", subscription.redacted_source().dimmed());

        let interval = subscription
            .refresh_interval
            .as_ref()
            .map(|i| i.to_string())
            .unwrap_or_else(|| "every sync".to_string());
        println!("   {} {}", "refresh:".dimmed(), interval);

        match subscription.last_modified {
            Some(last) => println!("   {} {}", "last synced:".dimmed(), render_time(last)),
            None => println!("   {} {}", "last synced:".dimmed(), "never".yellow()),
        }
        if let Some(next) = schedule::next_due(subscription) {
            println!("   {} {}", "next due:".dimmed(), render_time(next));
        }

        if i < subscriptions.len() - 1 {
            println!();
        }
    }

    Ok(())
}
