use std::sync::Arc;

use anyhow::Result;
use owo_colors::OwoColorize;
use webcal_core::store::DirectoryStore;
use webcal_core::{Poller, Subscription, WebcalConfig};

use crate::render::Render;
use crate::utils::tui;

pub async fn run(
    config: &WebcalConfig,
    store: DirectoryStore,
    subscriptions: Vec<Subscription>,
) -> Result<()> {
    let store = Arc::new(store);
    let poller = Poller::from_config(config, store.clone(), store.clone())?;

    for (i, subscription) in subscriptions.iter().enumerate() {
        let spinner = tui::create_spinner(subscription.render());
        let result = poller.preview(subscription).await;
        spinner.finish_and_clear();

        println!("{}", subscription.render());

        match result {
            Ok(Some(plan)) => println!("{}", plan.render()),
            Ok(None) => println!("   {}", "Feed unavailable (see --verbose)".yellow()),
            Err(e) => println!("   {}", e.to_string().red()),
        }

        if i < subscriptions.len() - 1 {
            println!();
        }
    }

    Ok(())
}
