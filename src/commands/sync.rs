use std::sync::Arc;

use anyhow::Result;
use owo_colors::OwoColorize;
use tokio_util::sync::CancellationToken;
use webcal_core::store::DirectoryStore;
use webcal_core::sync::PollSummary;
use webcal_core::{PollOutcome, PollReport, Poller, Subscription, WebcalConfig};

use crate::render::Render;
use crate::utils::tui;

/// Poll `selected` unconditionally, or every subscription that is due.
pub async fn run(
    config: &WebcalConfig,
    store: DirectoryStore,
    selected: Option<Subscription>,
) -> Result<()> {
    let store = Arc::new(store);
    let poller = Poller::from_config(config, store.clone(), store.clone())?;

    let cancel = CancellationToken::new();
    cancel_on_ctrl_c(cancel.clone());

    let mut reports = match selected {
        Some(mut subscription) => {
            // naming a subscription overrides its refresh interval
            subscription.last_modified = None;

            let spinner = tui::create_spinner(subscription.render());
            let result = poller.poll(&subscription, &cancel).await;
            spinner.finish_and_clear();
            vec![PollReport {
                subscription,
                result,
            }]
        }
        None => {
            let spinner = tui::create_spinner("Syncing subscriptions".to_string());
            let reports = poller.poll_due(&cancel).await?;
            spinner.finish_and_clear();
            reports
        }
    };
    reports.sort_by(|a, b| a.subscription.uri.cmp(&b.subscription.uri));

    let mut total = PollSummary::default();
    for (i, report) in reports.iter().enumerate() {
        println!("{}", report.subscription.render());

        match &report.result {
            Ok(outcome) => {
                println!("{}", outcome.render());
                if let PollOutcome::Synced(summary) = outcome {
                    total.created += summary.created;
                    total.modified += summary.modified;
                    total.purged += summary.purged;
                    total.unchanged += summary.unchanged + summary.content_identical;
                    total.skipped += summary.skipped;
                }
            }
            Err(e) => println!("   {}", e.to_string().red()),
        }

        if i < reports.len() - 1 {
            println!();
        }
    }

    if total.mutations() > 0 {
        println!("\nSynced: {}", total);
    }

    if cancel.is_cancelled() {
        anyhow::bail!("Sync interrupted");
    }

    Ok(())
}

/// Cancel outstanding polls on the first Ctrl-C. Polls that are already
/// writing finish their writes.
fn cancel_on_ctrl_c(cancel: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel.cancel();
        }
    });
}
