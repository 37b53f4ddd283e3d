//! When to poll, and what to write back afterwards.

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::feed::Feed;
use crate::subscription::{RefreshInterval, Subscription, SubscriptionMutation};

/// Earliest time the next poll may run, if the subscription has an interval
/// and has been polled before.
pub fn next_due(subscription: &Subscription) -> Option<DateTime<Utc>> {
    let interval = subscription.refresh_interval.as_ref()?;
    let last = subscription.last_modified?;
    Some(
        last.checked_add_signed(interval.as_chrono())
            .unwrap_or(DateTime::<Utc>::MAX_UTC),
    )
}

/// Pre-poll gate.
pub fn is_due(subscription: &Subscription, now: DateTime<Utc>) -> bool {
    next_due(subscription).is_none_or(|due| now >= due)
}

/// The feed's suggested interval, if it has one that parses.
pub fn refresh_hint(feed: &Feed) -> Option<RefreshInterval> {
    let raw = feed.refresh_hint()?;
    match raw.parse() {
        Ok(interval) => Some(interval),
        Err(e) => {
            debug!("Ignoring refresh hint: {e}");
            None
        }
    }
}

/// Changes to commit after a successful poll. A hint is only staged when
/// the subscription has no interval yet.
pub fn stage_mutation(
    subscription: &Subscription,
    hint: Option<RefreshInterval>,
    now: DateTime<Utc>,
) -> SubscriptionMutation {
    SubscriptionMutation {
        refresh_interval: hint.filter(|_| subscription.refresh_interval.is_none()),
        last_modified: now,
    }
}
