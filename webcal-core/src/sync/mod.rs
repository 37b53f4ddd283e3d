//! Reconciliation of a feed with the cached objects of its subscription.

mod action;
mod plan;

pub use action::{ActionKind, ReconciliationAction};
pub use plan::{PollSummary, ReconciliationPlan};
