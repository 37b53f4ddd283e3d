//! Storage collaborators for subscriptions and cached calendar objects.
//!
//! The sync engine only talks to the traits below. Each call must be atomic
//! on its own; a purge is atomic as a batch.

mod directory;
mod memory;

use async_trait::async_trait;

pub use directory::DirectoryStore;
pub use memory::MemoryStore;

use crate::error::WebcalResult;
use crate::object::{CachedCalendarObject, DenormalizedObject};
use crate::subscription::{Subscription, SubscriptionMutation};

/// A cached object scheduled for deletion, addressed by id and uri together.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaleObject {
    pub id: i64,
    pub uri: String,
}

/// A create or update issued by a reconciliation plan.
#[derive(Debug, Clone, Copy)]
pub enum ObjectWrite<'a> {
    Create {
        uri: &'a str,
        object: &'a DenormalizedObject,
    },
    Update {
        uri: &'a str,
        object: &'a DenormalizedObject,
    },
}

#[async_trait]
pub trait SubscriptionStore: Send + Sync {
    /// Subscriptions to consider for polling. The refresh gate still decides
    /// whether each one is actually fetched.
    async fn list_due(&self) -> WebcalResult<Vec<Subscription>>;

    async fn apply_mutation(
        &self,
        subscription_id: i64,
        mutation: &SubscriptionMutation,
    ) -> WebcalResult<()>;
}

#[async_trait]
pub trait CalendarObjectStore: Send + Sync {
    async fn list_for_subscription(
        &self,
        subscription_id: i64,
    ) -> WebcalResult<Vec<CachedCalendarObject>>;

    async fn create(
        &self,
        subscription_id: i64,
        uri: &str,
        object: &DenormalizedObject,
    ) -> WebcalResult<()>;

    async fn update(
        &self,
        subscription_id: i64,
        uri: &str,
        object: &DenormalizedObject,
    ) -> WebcalResult<()>;

    async fn purge_batch(&self, subscription_id: i64, stale: &[StaleObject]) -> WebcalResult<()>;

    /// Issue `writes` in order, one call each. Stores that can resolve a
    /// subscription's storage once for the whole batch override this.
    async fn write_batch(
        &self,
        subscription_id: i64,
        writes: &[ObjectWrite<'_>],
    ) -> WebcalResult<()> {
        for write in writes {
            match *write {
                ObjectWrite::Create { uri, object } => {
                    self.create(subscription_id, uri, object).await?
                }
                ObjectWrite::Update { uri, object } => {
                    self.update(subscription_id, uri, object).await?
                }
            }
        }
        Ok(())
    }
}
