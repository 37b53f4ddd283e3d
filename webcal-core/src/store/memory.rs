//! In-process store, used for dry runs and tests.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;

use crate::error::{WebcalError, WebcalResult};
use crate::object::{CachedCalendarObject, DenormalizedObject};
use crate::store::{CalendarObjectStore, StaleObject, SubscriptionStore};
use crate::subscription::{Subscription, SubscriptionMutation};

#[derive(Default)]
struct MemoryState {
    subscriptions: BTreeMap<i64, Subscription>,
    objects: BTreeMap<i64, Vec<CachedCalendarObject>>,
    next_object_id: i64,
    object_mutations: usize,
    subscription_mutations: usize,
}

#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> WebcalResult<MutexGuard<'_, MemoryState>> {
        self.state
            .lock()
            .map_err(|_| WebcalError::Store("memory store lock poisoned".into()))
    }

    pub fn insert_subscription(&self, subscription: Subscription) -> WebcalResult<()> {
        self.state()?
            .subscriptions
            .insert(subscription.id, subscription);
        Ok(())
    }

    /// Seed a cached object without counting it as a mutation.
    pub fn insert_object(
        &self,
        subscription_id: i64,
        object: CachedCalendarObject,
    ) -> WebcalResult<()> {
        let mut state = self.state()?;
        state.next_object_id = state.next_object_id.max(object.id + 1);
        state.objects.entry(subscription_id).or_default().push(object);
        Ok(())
    }

    pub fn subscription(&self, subscription_id: i64) -> WebcalResult<Subscription> {
        self.state()?
            .subscriptions
            .get(&subscription_id)
            .cloned()
            .ok_or_else(|| WebcalError::SubscriptionNotFound(subscription_id.to_string()))
    }

    pub fn objects(&self, subscription_id: i64) -> WebcalResult<Vec<CachedCalendarObject>> {
        Ok(self
            .state()?
            .objects
            .get(&subscription_id)
            .cloned()
            .unwrap_or_default())
    }

    /// Number of create, update and purge calls so far.
    pub fn object_mutations(&self) -> WebcalResult<usize> {
        Ok(self.state()?.object_mutations)
    }

    pub fn subscription_mutations(&self) -> WebcalResult<usize> {
        Ok(self.state()?.subscription_mutations)
    }
}

#[async_trait]
impl SubscriptionStore for MemoryStore {
    async fn list_due(&self) -> WebcalResult<Vec<Subscription>> {
        Ok(self.state()?.subscriptions.values().cloned().collect())
    }

    async fn apply_mutation(
        &self,
        subscription_id: i64,
        mutation: &SubscriptionMutation,
    ) -> WebcalResult<()> {
        let mut state = self.state()?;
        let subscription = state
            .subscriptions
            .get_mut(&subscription_id)
            .ok_or_else(|| WebcalError::SubscriptionNotFound(subscription_id.to_string()))?;
        mutation.apply_to(subscription);
        state.subscription_mutations += 1;
        Ok(())
    }
}

#[async_trait]
impl CalendarObjectStore for MemoryStore {
    async fn list_for_subscription(
        &self,
        subscription_id: i64,
    ) -> WebcalResult<Vec<CachedCalendarObject>> {
        self.objects(subscription_id)
    }

    async fn create(
        &self,
        subscription_id: i64,
        uri: &str,
        object: &DenormalizedObject,
    ) -> WebcalResult<()> {
        let mut state = self.state()?;
        let id = state.next_object_id;

        let objects = state.objects.entry(subscription_id).or_default();
        if objects.iter().any(|o| o.uid == object.uid || o.uri == uri) {
            return Err(WebcalError::Store(format!(
                "object '{}' already exists in subscription {subscription_id}",
                object.uid
            )));
        }
        objects.push(CachedCalendarObject::from_denormalized(id, uri, object));

        state.next_object_id += 1;
        state.object_mutations += 1;
        Ok(())
    }

    async fn update(
        &self,
        subscription_id: i64,
        uri: &str,
        object: &DenormalizedObject,
    ) -> WebcalResult<()> {
        let mut state = self.state()?;
        let cached = state
            .objects
            .get_mut(&subscription_id)
            .and_then(|objects| objects.iter_mut().find(|o| o.uri == uri))
            .ok_or_else(|| WebcalError::Store(format!("no object at '{uri}'")))?;

        *cached = CachedCalendarObject::from_denormalized(cached.id, uri, object);
        state.object_mutations += 1;
        Ok(())
    }

    async fn purge_batch(&self, subscription_id: i64, stale: &[StaleObject]) -> WebcalResult<()> {
        let mut state = self.state()?;
        if let Some(objects) = state.objects.get_mut(&subscription_id) {
            objects.retain(|o| !stale.iter().any(|s| s.id == o.id && s.uri == o.uri));
        }
        state.object_mutations += 1;
        Ok(())
    }
}
