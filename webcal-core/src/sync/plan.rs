//! Classification of a feed against the cache, and applying the result.

use std::collections::{HashMap, HashSet};
use std::fmt;

use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{WebcalError, WebcalResult};
use crate::object::{CachedCalendarObject, RemoteCalendarObject, comparison_key, denormalize};
use crate::store::{CalendarObjectStore, ObjectWrite, StaleObject};
use crate::sync::{ActionKind, ReconciliationAction};

/// Counts of one poll's classifications.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollSummary {
    pub unchanged: usize,
    pub content_identical: usize,
    pub modified: usize,
    pub created: usize,
    pub purged: usize,
    /// Objects rejected as malformed.
    pub skipped: usize,
}

impl PollSummary {
    pub fn mutations(&self) -> usize {
        self.modified + self.created + self.purged
    }
}

impl fmt::Display for PollSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} created, {} modified, {} purged, {} unchanged",
            self.created,
            self.modified,
            self.purged,
            self.unchanged + self.content_identical
        )?;
        if self.skipped > 0 {
            write!(f, ", {} skipped", self.skipped)?;
        }
        Ok(())
    }
}

/// The full set of actions for one poll of one subscription.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconciliationPlan {
    pub subscription_id: i64,
    pub actions: Vec<ReconciliationAction>,
    pub skipped: usize,
}

impl ReconciliationPlan {
    /// Classify every remote object against the cached set.
    ///
    /// Remote objects are consumed in order. Each cached object that is
    /// matched by UID leaves the working set; whatever is left at the end
    /// is stale.
    pub fn build(
        subscription_id: i64,
        remote: impl IntoIterator<Item = RemoteCalendarObject>,
        cached: Vec<CachedCalendarObject>,
    ) -> Self {
        let mut actions = Vec::new();
        let mut skipped = 0;

        let mut local_remaining: HashMap<String, CachedCalendarObject> = HashMap::new();
        for object in cached {
            if let Some(previous) = local_remaining.insert(object.uid.clone(), object) {
                // a second cached copy of a uid is never matched
                warn!(uid = %previous.uid, uri = %previous.uri, "Duplicate cached object");
                actions.push(ReconciliationAction::StaleForDeletion { cached: previous });
            }
        }

        let mut seen: HashSet<String> = HashSet::new();
        for object in remote {
            if !seen.insert(object.uid.clone()) {
                warn!(uid = %object.uid, "Ignoring repeated UID in feed");
                continue;
            }

            let remote = match denormalize(&object) {
                Ok(remote) => remote,
                Err(error) => {
                    let error = WebcalError::InvalidObject {
                        uid: object.uid.clone(),
                        error,
                    };
                    warn!(uid = %object.uid, "Skipping object: {error}");
                    skipped += 1;
                    continue;
                }
            };

            let action = match local_remaining.remove(&remote.uid) {
                None => ReconciliationAction::Created {
                    uri: new_object_uri(),
                    remote,
                },
                Some(cached) if cached.etag == remote.etag => {
                    ReconciliationAction::Unchanged { cached }
                }
                Some(cached)
                    if comparison_key(&cached.calendar_data)
                        == comparison_key(&remote.calendar_data) =>
                {
                    ReconciliationAction::ContentIdentical { cached, remote }
                }
                Some(cached) => ReconciliationAction::Modified { cached, remote },
            };

            debug!(uid = %action.uid(), kind = ?action.kind(), "Classified");
            actions.push(action);
        }

        let mut stale: Vec<_> = local_remaining.into_values().collect();
        stale.sort_by_key(|c| c.id);
        actions.extend(
            stale
                .into_iter()
                .map(|cached| ReconciliationAction::StaleForDeletion { cached }),
        );

        ReconciliationPlan {
            subscription_id,
            actions,
            skipped,
        }
    }

    pub fn count(&self, kind: ActionKind) -> usize {
        self.actions.iter().filter(|a| a.kind() == kind).count()
    }

    pub fn has_mutations(&self) -> bool {
        self.actions.iter().any(|a| a.kind().is_mutation())
    }

    pub fn stale(&self) -> Vec<StaleObject> {
        self.actions
            .iter()
            .filter_map(|action| match action {
                ReconciliationAction::StaleForDeletion { cached } => Some(StaleObject {
                    id: cached.id,
                    uri: cached.uri.clone(),
                }),
                _ => None,
            })
            .collect()
    }

    pub fn summary(&self) -> PollSummary {
        PollSummary {
            unchanged: self.count(ActionKind::Unchanged),
            content_identical: self.count(ActionKind::ContentIdentical),
            modified: self.count(ActionKind::Modified),
            created: self.count(ActionKind::Created),
            purged: self.count(ActionKind::StaleForDeletion),
            skipped: self.skipped,
        }
    }

    /// Issue the plan's writes: creates and updates in order, then all
    /// stale objects in one purge call.
    pub async fn apply(&self, store: &dyn CalendarObjectStore) -> WebcalResult<PollSummary> {
        let writes: Vec<ObjectWrite<'_>> = self
            .actions
            .iter()
            .filter_map(|action| match action {
                ReconciliationAction::Created { uri, remote } => Some(ObjectWrite::Create {
                    uri: uri.as_str(),
                    object: remote,
                }),
                ReconciliationAction::Modified { cached, remote } => Some(ObjectWrite::Update {
                    uri: &cached.uri,
                    object: remote,
                }),
                ReconciliationAction::Unchanged { .. }
                | ReconciliationAction::ContentIdentical { .. }
                | ReconciliationAction::StaleForDeletion { .. } => None,
            })
            .collect();
        if !writes.is_empty() {
            store.write_batch(self.subscription_id, &writes).await?;
        }

        let stale = self.stale();
        if !stale.is_empty() {
            store.purge_batch(self.subscription_id, &stale).await?;
        }

        Ok(self.summary())
    }
}

fn new_object_uri() -> String {
    format!("{}.ics", Uuid::new_v4())
}
