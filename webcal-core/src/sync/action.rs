use std::fmt;

use serde::{Deserialize, Serialize};

use crate::object::{CachedCalendarObject, DenormalizedObject};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ActionKind {
    Unchanged,
    ContentIdentical,
    Modified,
    Created,
    StaleForDeletion,
}

impl ActionKind {
    /// Whether applying this action writes to the object store.
    pub fn is_mutation(self) -> bool {
        matches!(
            self,
            ActionKind::Modified | ActionKind::Created | ActionKind::StaleForDeletion
        )
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActionKind::Unchanged => write!(f, "="),
            ActionKind::ContentIdentical => write!(f, "≈"),
            ActionKind::Modified => write!(f, "~"),
            ActionKind::Created => write!(f, "+"),
            ActionKind::StaleForDeletion => write!(f, "-"),
        }
    }
}

/// What to do with one UID.
#[derive(Debug, Clone, PartialEq)]
pub enum ReconciliationAction {
    /// Same etag as the cached copy.
    Unchanged { cached: CachedCalendarObject },
    /// Differs from the cached copy only in DTSTAMP.
    ContentIdentical {
        cached: CachedCalendarObject,
        remote: DenormalizedObject,
    },
    /// Rewritten in place, keeping the cached uri.
    Modified {
        cached: CachedCalendarObject,
        remote: DenormalizedObject,
    },
    /// Stored under a freshly generated uri.
    Created {
        uri: String,
        remote: DenormalizedObject,
    },
    /// Cached but no longer in the feed.
    StaleForDeletion { cached: CachedCalendarObject },
}

impl ReconciliationAction {
    pub fn kind(&self) -> ActionKind {
        match self {
            ReconciliationAction::Unchanged { .. } => ActionKind::Unchanged,
            ReconciliationAction::ContentIdentical { .. } => ActionKind::ContentIdentical,
            ReconciliationAction::Modified { .. } => ActionKind::Modified,
            ReconciliationAction::Created { .. } => ActionKind::Created,
            ReconciliationAction::StaleForDeletion { .. } => ActionKind::StaleForDeletion,
        }
    }

    pub fn uid(&self) -> &str {
        match self {
            ReconciliationAction::Unchanged { cached }
            | ReconciliationAction::ContentIdentical { cached, .. }
            | ReconciliationAction::Modified { cached, .. }
            | ReconciliationAction::StaleForDeletion { cached } => &cached.uid,
            ReconciliationAction::Created { remote, .. } => &remote.uid,
        }
    }

    /// Storage uri the action refers to.
    pub fn uri(&self) -> &str {
        match self {
            ReconciliationAction::Unchanged { cached }
            | ReconciliationAction::ContentIdentical { cached, .. }
            | ReconciliationAction::Modified { cached, .. }
            | ReconciliationAction::StaleForDeletion { cached } => &cached.uri,
            ReconciliationAction::Created { uri, .. } => uri,
        }
    }
}

impl fmt::Display for ReconciliationAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind(), self.uid())
    }
}
