//! Per-subscription stripping of to-dos, alarms and attachments.

use crate::object::{ComponentType, RemoteCalendarObject};
use crate::subscription::Subscription;

/// Resolved strip flags of one subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObjectFilter {
    pub strip_todos: bool,
    pub strip_alarms: bool,
    pub strip_attachments: bool,
}

impl ObjectFilter {
    pub fn for_subscription(subscription: &Subscription) -> Self {
        ObjectFilter {
            strip_todos: subscription.strip_todos.resolve(),
            strip_alarms: subscription.strip_alarms.resolve(),
            strip_attachments: subscription.strip_attachments.resolve(),
        }
    }

    /// Returns `None` when the object is dropped. UID and component type are
    /// never changed.
    pub fn apply(&self, mut object: RemoteCalendarObject) -> Option<RemoteCalendarObject> {
        if self.strip_todos && object.component_type == ComponentType::Todo {
            return None;
        }

        for component in object
            .calendar
            .components
            .iter_mut()
            .filter(|c| !c.is("VTIMEZONE"))
        {
            if self.strip_alarms {
                component.remove_components("VALARM");
            }
            if self.strip_attachments {
                component.remove_props_recursive("ATTACH");
            }
        }

        Some(object)
    }
}
