//! Subscription records and their mutable metadata.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::fetch::redact_userinfo;

/// A per-subscription strip setting that distinguishes "never set" from an
/// explicit choice. Unset resolves to stripping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "Option<bool>", into = "Option<bool>")]
pub enum StripFlag {
    #[default]
    Unset,
    Strip,
    Keep,
}

impl StripFlag {
    pub fn resolve(self) -> bool {
        !matches!(self, StripFlag::Keep)
    }

    pub fn is_unset(&self) -> bool {
        matches!(self, StripFlag::Unset)
    }
}

impl From<Option<bool>> for StripFlag {
    fn from(value: Option<bool>) -> Self {
        match value {
            None => StripFlag::Unset,
            Some(true) => StripFlag::Strip,
            Some(false) => StripFlag::Keep,
        }
    }
}

impl From<StripFlag> for Option<bool> {
    fn from(flag: StripFlag) -> Self {
        match flag {
            StripFlag::Unset => None,
            StripFlag::Strip => Some(true),
            StripFlag::Keep => Some(false),
        }
    }
}

/// A validated ISO-8601 duration such as `PT1H` or `P1W`.
///
/// Keeps the original text so it is persisted exactly as written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RefreshInterval {
    raw: String,
    duration: Duration,
}

impl RefreshInterval {
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    pub fn as_chrono(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.duration).unwrap_or(chrono::Duration::MAX)
    }
}

impl FromStr for RefreshInterval {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let raw = value.trim();
        let parsed = iso8601::duration(raw)
            .map_err(|e| format!("'{raw}' is not an ISO-8601 duration: {e}"))?;

        Ok(RefreshInterval {
            raw: raw.to_string(),
            duration: parsed.into(),
        })
    }
}

impl TryFrom<String> for RefreshInterval {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<RefreshInterval> for String {
    fn from(interval: RefreshInterval) -> Self {
        interval.raw
    }
}

impl fmt::Display for RefreshInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// A calendar subscription owned by a principal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subscription {
    pub id: i64,
    pub principal_uri: String,
    pub uri: String,

    /// Remote feed URL; may embed credentials as userinfo.
    pub source: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,

    /// User-set or feed-suggested polling period. A user-set value is never
    /// replaced by a feed hint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_interval: Option<RefreshInterval>,

    /// Time of the last poll that reached the feed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "StripFlag::is_unset")]
    pub strip_todos: StripFlag,
    #[serde(default, skip_serializing_if = "StripFlag::is_unset")]
    pub strip_alarms: StripFlag,
    #[serde(default, skip_serializing_if = "StripFlag::is_unset")]
    pub strip_attachments: StripFlag,
}

impl Subscription {
    pub fn new(id: i64, principal_uri: &str, uri: &str, source: &str) -> Self {
        Subscription {
            id,
            principal_uri: principal_uri.to_string(),
            uri: uri.to_string(),
            source: source.to_string(),
            display_name: None,
            refresh_interval: None,
            last_modified: None,
            strip_todos: StripFlag::Unset,
            strip_alarms: StripFlag::Unset,
            strip_attachments: StripFlag::Unset,
        }
    }

    /// Source URL with any embedded credentials removed, for logs and display.
    pub fn redacted_source(&self) -> String {
        redact_userinfo(&self.source)
    }
}

/// Changes staged by a poll, committed in one store call.
#[derive(Debug, Clone, PartialEq)]
pub struct SubscriptionMutation {
    /// Feed-suggested interval; only staged when no interval is set.
    pub refresh_interval: Option<RefreshInterval>,
    pub last_modified: DateTime<Utc>,
}

impl SubscriptionMutation {
    pub fn apply_to(&self, subscription: &mut Subscription) {
        if let Some(interval) = &self.refresh_interval {
            subscription.refresh_interval = Some(interval.clone());
        }
        subscription.last_modified = Some(self.last_modified);
    }
}
