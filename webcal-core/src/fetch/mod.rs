//! Feed download and content negotiation.
//!
//! [`FeedFetcher::fetch`] never fails across its boundary: every transport or
//! parse problem is logged and reported as `None` ("no data").

mod source;
mod transport;

use std::sync::Arc;

use tracing::{debug, warn};

pub use source::{Credentials, FeedSource, normalize_source, redact_userinfo};
pub use transport::{FeedRequest, FeedResponse, HttpTransport, Transport};

use crate::error::{TransportError, WebcalResult};
use crate::ics;
use crate::subscription::Subscription;

/// `Accept` header sent with every feed request.
pub const ACCEPT_HEADER: &str = "text/calendar, application/calendar+json, application/calendar+xml";

/// Wire format a feed was delivered in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentKind {
    ICalendar,
    Json,
    Xml,
}

impl ContentKind {
    /// Pick the parser from a `Content-Type` header. Only the primary MIME type
    /// is considered; anything unknown is treated as iCalendar text.
    pub fn from_content_type(header: Option<&str>) -> Self {
        let mime = header
            .and_then(|h| h.split(';').next())
            .map(|m| m.trim().to_ascii_lowercase())
            .unwrap_or_default();

        match mime.as_str() {
            "application/calendar+json" => ContentKind::Json,
            "application/calendar+xml" => ContentKind::Xml,
            _ => ContentKind::ICalendar,
        }
    }

    pub fn mime_type(self) -> &'static str {
        match self {
            ContentKind::ICalendar => "text/calendar",
            ContentKind::Json => "application/calendar+json",
            ContentKind::Xml => "application/calendar+xml",
        }
    }
}

/// A downloaded feed, re-serialized as iCalendar text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedFeed {
    pub canonical: String,
    pub kind: ContentKind,
}

/// Parse a response body in the given format and write it back out as
/// canonical iCalendar text.
pub fn canonicalize(body: &str, kind: ContentKind) -> WebcalResult<String> {
    let calendar = match kind {
        ContentKind::Json => ics::parse_jcal(body)?,
        ContentKind::Xml => ics::parse_xcal(body)?,
        ContentKind::ICalendar => ics::parse_calendar(body)?,
    };
    Ok(calendar.to_string())
}

pub struct FeedFetcher {
    transport: Arc<dyn Transport>,
    user_agent: String,
}

impl FeedFetcher {
    pub fn new(transport: Arc<dyn Transport>, user_agent: impl Into<String>) -> Self {
        FeedFetcher {
            transport,
            user_agent: user_agent.into(),
        }
    }

    pub async fn fetch(&self, subscription: &Subscription) -> Option<FetchedFeed> {
        let redacted = subscription.redacted_source();

        let source = match normalize_source(&subscription.source) {
            Ok(source) => source,
            Err(e) => {
                warn!(subscription_id = subscription.id, source = %redacted, "Skipping feed: {e}");
                return None;
            }
        };

        let request = FeedRequest {
            url: source.url,
            credentials: source.credentials,
            user_agent: self.user_agent.clone(),
            accept: ACCEPT_HEADER.to_string(),
        };

        let response = match self.transport.fetch(&request).await {
            Ok(response) => response,
            Err(TransportError::PolicyBlocked(target)) => {
                warn!(
                    subscription_id = subscription.id,
                    source = %redacted,
                    "Subscription source blocked by local network access policy: {target}"
                );
                return None;
            }
            Err(e) => {
                warn!(subscription_id = subscription.id, source = %redacted, "Feed fetch failed: {e}");
                return None;
            }
        };

        let kind = ContentKind::from_content_type(response.content_type.as_deref());
        debug!(
            subscription_id = subscription.id,
            source = %redacted,
            content_type = kind.mime_type(),
            bytes = response.body.len(),
            "Feed downloaded"
        );

        match canonicalize(&response.body, kind) {
            Ok(canonical) => Some(FetchedFeed { canonical, kind }),
            Err(e) => {
                warn!(subscription_id = subscription.id, source = %redacted, "Unreadable feed: {e}");
                None
            }
        }
    }
}
