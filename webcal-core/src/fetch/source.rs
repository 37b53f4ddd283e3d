//! Subscription source URL normalization.

use std::fmt;

use url::Url;

use crate::error::{WebcalError, WebcalResult};

/// Basic-auth credentials extracted from a source URL's userinfo.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: Option<String>,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("<hidden>")
    }
}

/// A request-ready feed location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedSource {
    pub url: Url,
    pub credentials: Option<Credentials>,
}

/// Normalize a subscription source into a request URL plus credentials.
///
/// - `webcal://`, `webcals://`, `https://` and scheme-less sources become `https`;
///   only an explicit `http://` stays plain HTTP.
/// - Userinfo is removed from the URL and returned as credentials.
/// - The result must have a host.
pub fn normalize_source(source: &str) -> WebcalResult<FeedSource> {
    let source = source.trim();
    let (scheme, rest) = match source.split_once("://") {
        Some((scheme, rest)) => (scheme.to_ascii_lowercase(), rest),
        None => (String::new(), source),
    };
    let scheme = if scheme == "http" { "http" } else { "https" };

    let mut url = Url::parse(&format!("{scheme}://{rest}"))
        .map_err(|e| WebcalError::InvalidSource(e.to_string()))?;

    if url.host_str().is_none_or(str::is_empty) {
        return Err(WebcalError::InvalidSource(format!(
            "'{}' has no host",
            redact_userinfo(source)
        )));
    }

    let credentials = if url.username().is_empty() {
        None
    } else {
        Some(Credentials {
            username: decode(url.username()),
            password: url.password().map(decode),
        })
    };

    // Cannot fail: the URL has a host
    let _ = url.set_username("");
    let _ = url.set_password(None);

    Ok(FeedSource { url, credentials })
}

fn decode(component: &str) -> String {
    urlencoding::decode(component)
        .map(|s| s.into_owned())
        .unwrap_or_else(|_| component.to_string())
}

/// Remove the userinfo part (`user:pass@`) from a URL-like string.
pub fn redact_userinfo(source: &str) -> String {
    let Some((scheme, rest)) = source.split_once("://") else {
        return source.to_string();
    };
    let authority_end = rest.find(['/', '?', '#']).unwrap_or(rest.len());
    match rest[..authority_end].rfind('@') {
        Some(at) => format!("{scheme}://{}", &rest[at + 1..]),
        None => source.to_string(),
    }
}
