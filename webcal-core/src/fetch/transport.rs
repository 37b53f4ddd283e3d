//! HTTP transport used to download feeds.
//!
//! The [`Transport`] trait is the seam between the sync engine and the network.
//! [`HttpTransport`] is the default implementation: a reqwest client with a
//! request timeout, a bounded redirect policy and the local-network-access
//! policy applied to the initial URL and to every redirect target.

use std::error::Error as StdError;
use std::fmt;
use std::net::IpAddr;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{ACCEPT, CONTENT_TYPE, USER_AGENT};
use reqwest::redirect;
use url::{Host, Url};

use crate::config::WebcalConfig;
use crate::error::{TransportError, WebcalError, WebcalResult};
use crate::fetch::Credentials;

const MAX_REDIRECTS: usize = 5;

/// A single GET request for a feed.
#[derive(Debug, Clone)]
pub struct FeedRequest {
    pub url: Url,
    pub credentials: Option<Credentials>,
    pub user_agent: String,
    pub accept: String,
}

/// The raw feed body and its `Content-Type` header.
#[derive(Debug, Clone)]
pub struct FeedResponse {
    pub body: String,
    pub content_type: Option<String>,
}

#[async_trait]
pub trait Transport: Send + Sync {
    async fn fetch(&self, request: &FeedRequest) -> Result<FeedResponse, TransportError>;
}

/// Raised from the redirect policy so the caller can tell it apart from
/// ordinary network failures.
#[derive(Debug)]
struct LocalAddressBlocked(String);

impl fmt::Display for LocalAddressBlocked {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "redirect to local address {} is not allowed", self.0)
    }
}

impl StdError for LocalAddressBlocked {}

pub struct HttpTransport {
    client: reqwest::Client,
    timeout: Duration,
    allow_local: bool,
}

impl HttpTransport {
    pub fn new(timeout: Duration, allow_local: bool) -> WebcalResult<Self> {
        let redirect_policy = redirect::Policy::custom(move |attempt| {
            if attempt.previous().len() >= MAX_REDIRECTS {
                return attempt.error("too many redirects");
            }
            if !allow_local && is_local_url(attempt.url()) {
                let target = attempt.url().to_string();
                return attempt.error(LocalAddressBlocked(target));
            }
            attempt.follow()
        });

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .redirect(redirect_policy)
            .build()
            .map_err(|e| WebcalError::Config(format!("Could not build HTTP client: {e}")))?;

        Ok(HttpTransport {
            client,
            timeout,
            allow_local,
        })
    }

    pub fn from_config(config: &WebcalConfig) -> WebcalResult<Self> {
        Self::new(
            Duration::from_secs(config.request_timeout_secs),
            config.allow_local_remote_servers,
        )
    }

    /// Refuse loopback/private targets unless local access is allowed.
    async fn check_policy(&self, url: &Url) -> Result<(), TransportError> {
        if self.allow_local {
            return Ok(());
        }
        if is_local_url(url) {
            return Err(TransportError::PolicyBlocked(url.to_string()));
        }

        if let Some(Host::Domain(domain)) = url.host() {
            let port = url.port_or_known_default().unwrap_or(443);
            let addrs = tokio::net::lookup_host((domain, port))
                .await
                .map_err(|e| TransportError::Network(format!("DNS lookup for {domain}: {e}")))?;

            for addr in addrs {
                if is_local_ip(addr.ip()) {
                    return Err(TransportError::PolicyBlocked(format!(
                        "{domain} resolves to {}",
                        addr.ip()
                    )));
                }
            }
        }

        Ok(())
    }

    fn map_error(&self, error: reqwest::Error) -> TransportError {
        if error.is_timeout() {
            return TransportError::Timeout(self.timeout.as_secs());
        }

        let mut source = error.source();
        while let Some(cause) = source {
            if let Some(blocked) = cause.downcast_ref::<LocalAddressBlocked>() {
                return TransportError::PolicyBlocked(blocked.0.clone());
            }
            source = cause.source();
        }

        TransportError::Network(error.to_string())
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn fetch(&self, request: &FeedRequest) -> Result<FeedResponse, TransportError> {
        self.check_policy(&request.url).await?;

        let mut builder = self
            .client
            .get(request.url.clone())
            .header(USER_AGENT, &request.user_agent)
            .header(ACCEPT, &request.accept);

        if let Some(credentials) = &request.credentials {
            builder = builder.basic_auth(&credentials.username, credentials.password.as_ref());
        }

        let response = builder.send().await.map_err(|e| self.map_error(e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Network(format!("HTTP {status}")));
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let body = response.text().await.map_err(|e| self.map_error(e))?;

        Ok(FeedResponse { body, content_type })
    }
}

fn is_local_url(url: &Url) -> bool {
    match url.host() {
        Some(Host::Domain(domain)) => {
            let domain = domain.trim_end_matches('.').to_ascii_lowercase();
            domain == "localhost" || domain.ends_with(".localhost")
        }
        Some(Host::Ipv4(ip)) => is_local_ip(IpAddr::V4(ip)),
        Some(Host::Ipv6(ip)) => is_local_ip(IpAddr::V6(ip)),
        None => true,
    }
}

fn is_local_ip(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            let [a, b, ..] = v4.octets();
            v4.is_loopback()
                || v4.is_private()
                || v4.is_link_local()
                || v4.is_unspecified()
                || v4.is_broadcast()
                // 100.64.0.0/10 carrier-grade NAT
                || (a == 100 && (b & 0xc0) == 64)
        }
        IpAddr::V6(v6) => {
            v6.is_loopback()
                || v6.is_unspecified()
                || v6.is_unique_local()
                || v6.is_unicast_link_local()
                || v6
                    .to_ipv4_mapped()
                    .is_some_and(|v4| is_local_ip(IpAddr::V4(v4)))
        }
    }
}
