use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::Client;

use crate::error::{MjError, Result};

const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";
const IMAGE_ACCEPT: &str = "image/webp,image/apng,image/svg+xml,image/*,*/*;q=0.8";
const ACCEPT_LANGUAGE: &str = "zh-CN,zh;q=0.9,en;q=0.8";

/// Timeout tiers applied to one logical operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    /// Whole-request deadline.
    pub total: Duration,
    /// TCP/TLS connect deadline.
    pub connect: Duration,
    /// Deadline between two body reads.
    pub read: Duration,
}

impl Timeouts {
    /// Build a tier from whole seconds.
    pub const fn from_secs(total: u64, connect: u64, read: u64) -> Self {
        Self {
            total: Duration::from_secs(total),
            connect: Duration::from_secs(connect),
            read: Duration::from_secs(read),
        }
    }

    /// Submit and poll requests.
    pub const fn api() -> Self {
        Self::from_secs(300, 30, 60)
    }

    /// The standard direct image download.
    pub const fn download() -> Self {
        Self::from_secs(120, 20, 30)
    }

    /// The relaxed-TLS fallback download.
    pub const fn fallback() -> Self {
        Self::from_secs(180, 30, 60)
    }

    /// Downloads routed through a proxy.
    pub const fn proxied() -> Self {
        Self::from_secs(300, 60, 120)
    }
}

impl Default for Timeouts {
    fn default() -> Self {
        Self::api()
    }
}

/// Certificate checking applied to a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TlsPolicy {
    /// Verify certificates and hostnames.
    Verify,
    /// Accept invalid certificates.
    SkipVerify,
    /// Accept invalid certificates and mismatched hostnames.
    Relaxed,
}

/// Which fixed header set a download session sends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderProfile {
    /// Full browser fingerprint including `Sec-Fetch-*`.
    Browser,
    /// User agent, accept and language only.
    Short,
    /// Browser basics plus cache busting, used through proxies.
    NoCache,
}

impl HeaderProfile {
    /// Build the header map of this profile.
    pub fn headers(self) -> HeaderMap {
        let mut pairs: Vec<(&'static str, &'static str)> = vec![
            ("user-agent", USER_AGENT),
            ("accept", IMAGE_ACCEPT),
            ("accept-language", ACCEPT_LANGUAGE),
            ("connection", "keep-alive"),
        ];
        match self {
            HeaderProfile::Browser => pairs.extend([
                ("upgrade-insecure-requests", "1"),
                ("sec-fetch-dest", "image"),
                ("sec-fetch-mode", "no-cors"),
                ("sec-fetch-site", "cross-site"),
            ]),
            HeaderProfile::Short => {}
            HeaderProfile::NoCache => {
                pairs.extend([("cache-control", "no-cache"), ("pragma", "no-cache")])
            }
        }

        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(
                HeaderName::from_static(name),
                HeaderValue::from_static(value),
            );
        }
        map
    }
}

/// Configuration for a short-lived HTTP client.
///
/// A session is only a recipe: [`HttpSession::client`] builds a fresh
/// `reqwest::Client` every time it is called, so no connection outlives the
/// operation that opened it.
#[derive(Debug, Clone)]
pub struct HttpSession {
    timeouts: Timeouts,
    tls: TlsPolicy,
    proxy: Option<String>,
    headers: HeaderMap,
}

impl HttpSession {
    /// Session for authenticated JSON API calls.
    pub fn api(api_key: &str, timeouts: Timeouts) -> Result<Self> {
        let mut headers = HeaderMap::new();
        let bearer = HeaderValue::from_str(&format!("Bearer {}", api_key))
            .map_err(|e| MjError::Config(format!("API key is not a valid header value: {}", e)))?;
        headers.insert(AUTHORIZATION, bearer);
        headers.insert(
            CONTENT_TYPE,
            HeaderValue::from_static("application/json; charset=utf-8"),
        );
        Ok(Self {
            timeouts,
            tls: TlsPolicy::Verify,
            proxy: None,
            headers,
        })
    }

    /// Session for image downloads with one of the fixed header profiles.
    pub fn download(profile: HeaderProfile, timeouts: Timeouts) -> Self {
        Self {
            timeouts,
            tls: TlsPolicy::Verify,
            proxy: None,
            headers: profile.headers(),
        }
    }

    /// Replace the certificate policy.
    pub fn with_tls(mut self, tls: TlsPolicy) -> Self {
        self.tls = tls;
        self
    }

    /// Route every request through the given proxy URL.
    pub fn with_proxy(mut self, proxy: impl Into<String>) -> Self {
        self.proxy = Some(proxy.into());
        self
    }

    /// Timeout tier applied to every client.
    pub fn timeouts(&self) -> Timeouts {
        self.timeouts
    }

    /// Certificate policy applied to every client.
    pub fn tls(&self) -> TlsPolicy {
        self.tls
    }

    /// Proxy URL, or `None` for a direct connection.
    pub fn proxy(&self) -> Option<&str> {
        self.proxy.as_deref()
    }

    /// Default headers attached to every request.
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Build a new client from this recipe.
    pub fn client(&self) -> Result<Client> {
        let mut builder = Client::builder()
            .timeout(self.timeouts.total)
            .connect_timeout(self.timeouts.connect)
            .read_timeout(self.timeouts.read)
            .default_headers(self.headers.clone());

        builder = match self.tls {
            TlsPolicy::Verify => builder,
            TlsPolicy::SkipVerify => builder.danger_accept_invalid_certs(true),
            TlsPolicy::Relaxed => builder
                .danger_accept_invalid_certs(true)
                .danger_accept_invalid_hostnames(true),
        };

        builder = match &self.proxy {
            Some(url) => {
                let proxy = reqwest::Proxy::all(url).map_err(|e| MjError::Network {
                    context: format!("Invalid proxy URL {}", url),
                    source: e,
                })?;
                builder.proxy(proxy)
            }
            // Ignore ambient proxy variables; proxy use is decided by the strategy chain.
            None => builder.no_proxy(),
        };

        builder.build().map_err(|e| MjError::Network {
            context: "Failed to build HTTP client".into(),
            source: e,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_session_headers() {
        let session = HttpSession::api("secret", Timeouts::api()).unwrap();
        assert_eq!(session.headers()[AUTHORIZATION], "Bearer secret");
        assert_eq!(
            session.headers()[CONTENT_TYPE],
            "application/json; charset=utf-8"
        );
        assert_eq!(session.tls(), TlsPolicy::Verify);
        assert!(session.proxy().is_none());
    }

    #[test]
    fn test_api_key_with_newline_is_rejected() {
        let err = HttpSession::api("bad\nkey", Timeouts::api()).unwrap_err();
        assert!(matches!(err, MjError::Config(_)));
    }

    #[test]
    fn test_header_profiles() {
        let browser = HeaderProfile::Browser.headers();
        assert_eq!(browser["sec-fetch-dest"], "image");
        assert!(browser.contains_key("user-agent"));

        let short = HeaderProfile::Short.headers();
        assert_eq!(short.len(), 4);
        assert!(!short.contains_key("sec-fetch-dest"));

        let no_cache = HeaderProfile::NoCache.headers();
        assert_eq!(no_cache["pragma"], "no-cache");
    }

    #[test]
    fn test_timeout_tiers() {
        assert_eq!(Timeouts::api().total, Duration::from_secs(300));
        assert_eq!(Timeouts::download().connect, Duration::from_secs(20));
        assert_eq!(Timeouts::fallback().read, Duration::from_secs(60));
        assert_eq!(Timeouts::proxied().connect, Duration::from_secs(60));
    }

    #[test]
    fn test_client_builds_for_every_policy() {
        for tls in [TlsPolicy::Verify, TlsPolicy::SkipVerify, TlsPolicy::Relaxed] {
            let session = HttpSession::download(HeaderProfile::Short, Timeouts::download())
                .with_tls(tls);
            assert!(session.client().is_ok());
        }
    }

    #[test]
    fn test_proxied_client_builds() {
        let session = HttpSession::download(HeaderProfile::NoCache, Timeouts::proxied())
            .with_proxy("http://127.0.0.1:7890");
        assert_eq!(session.proxy(), Some("http://127.0.0.1:7890"));
        assert!(session.client().is_ok());
    }
}
