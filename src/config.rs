use std::time::Duration;

use crate::error::{MjError, Result};
use crate::http::Timeouts;

/// Environment variable holding the API base URL for [`MjConfig::from_env`].
pub const API_URL_ENV: &str = "MJ_API_URL";
/// Environment variable holding the bearer token for [`MjConfig::from_env`].
pub const API_KEY_ENV: &str = "MJ_API_KEY";

/// How the client picks the proxy it downloads through.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ProxyMode {
    /// Run proxy detection once when the client is created.
    #[default]
    Auto,
    /// Never use a detected proxy; fallback proxies are still tried.
    Disabled,
    /// Use this proxy URL without detection.
    Fixed(String),
}

/// Settings for the image download strategy chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadConfig {
    /// Attempts made by the standard direct strategy.
    pub retries: u32,
    /// Base unit of the exponential backoff between standard attempts.
    pub backoff_unit: Duration,
    /// Pause between two strategies.
    pub strategy_pause: Duration,
    /// Proxies tried last when none was detected.
    pub fallback_proxies: Vec<String>,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            retries: 3,
            backoff_unit: Duration::from_secs(1),
            strategy_pause: Duration::from_secs(1),
            fallback_proxies: vec!["http://127.0.0.1:33210".to_string()],
        }
    }
}

/// Configuration for [`MjClient`](crate::MjClient).
///
/// Use [`MjConfig::builder()`] or [`MjConfig::from_env()`].
#[derive(Debug, Clone)]
pub struct MjConfig {
    /// Base URL of the trigger API, without trailing slash.
    pub api_url: String,
    /// Bearer token sent with every API request.
    pub api_key: String,
    /// Delay between two status polls.
    pub poll_interval: Duration,
    /// Upper bound on polling one task. `None` polls until a terminal state.
    pub max_wait: Option<Duration>,
    /// Timeouts for submit and poll requests.
    pub api_timeouts: Timeouts,
    pub download: DownloadConfig,
    pub proxy: ProxyMode,
}

impl MjConfig {
    /// Start building a config with the builder pattern.
    pub fn builder() -> MjConfigBuilder {
        MjConfigBuilder::default()
    }

    /// Read `MJ_API_URL` and `MJ_API_KEY` from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let api_url = lookup(API_URL_ENV)
            .ok_or_else(|| MjError::Config(format!("{} is not set", API_URL_ENV)))?;
        let api_key = lookup(API_KEY_ENV)
            .ok_or_else(|| MjError::Config(format!("{} is not set", API_KEY_ENV)))?;
        Self::builder()
            .with_api_url(api_url)
            .with_api_key(api_key)
            .build()
    }
}

/// Builder for [`MjConfig`].
///
/// ```
/// use midjourney_rs::{MjConfig, ProxyMode, Timeouts};
/// use std::time::Duration;
///
/// let config = MjConfig::builder()
///     .with_api_url("https://mj.example.com/")
///     .with_api_key("sk-test")
///     .with_poll_interval(Duration::from_secs(2))
///     .with_api_timeouts(Timeouts::from_secs(60, 10, 20))
///     .with_proxy_mode(ProxyMode::Disabled)
///     .build()
///     .unwrap();
/// assert_eq!(config.api_url, "https://mj.example.com");
/// assert_eq!(config.poll_interval, Duration::from_secs(2));
/// assert_eq!(config.proxy, ProxyMode::Disabled);
/// ```
#[derive(Debug, Clone)]
pub struct MjConfigBuilder {
    config: MjConfig,
}

impl Default for MjConfigBuilder {
    fn default() -> Self {
        Self {
            config: MjConfig {
                api_url: String::new(),
                api_key: String::new(),
                poll_interval: Duration::from_secs(5),
                max_wait: None,
                api_timeouts: Timeouts::api(),
                download: DownloadConfig::default(),
                proxy: ProxyMode::Auto,
            },
        }
    }
}

impl MjConfigBuilder {
    /// Base URL of the trigger API. Trailing slashes are trimmed.
    pub fn with_api_url(mut self, url: impl Into<String>) -> Self {
        self.config.api_url = url.into().trim_end_matches('/').to_string();
        self
    }

    /// Bearer token sent with every API request.
    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.config.api_key = key.into();
        self
    }

    /// Sleep between two status requests.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.config.poll_interval = interval;
        self
    }

    /// Give up polling a task after this long.
    pub fn with_max_wait(mut self, max_wait: Duration) -> Self {
        self.config.max_wait = Some(max_wait);
        self
    }

    /// Timeouts for submit and status calls.
    pub fn with_api_timeouts(mut self, timeouts: Timeouts) -> Self {
        self.config.api_timeouts = timeouts;
        self
    }

    /// Retry, backoff and fallback settings of the download chain.
    pub fn with_download(mut self, download: DownloadConfig) -> Self {
        self.config.download = download;
        self
    }

    /// How the client picks its download proxy.
    pub fn with_proxy_mode(mut self, mode: ProxyMode) -> Self {
        self.config.proxy = mode;
        self
    }

    /// Validate and build the final [`MjConfig`].
    pub fn build(self) -> Result<MjConfig> {
        let config = self.config;
        if config.api_url.trim().is_empty() {
            return Err(MjError::Config("api_url must not be empty".into()));
        }
        if config.api_key.trim().is_empty() {
            return Err(MjError::Config("api_key must not be empty".into()));
        }
        if config.download.retries == 0 {
            return Err(MjError::Config("download retries must be at least 1".into()));
        }
        Ok(config)
    }
}
