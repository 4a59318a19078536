use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;

use crate::config::DownloadConfig;
use crate::error::{MjError, Result};
use crate::http::{HeaderProfile, HttpSession, Timeouts, TlsPolicy};
use crate::proxy::ProxyConfig;
use crate::types::DecodedImage;

/// Something that turns an image URL into decoded pixels.
pub trait ImageSource: Send + Sync {
    fn fetch(&self, url: &str) -> impl Future<Output = Result<DecodedImage>> + Send;
}

type AttemptFn = dyn Fn(String) -> BoxFuture<'static, Result<Vec<u8>>> + Send + Sync;

/// One named way of fetching image bytes.
#[derive(Clone)]
pub struct DownloadStrategy {
    name: String,
    attempt: Arc<AttemptFn>,
}

impl fmt::Debug for DownloadStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DownloadStrategy")
            .field("name", &self.name)
            .finish()
    }
}

impl DownloadStrategy {
    /// Wrap an async function taking the URL.
    pub fn new<F, Fut>(name: impl Into<String>, attempt: F) -> Self
    where
        F: Fn(String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Vec<u8>>> + Send + 'static,
    {
        Self {
            name: name.into(),
            attempt: Arc::new(move |url: String| -> BoxFuture<'static, Result<Vec<u8>>> {
                Box::pin(attempt(url))
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn attempt(&self, url: &str) -> Result<Vec<u8>> {
        (self.attempt)(url.to_string()).await
    }

    /// Download through `proxy` with relaxed TLS and cache-busting headers.
    pub fn proxied(proxy: &str) -> Self {
        let session = HttpSession::download(HeaderProfile::NoCache, Timeouts::proxied())
            .with_tls(TlsPolicy::Relaxed)
            .with_proxy(proxy);
        Self::new(format!("proxy({})", proxy), move |url| {
            let session = session.clone();
            async move { fetch_bytes(&session, &url).await }
        })
    }

    /// Direct download with browser headers and certificate checks off,
    /// retried with exponential backoff (`backoff_unit * 2^attempt`).
    pub fn standard(retries: u32, backoff_unit: Duration) -> Self {
        let session = HttpSession::download(HeaderProfile::Browser, Timeouts::download())
            .with_tls(TlsPolicy::SkipVerify);
        Self::new("standard", move |url| {
            let session = session.clone();
            async move { fetch_with_retries(&session, &url, retries, backoff_unit).await }
        })
    }

    /// Direct download with relaxed TLS and a short header set.
    pub fn fallback() -> Self {
        let session = HttpSession::download(HeaderProfile::Short, Timeouts::fallback())
            .with_tls(TlsPolicy::Relaxed);
        Self::new("fallback", move |url| {
            let session = session.clone();
            async move { fetch_bytes(&session, &url).await }
        })
    }
}

/// Fetches result images by trying each [`DownloadStrategy`] in order.
#[derive(Debug, Clone)]
pub struct AssetDownloader {
    strategies: Vec<DownloadStrategy>,
    pause: Duration,
}

impl AssetDownloader {
    /// Use an explicit strategy chain.
    pub fn new(strategies: Vec<DownloadStrategy>, pause: Duration) -> Self {
        Self { strategies, pause }
    }

    /// Build the standard chain:
    ///
    /// 1. the detected proxy, if any
    /// 2. `standard` direct download with retries
    /// 3. `fallback` relaxed-TLS direct download
    /// 4. each configured fallback proxy, only when nothing was detected
    pub fn from_config(config: &DownloadConfig, proxy: Option<&ProxyConfig>) -> Self {
        let mut strategies = Vec::new();
        if let Some(proxy) = proxy {
            strategies.push(DownloadStrategy::proxied(&proxy.url));
        }
        strategies.push(DownloadStrategy::standard(config.retries, config.backoff_unit));
        strategies.push(DownloadStrategy::fallback());
        if proxy.is_none() {
            for fallback in &config.fallback_proxies {
                strategies.push(DownloadStrategy::proxied(fallback));
            }
        }
        Self::new(strategies, config.strategy_pause)
    }

    pub fn strategies(&self) -> &[DownloadStrategy] {
        &self.strategies
    }

    pub fn strategy_names(&self) -> Vec<&str> {
        self.strategies.iter().map(DownloadStrategy::name).collect()
    }

    /// Fetch and decode `url`. Fails with [`MjError::DownloadExhausted`]
    /// once every strategy has failed.
    pub async fn download(&self, url: &str) -> Result<DecodedImage> {
        let mut last_error = None;
        for (i, strategy) in self.strategies.iter().enumerate() {
            if i > 0 && !self.pause.is_zero() {
                tokio::time::sleep(self.pause).await;
            }
            tracing::info!(strategy = strategy.name(), %url, "Trying download strategy");
            let result = strategy
                .attempt(url)
                .await
                .and_then(|bytes| DecodedImage::decode(&bytes));
            match result {
                Ok(image) => {
                    tracing::info!(
                        strategy = strategy.name(),
                        width = image.width,
                        height = image.height,
                        "Download succeeded"
                    );
                    return Ok(image);
                }
                Err(e) => {
                    tracing::warn!(strategy = strategy.name(), error = %e, "Download strategy failed");
                    last_error = Some(e);
                }
            }
        }

        let last = last_error
            .unwrap_or_else(|| MjError::InvalidInput("no download strategies configured".into()));
        tracing::error!(%url, error = %last, "All download strategies failed");
        Err(MjError::DownloadExhausted {
            url: url.to_string(),
            attempts: self.strategies.len(),
            last: Box::new(last),
        })
    }
}

impl ImageSource for AssetDownloader {
    async fn fetch(&self, url: &str) -> Result<DecodedImage> {
        self.download(url).await
    }
}

async fn fetch_with_retries(
    session: &HttpSession,
    url: &str,
    retries: u32,
    backoff_unit: Duration,
) -> Result<Vec<u8>> {
    retry_with_backoff(retries, backoff_unit, || fetch_bytes(session, url)).await
}

/// Run `op` up to `retries` times (at least once), sleeping
/// `backoff_unit * 2^n` after the n-th failure. The last error is returned.
pub async fn retry_with_backoff<T, F, Fut>(retries: u32, backoff_unit: Duration, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let retries = retries.max(1);
    let mut attempt = 0;
    loop {
        tracing::debug!(attempt = attempt + 1, retries, "Downloading image");
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt + 1 >= retries => {
                tracing::warn!(attempt = attempt + 1, retries, error = %e, "Final download attempt failed");
                return Err(e);
            }
            Err(e) => {
                let wait = backoff_delay(backoff_unit, attempt);
                tracing::warn!(attempt = attempt + 1, retries, error = %e, ?wait, "Download attempt failed, backing off");
                tokio::time::sleep(wait).await;
                attempt += 1;
            }
        }
    }
}

/// `unit * 2^attempt`, saturating at [`Duration::MAX`].
pub fn backoff_delay(unit: Duration, attempt: u32) -> Duration {
    if unit.is_zero() {
        return Duration::ZERO;
    }
    2u32.checked_pow(attempt)
        .and_then(|factor| unit.checked_mul(factor))
        .unwrap_or(Duration::MAX)
}

async fn fetch_bytes(session: &HttpSession, url: &str) -> Result<Vec<u8>> {
    let client = session.client()?;
    let resp = client.get(url).send().await.map_err(|e| MjError::Network {
        context: format!("Failed to fetch image {}", url),
        source: e,
    })?;

    if !resp.status().is_success() {
        return Err(MjError::Http {
            status: resp.status().as_u16(),
            body: format!("Failed to fetch image {}", url),
        });
    }

    let bytes = resp.bytes().await.map_err(|e| MjError::Network {
        context: "Failed to read image bytes".into(),
        source: e,
    })?;
    tracing::debug!(size = bytes.len(), "Image bytes received");
    Ok(bytes.to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn png() -> Vec<u8> {
        DecodedImage {
            width: 2,
            height: 2,
            channels: 3,
            pixels: vec![10; 12],
        }
        .encode_png()
        .unwrap()
    }

    fn counting(
        name: &str,
        calls: Arc<AtomicUsize>,
        outcome: fn() -> Result<Vec<u8>>,
    ) -> DownloadStrategy {
        DownloadStrategy::new(name, move |_url| {
            calls.fetch_add(1, Ordering::SeqCst);
            async move { outcome() }
        })
    }

    fn fail() -> Result<Vec<u8>> {
        Err(MjError::Http {
            status: 502,
            body: "bad gateway".into(),
        })
    }

    #[tokio::test]
    async fn test_first_success_wins_in_order() {
        let (a, b, c) = (
            Arc::new(AtomicUsize::new(0)),
            Arc::new(AtomicUsize::new(0)),
            Arc::new(AtomicUsize::new(0)),
        );
        let downloader = AssetDownloader::new(
            vec![
                counting("a", a.clone(), fail),
                counting("b", b.clone(), || Ok(png())),
                counting("c", c.clone(), || Ok(png())),
            ],
            Duration::ZERO,
        );

        let image = downloader.download("https://cdn/x.png").await.unwrap();
        assert_eq!((image.width, image.height), (2, 2));
        assert_eq!(a.load(Ordering::SeqCst), 1);
        assert_eq!(b.load(Ordering::SeqCst), 1);
        assert_eq!(c.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_undecodable_bytes_fall_through() {
        let calls = Arc::new(AtomicUsize::new(0));
        let downloader = AssetDownloader::new(
            vec![
                counting("garbage", calls.clone(), || Ok(b"<html>blocked</html>".to_vec())),
                counting("good", calls.clone(), || Ok(png())),
            ],
            Duration::ZERO,
        );
        assert!(downloader.download("u").await.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_exhausted_wraps_last_error() {
        let downloader = AssetDownloader::new(
            vec![
                DownloadStrategy::new("first", |_| async { Err(MjError::InvalidInput("first".into())) }),
                DownloadStrategy::new("second", |_| async { fail() }),
            ],
            Duration::ZERO,
        );
        match downloader.download("https://cdn/y.png").await {
            Err(MjError::DownloadExhausted { url, attempts, last }) => {
                assert_eq!(url, "https://cdn/y.png");
                assert_eq!(attempts, 2);
                assert!(matches!(*last, MjError::Http { status: 502, .. }));
            }
            other => panic!("expected DownloadExhausted, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_empty_chain_is_exhausted() {
        let downloader = AssetDownloader::new(Vec::new(), Duration::ZERO);
        assert!(matches!(
            downloader.download("u").await,
            Err(MjError::DownloadExhausted { attempts: 0, .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_pause_between_strategies() {
        let downloader = AssetDownloader::new(
            vec![
                DownloadStrategy::new("a", |_| async { fail() }),
                DownloadStrategy::new("b", |_| async { fail() }),
                DownloadStrategy::new("c", |_| async { Ok(png()) }),
            ],
            Duration::from_secs(1),
        );
        let start = tokio::time::Instant::now();
        downloader.download("u").await.unwrap();
        assert_eq!(start.elapsed(), Duration::from_secs(2));
    }

    #[test]
    fn test_chain_with_detected_proxy() {
        let proxy = ProxyConfig::new("http://127.0.0.1:7890");
        let downloader = AssetDownloader::from_config(&DownloadConfig::default(), Some(&proxy));
        assert_eq!(
            downloader.strategy_names(),
            vec!["proxy(http://127.0.0.1:7890)", "standard", "fallback"]
        );
    }

    #[test]
    fn test_chain_without_proxy_appends_fallbacks() {
        let config = DownloadConfig {
            fallback_proxies: vec!["http://127.0.0.1:33210".into(), "http://127.0.0.1:7891".into()],
            ..Default::default()
        };
        let downloader = AssetDownloader::from_config(&config, None);
        assert_eq!(
            downloader.strategy_names(),
            vec![
                "standard",
                "fallback",
                "proxy(http://127.0.0.1:33210)",
                "proxy(http://127.0.0.1:7891)"
            ]
        );
    }

    #[test]
    fn test_backoff_delay_doubles_and_saturates() {
        let unit = Duration::from_secs(1);
        assert_eq!(backoff_delay(unit, 0), Duration::from_secs(1));
        assert_eq!(backoff_delay(unit, 3), Duration::from_secs(8));
        assert_eq!(backoff_delay(Duration::ZERO, 40), Duration::ZERO);
        assert_eq!(backoff_delay(Duration::from_millis(1), 40), Duration::MAX);
        assert_eq!(backoff_delay(unit, 31), Duration::MAX);
        assert_eq!(backoff_delay(unit, u32::MAX), Duration::MAX);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_backoff_schedule() {
        let calls = Arc::new(AtomicUsize::new(0));
        let start = tokio::time::Instant::now();

        let counter = calls.clone();
        let result: Result<()> = retry_with_backoff(3, Duration::from_secs(1), || {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Err(MjError::Http { status: 503, body: "busy".into() }) }
        })
        .await;

        assert!(matches!(result, Err(MjError::Http { status: 503, .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        // 1s after the first failure, 2s after the second, none after the last
        assert_eq!(start.elapsed(), Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_stops_on_success() {
        let calls = Arc::new(AtomicUsize::new(0));
        let start = tokio::time::Instant::now();

        let counter = calls.clone();
        let value = retry_with_backoff(5, Duration::from_secs(2), || {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            async move {
                if n == 0 {
                    Err(MjError::InvalidInput("first".into()))
                } else {
                    Ok(n)
                }
            }
        })
        .await
        .unwrap();

        assert_eq!(value, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(start.elapsed(), Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_many_retries_do_not_overflow() {
        let calls = Arc::new(AtomicUsize::new(0));
        let start = tokio::time::Instant::now();

        let counter = calls.clone();
        let result = retry_with_backoff(40, Duration::ZERO, || {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Err::<(), _>(MjError::InvalidInput("down".into())) }
        })
        .await;

        assert!(matches!(result, Err(MjError::InvalidInput(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 40);
        assert_eq!(start.elapsed(), Duration::ZERO);
    }
}
