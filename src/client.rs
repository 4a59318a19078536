use crate::batch::BatchCoordinator;
use crate::config::{MjConfig, ProxyMode};
use crate::diagnostic::{network_diagnostic, DiagnosticReport};
use crate::download::AssetDownloader;
use crate::error::Result;
use crate::poll::{HttpStatusSource, StatusPoller};
use crate::proxy::{ProxyConfig, ProxyDetector};
use crate::submit::{BlendRequest, TaskSubmitter};
use crate::types::{Action, DecodedImage, TaskOutcome};

/// Async client for a Midjourney trigger API.
///
/// Wires the submitter, status poller, download chain and batch coordinator
/// together. The proxy is decided once, when the client is built.
///
/// # Example
/// ```no_run
/// use midjourney_rs::{Action, MjClient, MjConfig};
///
/// # async fn example() -> midjourney_rs::Result<()> {
/// let client = MjClient::new(MjConfig::from_env()?).await?;
/// let outcome = client.imagine("a lighthouse at dusk --ar 16:9").await?;
/// let upscales = client.batch(&outcome.task_id, &Action::upscale_all()).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct MjClient {
    config: MjConfig,
    submitter: TaskSubmitter,
    poller: StatusPoller<HttpStatusSource, AssetDownloader>,
    proxy: Option<ProxyConfig>,
}

impl MjClient {
    /// Create a client, resolving the proxy according to [`ProxyMode`].
    pub async fn new(config: MjConfig) -> Result<Self> {
        let proxy = match &config.proxy {
            ProxyMode::Auto => ProxyDetector::new().detect().await,
            ProxyMode::Disabled => None,
            ProxyMode::Fixed(url) => Some(ProxyConfig::new(url.clone())),
        };
        Self::with_proxy(config, proxy)
    }

    /// Create a client with an already known proxy. Skips detection.
    pub fn with_proxy(config: MjConfig, proxy: Option<ProxyConfig>) -> Result<Self> {
        let submitter = TaskSubmitter::from_config(&config)?;
        let downloader = AssetDownloader::from_config(&config.download, proxy.as_ref());
        let poller = StatusPoller::new(
            HttpStatusSource::from_config(&config)?,
            downloader,
            config.poll_interval,
        )
        .with_max_wait(config.max_wait);

        tracing::info!(
            endpoint = %config.api_url,
            proxy = proxy.as_ref().map(|p| p.url.as_str()).unwrap_or("none"),
            "Midjourney client ready"
        );

        Ok(Self {
            config,
            submitter,
            poller,
            proxy,
        })
    }

    pub fn config(&self) -> &MjConfig {
        &self.config
    }

    /// The proxy picked at construction, if any.
    pub fn proxy(&self) -> Option<&ProxyConfig> {
        self.proxy.as_ref()
    }

    // ── Imagine ─────────────────────────────────────────────────────

    /// Submit a prompt without waiting for it.
    pub async fn submit_imagine(&self, prompt: &str) -> Result<String> {
        self.submitter.submit_imagine(prompt).await
    }

    /// Submit a prompt and wait for the finished image.
    pub async fn imagine(&self, prompt: &str) -> Result<TaskOutcome> {
        let task_id = self.submit_imagine(prompt).await?;
        tracing::info!(%task_id, "Imagine submitted");
        self.status(&task_id).await
    }

    // ── Blend ───────────────────────────────────────────────────────

    pub async fn submit_blend(&self, request: &BlendRequest) -> Result<String> {
        self.submitter.submit_blend(request).await
    }

    pub async fn blend(&self, request: &BlendRequest) -> Result<TaskOutcome> {
        let task_id = self.submit_blend(request).await?;
        tracing::info!(%task_id, images = request.images.len(), "Blend submitted");
        self.status(&task_id).await
    }

    // ── Follow-up actions ───────────────────────────────────────────

    /// Poll an existing task until it finishes.
    pub async fn status(&self, task_id: &str) -> Result<TaskOutcome> {
        self.poller.poll(task_id).await
    }

    /// Submit an upscale or vary job from a raw `||`-joined custom id.
    pub async fn submit_upscale_or_vary(&self, task_id: &str, custom_id: &str) -> Result<String> {
        self.submitter.submit_upscale_or_vary(task_id, custom_id).await
    }

    /// Run one `U`/`V` action on a finished task and return its image.
    ///
    /// Uses the custom id the parent advertised, or builds one from the
    /// parent's message identity.
    pub async fn upscale_or_vary(
        &self,
        task_id: &str,
        action: Action,
    ) -> Result<Option<DecodedImage>> {
        let parent = self.status(task_id).await?;
        let custom_id = parent
            .metadata
            .custom_id_for(&action)
            .cloned()
            .unwrap_or_else(|| action.custom_id(&parent.metadata));

        let sub_task = self.submitter.submit_custom_id(task_id, &custom_id).await?;
        tracing::info!(parent_task_id = task_id, %action, %sub_task, "Action submitted");
        Ok(self.status(&sub_task).await?.image)
    }

    /// Run several actions of one finished task concurrently.
    ///
    /// One slot per action, in order. Failed actions are `None`.
    pub async fn batch(
        &self,
        task_id: &str,
        actions: &[Action],
    ) -> Result<Vec<Option<DecodedImage>>> {
        BatchCoordinator::new(&self.submitter, &self.poller)
            .run(task_id, actions)
            .await
    }

    // ── Assets ──────────────────────────────────────────────────────

    /// Download and decode an image through the strategy chain.
    pub async fn download(&self, url: &str) -> Result<DecodedImage> {
        self.poller.images().download(url).await
    }

    /// Check DNS, TCP and HTTP reachability of `url`.
    pub async fn diagnose(&self, url: &str) -> DiagnosticReport {
        network_diagnostic(url).await
    }
}
