use std::future::Future;
use std::time::Duration;

use serde_json::Value;
use tokio::time::Instant;

use crate::buttons::normalize_buttons;
use crate::config::MjConfig;
use crate::download::ImageSource;
use crate::error::{MjError, Result};
use crate::http::HttpSession;
use crate::types::{Task, TaskOutcome, TaskStatus};

const TASK_PATH: &str = "/v1/api/trigger/task";

/// Where task status payloads come from.
pub trait StatusSource: Send + Sync {
    /// Fetch the raw JSON status payload of one task.
    fn fetch_status(&self, task_id: &str) -> impl Future<Output = Result<Value>> + Send;
}

/// Reads task status from `GET /v1/api/trigger/task/{id}`.
#[derive(Debug, Clone)]
pub struct HttpStatusSource {
    endpoint: String,
    session: HttpSession,
}

impl HttpStatusSource {
    /// Poll `endpoint` (trailing slashes trimmed) through `session`.
    pub fn new(endpoint: impl Into<String>, session: HttpSession) -> Self {
        Self {
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            session,
        }
    }

    /// Build from the API url, key and timeouts of `config`.
    pub fn from_config(config: &MjConfig) -> Result<Self> {
        let session = HttpSession::api(&config.api_key, config.api_timeouts)?;
        Ok(Self::new(config.api_url.clone(), session))
    }
}

impl StatusSource for HttpStatusSource {
    async fn fetch_status(&self, task_id: &str) -> Result<Value> {
        let url = format!("{}{}/{}", self.endpoint, TASK_PATH, task_id);
        let client = self.session.client()?;
        let resp = client.get(&url).send().await.map_err(|e| MjError::Network {
            context: format!("Failed to fetch status of task {}", task_id),
            source: e,
        })?;

        let status = resp.status();
        let body = resp.text().await.map_err(|e| MjError::Network {
            context: format!("Failed to read status of task {}", task_id),
            source: e,
        })?;

        if !status.is_success() {
            return Err(MjError::Http {
                status: status.as_u16(),
                body,
            });
        }

        serde_json::from_str(&body).map_err(|e| MjError::Protocol {
            task_id: task_id.to_string(),
            body,
            source: e,
        })
    }
}

/// Polls a task until it reaches a terminal state.
///
/// Pending states (`""`, `SUBMITTED`, `IN_PROGRESS`, `NOT_START`) sleep one
/// interval and poll again. `SUCCESS` downloads the result image through the
/// [`ImageSource`] and normalizes the interaction metadata. `FAILED` and
/// `FAILURE` stop with [`MjError::TaskFailed`]; anything else, including a
/// payload without a string `status`, stops with [`MjError::UnknownStatus`].
#[derive(Debug, Clone)]
pub struct StatusPoller<S, I> {
    source: S,
    images: I,
    interval: Duration,
    max_wait: Option<Duration>,
}

impl<S: StatusSource, I: ImageSource> StatusPoller<S, I> {
    /// Poller that sleeps `interval` between pending responses, unbounded.
    pub fn new(source: S, images: I, interval: Duration) -> Self {
        Self {
            source,
            images,
            interval,
            max_wait: None,
        }
    }

    /// Stop with [`MjError::PollTimeout`] once a task has been pending this long.
    pub fn with_max_wait(mut self, max_wait: Option<Duration>) -> Self {
        self.max_wait = max_wait;
        self
    }

    /// Sleep between two status requests.
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// The image source used on success.
    pub fn images(&self) -> &I {
        &self.images
    }

    /// Poll `task_id` until it succeeds, fails, reports an unknown status or
    /// exceeds `max_wait`. On success the image is downloaded and the buttons
    /// normalized.
    pub async fn poll(&self, task_id: &str) -> Result<TaskOutcome> {
        let started = Instant::now();
        let mut task = Task::new(task_id);

        loop {
            let payload = self.source.fetch_status(task_id).await?;
            task.apply(&payload);

            match task.status.clone() {
                TaskStatus::Success => return self.complete(task, &payload).await,
                TaskStatus::Failed | TaskStatus::Failure => {
                    let reason = task
                        .fail_reason
                        .clone()
                        .unwrap_or_else(|| "Unknown error".to_string());
                    tracing::error!(task_id, status = %task.status, %reason, "Task failed");
                    return Err(MjError::TaskFailed {
                        task_id: task_id.to_string(),
                        reason,
                    });
                }
                TaskStatus::Unknown(status) => {
                    tracing::error!(task_id, %status, "Task reported an unknown status");
                    return Err(MjError::UnknownStatus {
                        task_id: task_id.to_string(),
                        status,
                    });
                }
                TaskStatus::Empty
                | TaskStatus::Submitted
                | TaskStatus::InProgress
                | TaskStatus::NotStart => {
                    tracing::info!(
                        task_id,
                        status = %task.status,
                        progress = task.progress.as_deref().unwrap_or(""),
                        "Task pending"
                    );
                }
            }

            if let Some(max_wait) = self.max_wait {
                let waited = started.elapsed();
                if waited >= max_wait {
                    tracing::warn!(task_id, ?waited, "Gave up waiting for task");
                    return Err(MjError::PollTimeout {
                        task_id: task_id.to_string(),
                        waited,
                    });
                }
            }
            tokio::time::sleep(self.interval).await;
        }
    }

    async fn complete(&self, task: Task, payload: &Value) -> Result<TaskOutcome> {
        let image = match task.image_url.as_deref() {
            Some(url) => Some(self.images.fetch(url).await?),
            None => {
                tracing::warn!(task_id = %task.id, "Task succeeded without an image URL");
                None
            }
        };
        let metadata = normalize_buttons(payload);
        tracing::info!(
            task_id = %task.id,
            msg_id = metadata.msg_id,
            actions = metadata.actions.len(),
            "Task completed"
        );

        Ok(TaskOutcome {
            task_id: task.id.clone(),
            task,
            image,
            metadata,
        })
    }
}
