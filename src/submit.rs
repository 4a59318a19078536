use std::future::Future;

use serde_json::{json, Value};

use crate::config::MjConfig;
use crate::error::{MjError, Result, SubmissionCause};
use crate::http::HttpSession;
use crate::types::{BlendDimensions, BotType, CustomId, DecodedImage};

const IMAGINE_PATH: &str = "/v1/api/trigger/imagine";
const BLEND_PATH: &str = "/mj/submit/blend";

/// Body of a job-creation response.
///
/// The backend answers either with a JSON envelope `{"result": <id>}` or
/// with the bare id as plain text. Both are valid.
#[derive(Debug, Clone, PartialEq)]
pub enum SubmitReply {
    /// A JSON document; the id is its `result` field.
    Envelope(Value),
    /// Plain text (or a bare JSON scalar); the trimmed text is the id.
    Bare(String),
}

impl SubmitReply {
    /// Classify a response body. Never fails.
    pub fn parse(body: &str) -> Self {
        match serde_json::from_str::<Value>(body) {
            Ok(Value::String(s)) => SubmitReply::Bare(s.trim().to_string()),
            Ok(Value::Number(n)) => SubmitReply::Bare(n.to_string()),
            Ok(doc) => SubmitReply::Envelope(doc),
            Err(_) => SubmitReply::Bare(body.trim().to_string()),
        }
    }

    /// The task id carried by this reply, if any.
    pub fn task_id(&self) -> Option<String> {
        match self {
            SubmitReply::Envelope(doc) => match doc.get("result") {
                Some(Value::String(s)) if !s.trim().is_empty() => Some(s.trim().to_string()),
                Some(Value::Number(n)) => Some(n.to_string()),
                _ => None,
            },
            SubmitReply::Bare(text) if !text.is_empty() => Some(text.clone()),
            SubmitReply::Bare(_) => None,
        }
    }
}

/// Something that can start a follow-up action on a parent task.
pub trait ActionSubmitter: Send + Sync {
    /// Submit the action encoded by `custom_id`. Returns the sub-task id.
    fn submit_action(
        &self,
        parent_task_id: &str,
        custom_id: &CustomId,
    ) -> impl Future<Output = Result<String>> + Send;
}

/// Posts job-creation requests to the trigger API.
///
/// Nothing is retried here; a failed submission surfaces immediately as
/// [`MjError::Submission`].
#[derive(Debug, Clone)]
pub struct TaskSubmitter {
    endpoint: String,
    session: HttpSession,
}

impl TaskSubmitter {
    /// Submit to `endpoint` (trailing slashes trimmed) through `session`.
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

    /// Base URL requests are sent to.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Submit a text-to-image job. Returns the task id.
    pub async fn submit_imagine(&self, prompt: &str) -> Result<String> {
        let prompt = prompt.trim();
        if prompt.is_empty() {
            return Err(MjError::InvalidInput("prompt must not be empty".into()));
        }
        let body = json!({
            "prompt": prompt,
            "picurl": "",
        });
        self.post("imagine", IMAGINE_PATH, &body).await
    }

    /// Submit an upscale or vary job from its `||`-joined custom id.
    pub async fn submit_upscale_or_vary(&self, task_id: &str, custom_id: &str) -> Result<String> {
        let custom_id = CustomId::parse(custom_id)?;
        self.submit_custom_id(task_id, &custom_id).await
    }

    /// Submit an already parsed custom id as a follow-up of `task_id`.
    pub async fn submit_custom_id(&self, task_id: &str, custom_id: &CustomId) -> Result<String> {
        if task_id.trim().is_empty() {
            return Err(MjError::InvalidInput("parent task id must not be empty".into()));
        }
        let body = json!({
            "index": custom_id.index,
            "msg_id": custom_id.msg_id,
            "msg_hash": custom_id.msg_hash,
            "trigger_id": task_id,
        });
        self.post(
            custom_id.action_type.as_str(),
            custom_id.action_type.endpoint_path(),
            &body,
        )
        .await
    }

    /// Submit a blend job. Returns the task id.
    pub async fn submit_blend(&self, request: &BlendRequest) -> Result<String> {
        let body = request.payload()?;
        self.post("blend", BLEND_PATH, &body).await
    }

    async fn post(&self, operation: &'static str, path: &str, body: &Value) -> Result<String> {
        let url = format!("{}{}", self.endpoint, path);
        let client = self.session.client()?;
        tracing::debug!(operation, %url, "Submitting job");

        let resp = client
            .post(&url)
            .body(serde_json::to_string(body)?)
            .send()
            .await
            .map_err(|e| MjError::Submission {
                operation,
                cause: SubmissionCause::Transport(e),
            })?;

        let status = resp.status();
        let text = resp.text().await.map_err(|e| MjError::Submission {
            operation,
            cause: SubmissionCause::Transport(e),
        })?;

        if !status.is_success() {
            tracing::error!(operation, status = status.as_u16(), body = %text, "Submission rejected");
            return Err(MjError::Submission {
                operation,
                cause: SubmissionCause::Status {
                    status: status.as_u16(),
                    body: text,
                },
            });
        }

        let reply = SubmitReply::parse(&text);
        if matches!(reply, SubmitReply::Bare(_)) {
            tracing::debug!(operation, body = %text, "Response is plain text");
        }
        match reply.task_id() {
            Some(id) => {
                tracing::debug!(operation, task_id = %id, "Job submitted");
                Ok(id)
            }
            None => {
                tracing::error!(operation, body = %text, "Submit response has no result");
                Err(MjError::Submission {
                    operation,
                    cause: SubmissionCause::MissingResult(text),
                })
            }
        }
    }
}

impl ActionSubmitter for TaskSubmitter {
    async fn submit_action(&self, parent_task_id: &str, custom_id: &CustomId) -> Result<String> {
        self.submit_custom_id(parent_task_id, custom_id).await
    }
}

/// Builder for an imagine prompt with Midjourney parameter flags.
///
/// # Example
/// ```
/// use midjourney_rs::ImagineParams;
///
/// let prompt = ImagineParams::new("a lighthouse at dusk")
///     .aspect_ratio("16:9")
///     .chaos(20)
///     .build()
///     .unwrap();
///
/// assert_eq!(prompt, "a lighthouse at dusk --ar 16:9 --s 100 --c 20 --v 7.0");
/// ```
#[derive(Debug, Clone)]
pub struct ImagineParams {
    pub prompt: String,
    pub aspect_ratio: String,
    pub stylize: u32,
    pub chaos: u32,
    pub weird: u32,
    pub style_refs: Vec<String>,
    pub style_weight: u32,
    pub omni_ref: Option<String>,
    pub omni_weight: u32,
    pub version: String,
}

impl ImagineParams {
    /// Defaults: `--ar 1:1 --s 100 --v 7.0`, style weight 30, omni weight 100.
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            aspect_ratio: "1:1".to_string(),
            stylize: 100,
            chaos: 0,
            weird: 0,
            style_refs: Vec::new(),
            style_weight: 30,
            omni_ref: None,
            omni_weight: 100,
            version: "7.0".to_string(),
        }
    }

    /// `--ar`, e.g. `"16:9"`.
    pub fn aspect_ratio(mut self, ratio: impl Into<String>) -> Self {
        self.aspect_ratio = ratio.into();
        self
    }

    /// `--s` stylize strength.
    pub fn stylize(mut self, stylize: u32) -> Self {
        self.stylize = stylize;
        self
    }

    /// `--c` chaos, omitted when zero.
    pub fn chaos(mut self, chaos: u32) -> Self {
        self.chaos = chaos;
        self
    }

    /// `--weird`, omitted when zero.
    pub fn weird(mut self, weird: u32) -> Self {
        self.weird = weird;
        self
    }

    /// Add a style reference URL or code. References of one character or
    /// less are ignored.
    pub fn style_ref(mut self, reference: impl Into<String>) -> Self {
        let reference = reference.into();
        if reference.trim().len() > 1 {
            self.style_refs.push(reference.trim().to_string());
        }
        self
    }

    /// `--sw`, only emitted with style references.
    pub fn style_weight(mut self, weight: u32) -> Self {
        self.style_weight = weight;
        self
    }

    /// Omni reference image. One character or less clears it.
    pub fn omni_ref(mut self, reference: impl Into<String>) -> Self {
        let reference = reference.into();
        self.omni_ref = (reference.trim().len() > 1).then(|| reference.trim().to_string());
        self
    }

    /// `--ow`, only emitted with an omni reference.
    pub fn omni_weight(mut self, weight: u32) -> Self {
        self.omni_weight = weight;
        self
    }

    /// Model version for `--v`.
    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    /// Render the full prompt text.
    pub fn build(&self) -> Result<String> {
        let base = self.prompt.trim();
        if base.is_empty() {
            return Err(MjError::InvalidInput("prompt must not be empty".into()));
        }

        let mut parts = vec![
            base.to_string(),
            format!("--ar {}", self.aspect_ratio),
            format!("--s {}", self.stylize),
        ];
        if self.chaos > 0 {
            parts.push(format!("--c {}", self.chaos));
        }
        if self.weird > 0 {
            parts.push(format!("--weird {}", self.weird));
        }
        if !self.style_refs.is_empty() {
            parts.push(format!("--sref {}", self.style_refs.join(" ")));
            if self.style_weight > 0 {
                parts.push(format!("--sw {}", self.style_weight));
            }
        }
        if let Some(omni) = &self.omni_ref {
            parts.push(format!("--oref {}", omni));
            if self.omni_weight > 0 {
                parts.push(format!("--ow {}", self.omni_weight));
            }
        }
        parts.push(format!("--v {}", self.version));
        Ok(parts.join(" "))
    }
}

/// Parameters of a blend job.
#[derive(Debug, Clone)]
pub struct BlendRequest {
    /// Images as `data:<mime>;base64,...` URLs, 2 to 5 of them.
    pub images: Vec<String>,
    pub dimensions: BlendDimensions,
    pub bot_type: BotType,
    /// Only sent when set (e.g. `"hd"`).
    pub quality: Option<String>,
    pub notify_hook: String,
    /// Caller-defined tag. A millisecond timestamp is used when unset so the
    /// backend never treats two identical blends as duplicates.
    pub state: Option<String>,
}

impl BlendRequest {
    pub const MIN_IMAGES: usize = 2;
    pub const MAX_IMAGES: usize = 5;

    /// Blend of the given data URLs with default dimensions and bot.
    pub fn new(images: Vec<String>) -> Self {
        Self {
            images,
            dimensions: BlendDimensions::default(),
            bot_type: BotType::default(),
            quality: None,
            notify_hook: String::new(),
            state: None,
        }
    }

    /// Encode decoded pixel buffers as PNG data URLs.
    pub fn from_images(images: &[DecodedImage]) -> Result<Self> {
        let urls = images
            .iter()
            .map(DecodedImage::to_data_url)
            .collect::<Result<Vec<_>>>()?;
        Ok(Self::new(urls))
    }

    /// Output aspect of the blend.
    pub fn dimensions(mut self, dimensions: BlendDimensions) -> Self {
        self.dimensions = dimensions;
        self
    }

    /// Midjourney or Niji.
    pub fn bot_type(mut self, bot_type: BotType) -> Self {
        self.bot_type = bot_type;
        self
    }

    /// Set the quality flag. An empty string clears it.
    pub fn quality(mut self, quality: impl Into<String>) -> Self {
        let quality = quality.into();
        self.quality = (!quality.trim().is_empty()).then_some(quality);
        self
    }

    /// Callback URL the backend notifies on completion.
    pub fn notify_hook(mut self, hook: impl Into<String>) -> Self {
        self.notify_hook = hook.into();
        self
    }

    /// Caller state echoed back by the backend. Defaults to a timestamp.
    pub fn state(mut self, state: impl Into<String>) -> Self {
        self.state = Some(state.into());
        self
    }

    /// Validate and render the JSON request body.
    pub fn payload(&self) -> Result<Value> {
        let count = self.images.len();
        if !(Self::MIN_IMAGES..=Self::MAX_IMAGES).contains(&count) {
            return Err(MjError::InvalidInput(format!(
                "blend needs {} to {} images, got {}",
                Self::MIN_IMAGES,
                Self::MAX_IMAGES,
                count
            )));
        }
        if self.images.iter().any(|img| img.trim().is_empty()) {
            return Err(MjError::InvalidInput("blend image must not be empty".into()));
        }

        let state = self
            .state
            .clone()
            .unwrap_or_else(|| chrono::Utc::now().timestamp_millis().to_string());
        let mut body = json!({
            "botType": self.bot_type,
            "base64Array": self.images,
            "dimensions": self.dimensions,
            "notifyHook": self.notify_hook,
            "state": state,
        });
        if let Some(quality) = &self.quality {
            body["quality"] = json!(quality);
        }
        Ok(body)
    }
}
