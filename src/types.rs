use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::buttons::InteractionMetadata;
use crate::error::{MjError, Result};

/// Remote task status as reported by the status endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskStatus {
    /// Empty status string; the backend has not picked the task up yet.
    Empty,
    Submitted,
    InProgress,
    NotStart,
    Success,
    Failed,
    Failure,
    /// Any status string this client does not recognize.
    Unknown(String),
}

impl TaskStatus {
    pub fn parse(raw: &str) -> Self {
        match raw {
            "" => TaskStatus::Empty,
            "SUBMITTED" => TaskStatus::Submitted,
            "IN_PROGRESS" => TaskStatus::InProgress,
            "NOT_START" => TaskStatus::NotStart,
            "SUCCESS" => TaskStatus::Success,
            "FAILED" => TaskStatus::Failed,
            "FAILURE" => TaskStatus::Failure,
            other => TaskStatus::Unknown(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            TaskStatus::Empty => "",
            TaskStatus::Submitted => "SUBMITTED",
            TaskStatus::InProgress => "IN_PROGRESS",
            TaskStatus::NotStart => "NOT_START",
            TaskStatus::Success => "SUCCESS",
            TaskStatus::Failed => "FAILED",
            TaskStatus::Failure => "FAILURE",
            TaskStatus::Unknown(s) => s,
        }
    }

    /// Still queued or running; poll again.
    pub fn is_pending(&self) -> bool {
        matches!(
            self,
            TaskStatus::Empty | TaskStatus::Submitted | TaskStatus::InProgress | TaskStatus::NotStart
        )
    }

    /// `FAILED` and `FAILURE` are the same outcome.
    pub fn is_failure(&self) -> bool {
        matches!(self, TaskStatus::Failed | TaskStatus::Failure)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Success) || self.is_failure()
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status recorded when a payload carries no `status` field.
pub const MISSING_STATUS: &str = "<missing>";

/// Client-side view of one backend task.
///
/// Only [`Task::apply`] mutates it, with the body of a status response.
#[derive(Debug, Clone, PartialEq)]
pub struct Task {
    pub id: String,
    pub status: TaskStatus,
    pub progress: Option<String>,
    pub image_url: Option<String>,
    pub fail_reason: Option<String>,
}

impl Task {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            status: TaskStatus::Empty,
            progress: None,
            image_url: None,
            fail_reason: None,
        }
    }

    /// Overwrite the tracked fields from a decoded status payload.
    ///
    /// A missing or non-string `status` becomes [`TaskStatus::Unknown`];
    /// only the empty string means [`TaskStatus::Empty`].
    pub fn apply(&mut self, payload: &Value) {
        self.status = match payload.get("status") {
            Some(Value::String(s)) => TaskStatus::parse(s),
            Some(other) => TaskStatus::Unknown(other.to_string()),
            None => TaskStatus::Unknown(MISSING_STATUS.to_string()),
        };
        self.progress = payload.get("progress").and_then(value_to_string);
        self.image_url = payload
            .get("imageUrl")
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
            .map(String::from);
        self.fail_reason = payload
            .get("failReason")
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
            .map(String::from);
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

fn value_to_string(v: &Value) -> Option<String> {
    match v {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

/// Follow-up operation kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ActionType {
    Upscale,
    Vary,
}

impl ActionType {
    pub fn as_str(self) -> &'static str {
        match self {
            ActionType::Upscale => "upscale",
            ActionType::Vary => "vary",
        }
    }

    /// Path of the trigger endpoint for this action.
    pub fn endpoint_path(self) -> &'static str {
        match self {
            ActionType::Upscale => "/v1/api/trigger/upscale",
            ActionType::Vary => "/v1/api/trigger/vary",
        }
    }
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Composite key `action||index||msg_id||msg_hash` selecting a follow-up
/// operation on a parent task.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CustomId {
    pub action_type: ActionType,
    pub index: u32,
    pub msg_id: String,
    pub msg_hash: String,
}

impl CustomId {
    pub const DELIMITER: &'static str = "||";

    pub fn new(
        action_type: ActionType,
        index: u32,
        msg_id: impl Into<String>,
        msg_hash: impl Into<String>,
    ) -> Self {
        Self {
            action_type,
            index,
            msg_id: msg_id.into(),
            msg_hash: msg_hash.into(),
        }
    }

    pub fn parse(raw: &str) -> Result<Self> {
        let invalid = || MjError::InvalidCustomId(raw.to_string());
        let fields: Vec<&str> = raw.split(Self::DELIMITER).collect();
        let [action, index, msg_id, msg_hash] = fields.as_slice() else {
            return Err(invalid());
        };
        let action_type = match *action {
            "upscale" => ActionType::Upscale,
            "vary" => ActionType::Vary,
            _ => return Err(invalid()),
        };
        let index = index.trim().parse::<u32>().map_err(|_| invalid())?;
        Ok(Self::new(action_type, index, *msg_id, *msg_hash))
    }
}

impl fmt::Display for CustomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}||{}||{}||{}",
            self.action_type, self.index, self.msg_id, self.msg_hash
        )
    }
}

impl FromStr for CustomId {
    type Err = MjError;

    fn from_str(s: &str) -> Result<Self> {
        CustomId::parse(s)
    }
}

/// A button code such as `U1` or `V3`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Action {
    pub action_type: ActionType,
    pub index: u32,
}

impl Action {
    pub fn upscale(index: u32) -> Self {
        Self {
            action_type: ActionType::Upscale,
            index,
        }
    }

    pub fn vary(index: u32) -> Self {
        Self {
            action_type: ActionType::Vary,
            index,
        }
    }

    /// `U1`..`U4`.
    pub fn upscale_all() -> Vec<Action> {
        (1..=4).map(Action::upscale).collect()
    }

    /// `V1`..`V4`.
    pub fn vary_all() -> Vec<Action> {
        (1..=4).map(Action::vary).collect()
    }

    pub fn code(&self) -> String {
        self.to_string()
    }

    /// Build the custom id for this action from a parent's message identity.
    pub fn custom_id(&self, metadata: &InteractionMetadata) -> CustomId {
        CustomId::new(
            self.action_type,
            self.index,
            metadata.msg_id.to_string(),
            metadata.msg_hash.clone(),
        )
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let prefix = match self.action_type {
            ActionType::Upscale => 'U',
            ActionType::Vary => 'V',
        };
        write!(f, "{}{}", prefix, self.index)
    }
}

impl FromStr for Action {
    type Err = MjError;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || MjError::InvalidInput(format!("Unknown action code '{}'", s));
        let mut chars = s.trim().chars();
        let action_type = match chars.next() {
            Some('U') | Some('u') => ActionType::Upscale,
            Some('V') | Some('v') => ActionType::Vary,
            _ => return Err(invalid()),
        };
        let index: u32 = chars.as_str().parse().map_err(|_| invalid())?;
        if !(1..=4).contains(&index) {
            return Err(invalid());
        }
        Ok(Self { action_type, index })
    }
}

/// Aspect ratio preset for blend jobs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum BlendDimensions {
    /// 2:3
    Portrait,
    /// 1:1
    #[default]
    Square,
    /// 3:2
    Landscape,
}

/// Which bot renders a blend job.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BotType {
    #[default]
    MidJourney,
    NijiJourney,
}

/// Dense decoded pixel buffer, row-major, 8 bits per channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedImage {
    pub width: u32,
    pub height: u32,
    /// 3 for RGB, 4 for RGBA.
    pub channels: u8,
    pub pixels: Vec<u8>,
}

impl DecodedImage {
    /// Decode PNG/JPEG/WebP/... bytes. Sources with alpha stay RGBA.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let img = image::load_from_memory(bytes)?;
        Ok(Self::from_dynamic(img))
    }

    pub fn from_dynamic(img: image::DynamicImage) -> Self {
        let (width, height) = (img.width(), img.height());
        if img.color().has_alpha() {
            Self {
                width,
                height,
                channels: 4,
                pixels: img.into_rgba8().into_raw(),
            }
        } else {
            Self {
                width,
                height,
                channels: 3,
                pixels: img.into_rgb8().into_raw(),
            }
        }
    }

    /// Encode as PNG bytes.
    ///
    /// Fails with [`MjError::InvalidInput`] when `channels` is not 3 or 4 or
    /// `pixels` does not hold exactly `width * height * channels` bytes.
    pub fn encode_png(&self) -> Result<Vec<u8>> {
        let color = match self.channels {
            3 => image::ExtendedColorType::Rgb8,
            4 => image::ExtendedColorType::Rgba8,
            n => {
                return Err(MjError::InvalidInput(format!(
                    "unsupported channel count {}, expected 3 or 4",
                    n
                )))
            }
        };
        let expected = (self.width as usize)
            .checked_mul(self.height as usize)
            .and_then(|n| n.checked_mul(self.channels as usize));
        if expected != Some(self.pixels.len()) {
            return Err(MjError::InvalidInput(format!(
                "pixel buffer holds {} bytes, a {}x{} image with {} channels needs {}",
                self.pixels.len(),
                self.width,
                self.height,
                self.channels,
                expected.map_or_else(|| "more".to_string(), |n| n.to_string()),
            )));
        }
        let mut out = std::io::Cursor::new(Vec::new());
        image::write_buffer_with_format(
            &mut out,
            &self.pixels,
            self.width,
            self.height,
            color,
            image::ImageFormat::Png,
        )?;
        Ok(out.into_inner())
    }

    /// `data:image/png;base64,...` for upload in blend requests.
    pub fn to_data_url(&self) -> Result<String> {
        Ok(data_url("image/png", &self.encode_png()?))
    }
}

/// Encode file bytes as a data URL, choosing the MIME type from the file
/// extension (PNG when unknown).
pub fn encode_data_url(bytes: &[u8], file_name: &str) -> String {
    let ext = std::path::Path::new(file_name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();
    let mime = match ext.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        _ => "image/png",
    };
    data_url(mime, bytes)
}

fn data_url(mime: &str, bytes: &[u8]) -> String {
    format!(
        "data:{};base64,{}",
        mime,
        base64::Engine::encode(&base64::engine::general_purpose::STANDARD, bytes)
    )
}

/// Result of polling a task to its terminal state.
#[derive(Debug, Clone)]
pub struct TaskOutcome {
    pub task_id: String,
    pub task: Task,
    /// `None` when the success payload carried no image URL.
    pub image: Option<DecodedImage>,
    pub metadata: InteractionMetadata,
}
