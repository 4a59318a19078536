use std::time::Duration;

use thiserror::Error;

/// Errors returned by Midjourney client operations.
#[derive(Error, Debug)]
pub enum MjError {
    /// A caller-supplied argument was empty or out of range.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// A custom id did not decode into `action||index||msg_id||msg_hash`.
    #[error("Invalid custom id '{0}': expected 4 '||'-joined fields")]
    InvalidCustomId(String),

    /// A job-creation request failed or came back without a task id.
    #[error("{operation} submission failed: {cause}")]
    Submission {
        operation: &'static str,
        #[source]
        cause: SubmissionCause,
    },

    /// A status response could not be decoded as JSON.
    #[error("Unparseable status response for task {task_id}: {body}")]
    Protocol {
        task_id: String,
        body: String,
        #[source]
        source: serde_json::Error,
    },

    /// The backend returned a non-success HTTP status.
    #[error("Midjourney API returned HTTP {status}: {body}")]
    Http { status: u16, body: String },

    /// Network-level request failure with context.
    #[error("{context}: {source}")]
    Network {
        context: String,
        source: reqwest::Error,
    },

    /// The backend reported `FAILED` or `FAILURE` for the task.
    #[error("Task {task_id} failed: {reason}")]
    TaskFailed { task_id: String, reason: String },

    /// The backend reported a status this client does not know.
    #[error("Unknown status '{status}' for task {task_id}")]
    UnknownStatus { task_id: String, status: String },

    /// The configured maximum wait elapsed before a terminal state.
    #[error("Task {task_id} still pending after {waited:?}")]
    PollTimeout { task_id: String, waited: Duration },

    /// Every download strategy failed.
    #[error("All {attempts} download strategies failed for {url}; last error: {last}")]
    DownloadExhausted {
        url: String,
        attempts: usize,
        #[source]
        last: Box<MjError>,
    },

    /// Downloaded bytes could not be decoded or encoded as an image.
    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Client configuration is incomplete or invalid.
    #[error("Invalid configuration: {0}")]
    Config(String),
}

/// Why a submission failed.
#[derive(Error, Debug)]
pub enum SubmissionCause {
    /// The request never produced a response.
    #[error("request failed: {0}")]
    Transport(#[source] reqwest::Error),

    /// The backend answered with a non-success status.
    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    /// The response parsed but carried no usable `result`.
    #[error("response carried no result: {0:?}")]
    MissingResult(String),
}

impl MjError {
    /// Whether this error is a backend-reported task failure.
    pub fn is_task_failure(&self) -> bool {
        matches!(self, MjError::TaskFailed { .. })
    }
}

/// Convenience alias.
pub type Result<T> = std::result::Result<T, MjError>;
