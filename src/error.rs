use thiserror::Error;

use crate::gateway::CallError;

#[derive(Debug, Error)]
pub enum PaperflowError {
    #[error("Invalid job: {0}")]
    InvalidJob(String),

    #[error("Remote call failed: {0}")]
    Gateway(#[from] CallError),

    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    /// The job exists but its result was not ready within the attempt
    /// budget. Polling again may succeed.
    #[error("{feature} is still processing, try again later")]
    PollTimeout { feature: String },

    #[error("Podcast is not available: {0}")]
    Podcast(String),

    #[error("Presentation is not available: {0}")]
    Presentation(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl PaperflowError {
    pub fn is_poll_timeout(&self) -> bool {
        matches!(self, PaperflowError::PollTimeout { .. })
    }
}

/// Terminal failure of a pipeline run.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PipelineError {
    /// A required stage failed; nothing after it ran.
    #[error("{message}")]
    RequiredStageFailure { stage: String, message: String },

    /// The run token was cancelled before the pipeline finished.
    #[error("Pipeline run was cancelled")]
    Cancelled,
}

impl PipelineError {
    /// Name of the stage that aborted the run, if any.
    pub fn stage(&self) -> Option<&str> {
        match self {
            PipelineError::RequiredStageFailure { stage, .. } => Some(stage),
            PipelineError::Cancelled => None,
        }
    }
}
