use thiserror::Error;

use crate::validation::Gate;

pub type Result<T> = std::result::Result<T, DecoratorError>;

#[derive(Debug, Error)]
pub enum DecoratorError {
    #[error("missing required configuration: {0}")]
    MissingConfig(&'static str),

    #[error("task input must contain at least one text or media block")]
    EmptyTaskInput,

    #[error("model endpoint returned {status}: {body}")]
    Provider { status: u16, body: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("network request failed: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("malformed model response: {0}")]
    SerdeJson(#[from] serde_json::Error),

    #[error("internal error: {0}")]
    Other(String),
}

impl DecoratorError {
    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }
}

impl From<anyhow::Error> for DecoratorError {
    fn from(value: anyhow::Error) -> Self {
        Self::Other(value.to_string())
    }
}

const RATE_LIMIT_MARKERS: [&str; 3] = ["429", "RESOURCE_EXHAUSTED", "insufficient_quota"];

/// Outcome of a failed decoration request, as reported to the caller.
#[derive(Debug, Error)]
pub enum DecorateError {
    #[error("{0}")]
    InvalidInput(String),

    #[error("{gate} validation failed: {verdict}")]
    ValidationFailed { gate: Gate, verdict: String },

    #[error("The image generation quota has been exhausted. Please try again later.")]
    RateLimited,

    #[error("Failed to decorate image: {0}")]
    Unexpected(String),
}

impl DecorateError {
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            DecorateError::InvalidInput(_) | DecorateError::ValidationFailed { .. }
        )
    }
}

impl From<DecoratorError> for DecorateError {
    fn from(value: DecoratorError) -> Self {
        let text = value.to_string();
        if RATE_LIMIT_MARKERS.iter().any(|marker| text.contains(marker)) {
            DecorateError::RateLimited
        } else {
            DecorateError::Unexpected(text)
        }
    }
}
