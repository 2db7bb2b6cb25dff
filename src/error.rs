use thiserror::Error;

pub type MaterializeResult<T> = std::result::Result<T, MaterializeError>;

/// Why a single rule could not be materialized
#[derive(Error, Debug)]
pub enum MaterializeError {
    #[error("No rule definition found for {0}")]
    MissingDefinition(String),

    #[error("Placeholder _ARG_{index}_ references a missing argument ({supplied} supplied)")]
    MissingArgument { index: usize, supplied: usize },

    #[error("Invalid argument placeholder: {0}")]
    InvalidPlaceholder(String),

    #[error("Rule definition is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Rule definition must be a JSON object")]
    NotAnObject,

    #[error("Invalid conditions: {0}")]
    InvalidConditions(String),

    #[error("Failed to read IP ranges from {path}: {message}")]
    IpRanges { path: String, message: String },
}
