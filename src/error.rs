use crate::llm::MalformedReply;
use thiserror::Error;

/// Failure classes shared by every stage of the pipeline.
///
/// Retrieval and LLM errors concern a single claim: the batch runner turns
/// them into an error note on that claim's record and moves on.
/// Configuration, DataProcessing and Validation errors are fatal for the
/// step that raised them.
#[derive(Error, Debug)]
pub enum Error {
    #[error("configuration error: {message}")]
    Configuration { message: String, key: Option<String> },

    #[error("retrieval failed: {0}")]
    Retrieval(String),

    #[error("llm error: {0}")]
    Llm(String),

    #[error("data processing failed: {0}")]
    DataProcessing(String),

    #[error("invalid {field}: {message}")]
    Validation { field: String, message: String },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn missing_setting(key: &str) -> Self {
        Error::Configuration {
            message: format!("{key} must be set"),
            key: Some(key.to_string()),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Error::Configuration { message: message.into(), key: None }
    }

    pub fn validation(field: &str, message: impl Into<String>) -> Self {
        Error::Validation { field: field.to_string(), message: message.into() }
    }

    /// True for failures that abort a step instead of degrading a single item.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Error::Retrieval(_) | Error::Llm(_))
    }
}

impl From<MalformedReply> for Error {
    fn from(e: MalformedReply) -> Self {
        Error::Llm(e.error)
    }
}
