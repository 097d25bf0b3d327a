use thiserror::Error;

pub type Result<T> = std::result::Result<T, PipelineError>;

/// Batch-level failures. Per-task problems are `Rejection`s and never
/// surface here.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Transport error: {context}: {message}")]
    Transport { context: String, message: String },

    #[error("Decode error: {context}: {message}")]
    Decode { context: String, message: String },

    #[error("Persistence error: {0}")]
    Persistence(#[from] rusqlite::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl PipelineError {
    pub fn transport(context: impl Into<String>, message: impl ToString) -> Self {
        PipelineError::Transport {
            context: context.into(),
            message: message.to_string(),
        }
    }

    pub fn decode(context: impl Into<String>, message: impl ToString) -> Self {
        PipelineError::Decode {
            context: context.into(),
            message: message.to_string(),
        }
    }
}
