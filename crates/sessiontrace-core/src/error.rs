//! Error types for the tracing pipeline
//!
//! None of these ever reach a lifecycle hook caller: hooks log and swallow.
//! They surface from configuration loading, store adapters and the writer.

use thiserror::Error;

/// Pipeline errors
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Failed to serialize span: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Store transport error: {0}")]
    Transport(String),

    #[error("Store server error: {0}")]
    Server(String),

    #[error("Store rejected request: {0}")]
    Rejected(String),

    #[error("Store authentication failed: {0}")]
    Authentication(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl PipelineError {
    pub fn config(msg: impl Into<String>) -> Self {
        PipelineError::Config(msg.into())
    }

    /// Whether a failed store request may succeed if sent again.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            PipelineError::Transport(_) | PipelineError::Server(_) | PipelineError::Timeout(_)
        )
    }
}

impl From<reqwest::Error> for PipelineError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            PipelineError::Timeout(err.to_string())
        } else {
            PipelineError::Transport(err.to_string())
        }
    }
}

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = PipelineError::config("queue_capacity must be positive");
        assert_eq!(
            err.to_string(),
            "Configuration error: queue_capacity must be positive"
        );
    }

    #[test]
    fn test_retryable_classification() {
        assert!(PipelineError::Transport("connection reset".into()).is_retryable());
        assert!(PipelineError::Server("503".into()).is_retryable());
        assert!(PipelineError::Timeout("5s".into()).is_retryable());

        assert!(!PipelineError::Rejected("mapper_parsing_exception".into()).is_retryable());
        assert!(!PipelineError::Authentication("401".into()).is_retryable());
        assert!(!PipelineError::config("bad").is_retryable());
        assert!(!PipelineError::Serialization(serde_json::Error::io(std::io::Error::new(
            std::io::ErrorKind::Other,
            "test"
        )))
        .is_retryable());
    }
}
