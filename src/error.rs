//! Error types for the AQI forecast pipeline.

use std::sync::Arc;
use thiserror::Error;

/// Top-level error type for pipeline operations.
///
/// Cloneable so the inference cache can hand the same failure to every
/// caller waiting on an in-flight computation.
#[derive(Debug, Clone, Error)]
pub enum PipelineError {
    /// Malformed or out-of-range input shape (wrong window length, bad horizon).
    #[error("validation error: {0}")]
    Validation(String),

    /// A required field has no usable values for the whole window.
    #[error("insufficient data: {0}")]
    InsufficientData(String),

    /// Model weights failed to load, or an inference call failed.
    #[error("model unavailable: {model}: {reason}")]
    ModelUnavailable { model: String, reason: String },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("run log error: {0}")]
    RunLog(String),

    #[error("weather api error: {0}")]
    Weather(String),

    #[error("I/O error: {0}")]
    Io(Arc<std::io::Error>),
}

impl PipelineError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn insufficient_data(msg: impl Into<String>) -> Self {
        Self::InsufficientData(msg.into())
    }

    pub fn model_unavailable(model: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ModelUnavailable {
            model: model.into(),
            reason: reason.into(),
        }
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn run_log(msg: impl Into<String>) -> Self {
        Self::RunLog(msg.into())
    }

    pub fn weather(msg: impl Into<String>) -> Self {
        Self::Weather(msg.into())
    }
}

impl From<std::io::Error> for PipelineError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(Arc::new(err))
    }
}

impl From<config::ConfigError> for PipelineError {
    fn from(err: config::ConfigError) -> Self {
        Self::Config(err.to_string())
    }
}

impl From<csv::Error> for PipelineError {
    fn from(err: csv::Error) -> Self {
        Self::RunLog(err.to_string())
    }
}

pub type PipelineResult<T> = Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_errors_are_cloneable() {
        let err = PipelineError::model_unavailable("forecaster", "weights missing");
        let copy = err.clone();
        assert_eq!(err.to_string(), copy.to_string());
        assert!(copy.to_string().contains("forecaster"));
    }

    #[test]
    fn test_io_error_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: PipelineError = io.into();
        assert!(matches!(err, PipelineError::Io(_)));
        assert!(err.to_string().contains("gone"));
    }
}
