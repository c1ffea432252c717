//! Error types for the performance services.

use thiserror::Error;

/// Errors raised while configuring or feeding the performance services.
#[derive(Debug, Error)]
pub enum PerformanceError {
    /// Configuration or memory payload was not valid JSON
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Scripting engine memory payload had an unexpected shape
    #[error("Invalid scripting engine memory info: {0}")]
    InvalidMemoryInfo(String),

    /// A required field was absent
    #[error("Missing field: {0}")]
    MissingField(&'static str),
}

/// Result type for performance operations.
pub type PerformanceResult<T> = Result<T, PerformanceError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = PerformanceError::MissingField("gc_info");
        assert_eq!(err.to_string(), "Missing field: gc_info");

        let err = PerformanceError::InvalidMemoryInfo("gc_info is empty".to_string());
        assert_eq!(
            err.to_string(),
            "Invalid scripting engine memory info: gc_info is empty"
        );
    }

    #[test]
    fn test_json_error_conversion() {
        let json_err = serde_json::from_str::<serde_json::Value>("{oops").unwrap_err();
        let err: PerformanceError = json_err.into();
        assert!(matches!(err, PerformanceError::Json(_)));
    }
}
