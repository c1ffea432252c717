//! Error types for timing records.

use thiserror::Error;

/// Reasons a timestamp write is refused.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TimingError {
    /// Key was empty
    #[error("Timing key is empty")]
    EmptyKey,

    /// Timestamp was zero
    #[error("Timestamp for `{0}` is zero")]
    ZeroTimestamp(String),

    /// Key already has a timestamp; the first write wins
    #[error("Timestamp for `{0}` already recorded")]
    Duplicate(String),
}

/// Result type for timing writes.
pub type TimingResult<T> = Result<T, TimingError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(TimingError::EmptyKey.to_string(), "Timing key is empty");
        assert_eq!(
            TimingError::Duplicate("paint_end".to_string()).to_string(),
            "Timestamp for `paint_end` already recorded"
        );
    }
}
