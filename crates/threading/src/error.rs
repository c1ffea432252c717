//! Error types for loops, runners and actors.

use thiserror::Error;

/// Errors produced by the threading substrate.
#[derive(Debug, Error)]
pub enum ThreadingError {
    /// The OS refused to start a loop thread
    #[error("Failed to spawn thread `{name}`: {source}")]
    Spawn {
        /// Requested thread name
        name: String,
        /// Underlying io error
        #[source]
        source: std::io::Error,
    },

    /// The runner stopped before the posted task replied
    #[error("Task runner `{0}` terminated before the task completed")]
    RunnerTerminated(String),

    /// The actor's implementation was released or never attached
    #[error("Actor for instance {0} has been released")]
    ActorReleased(i32),

    /// The actor was created disabled
    #[error("Actor for instance {0} is disabled")]
    ActorDisabled(i32),

    /// A synchronous call re-entered the actor it is already running on
    #[error("Re-entrant synchronous call on actor for instance {0}")]
    Reentrant(i32),
}

/// Result type for threading operations.
pub type ThreadingResult<T> = Result<T, ThreadingError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ThreadingError::ActorReleased(7);
        assert_eq!(err.to_string(), "Actor for instance 7 has been released");

        let err = ThreadingError::RunnerTerminated("lynx-js".to_string());
        assert_eq!(
            err.to_string(),
            "Task runner `lynx-js` terminated before the task completed"
        );
    }

    #[test]
    fn test_spawn_error_keeps_source() {
        let err = ThreadingError::Spawn {
            name: "lynx-tasm".to_string(),
            source: std::io::Error::new(std::io::ErrorKind::Other, "no threads"),
        };
        assert!(std::error::Error::source(&err).is_some());
    }
}
