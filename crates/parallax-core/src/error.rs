//! Error types for Parallax Core
//!
//! Only configuration mistakes are errors here. Failures inside user
//! callbacks are isolated as [`StageError`](crate::stage::StageError), and
//! errors returned by behaviors are data captured by observations.

/// Fatal configuration error raised to the caller that made it
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExperimentError {
    /// A behavior with this name was already registered
    #[error("Duplicate behavior: {0}")]
    DuplicateBehavior(String),

    /// `run` was called without a control behavior
    #[error("Expected control behavior to be defined")]
    MissingControl,

    /// A blocking `run` would stall the current-thread runtime it is on
    #[error("Deferred control cannot be blocked on inside a current-thread runtime; use run_async")]
    BlockingInRuntime,
}
