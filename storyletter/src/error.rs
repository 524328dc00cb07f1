use thiserror::Error;

/// Domain error taxonomy for the lifecycle, distribution and metrics engines.
///
/// Individual send failures inside a broadcast are recovered locally and
/// counted; they never surface as a `Transport` error for the whole run.
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed writer output or missing required payload fields.
    /// Nothing is persisted when validation fails.
    #[error("validation failed: {0}")]
    Validation(String),

    /// No story for the requested date, no draft to resend, etc.
    #[error("not found: {0}")]
    NotFound(String),

    /// Story exists but is not in a distributable state.
    #[error("precondition failed: {0}")]
    Precondition(String),

    /// Writer service or email transport failure.
    #[error("transport error: {0}")]
    Transport(String),

    /// Repository read/write failure; fatal for the current operation.
    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn transport(err: impl std::fmt::Display) -> Self {
        Error::Transport(err.to_string())
    }
}
