use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MatchmakingError {
    #[error("User {0} already has a pending request")]
    AlreadyEnqueued(String),

    #[error("Request queue is full")]
    QueueFull,

    #[error("Request for user {0} not found in pool")]
    NotFound(String),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl MatchmakingError {
    /// Stable error code reported to API callers in `AddRequestResponse::error`.
    pub fn code(&self) -> &'static str {
        match self {
            MatchmakingError::AlreadyEnqueued(_) => "already_enqueued",
            MatchmakingError::QueueFull => "queue_full",
            MatchmakingError::NotFound(_) => "not_found",
            MatchmakingError::Config(_) => "invalid_config",
        }
    }
}
