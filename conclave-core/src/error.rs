use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("{message}")]
    Ambiguous {
        message: String,
        candidates: Vec<String>,
    },

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    #[error("Transient failure: {0}")]
    Transient(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Ambiguous-room error carrying the candidate channel ids so the HTTP
    /// layer can render the 409 payload.
    pub fn ambiguous_room(room_id: &str, candidates: Vec<String>) -> Self {
        Self::Ambiguous {
            message: format!(
                "Room ID is ambiguous: '{room_id}' exists in multiple tenants, pass a clientId"
            ),
            candidates,
        }
    }

    /// Transient errors are safe to retry without operator intervention.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
