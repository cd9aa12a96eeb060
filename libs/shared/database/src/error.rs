use thiserror::Error;

/// Failures at the storage boundary.
#[derive(Error, Debug)]
pub enum DatabaseError {
    /// A uniqueness guard rejected the write (PostgREST answers 409).
    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Authentication error: {0}")]
    Auth(String),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Decode error: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl DatabaseError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, DatabaseError::Conflict(_))
    }

    /// Maps a non-success PostgREST status to a typed error.
    pub fn from_status(status: u16, body: String) -> Self {
        match status {
            401 | 403 => DatabaseError::Auth(body),
            404 => DatabaseError::NotFound(body),
            409 => DatabaseError::Conflict(body),
            _ => DatabaseError::Api { status, message: body },
        }
    }
}
