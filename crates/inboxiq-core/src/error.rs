use thiserror::Error;

/// Errors surfaced by the core to the front end.
///
/// None of these are fatal: transport problems are retried by the
/// connection manager, and `Unauthorized` sends the user back to login.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("not connected to the assistant backend")]
    NotConnected,

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("API error {status}: {message}")]
    Api { status: u16, message: String },

    #[error("transport error: {0}")]
    Transport(String),

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl ClientError {
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, ClientError::Unauthorized(_))
    }
}
