use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("Platform returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Not authenticated")]
    NotAuthenticated,

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Schedule {0} not found")]
    ScheduleNotFound(String),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
