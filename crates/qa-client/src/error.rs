use thiserror::Error;

#[derive(Error, Debug)]
pub enum QaError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Stream error: {0}")]
    Stream(String),

    #[error("API error: {0}")]
    Api(String),

    /// 401 - the stored credential was rejected; re-authentication required.
    #[error("credential expired or invalid")]
    AuthExpired,

    /// 403 - the service demands a password change before serving queries.
    #[error("password change required")]
    PasswordRequired,

    /// Cooperative cancellation, not an error condition; carries no reason —
    /// the pending cancellation reason lives with the in-flight slot.
    #[error("request cancelled")]
    Cancelled,

    /// The single in-flight slot is occupied; the caller must cancel first.
    #[error("a request is already in flight")]
    RequestInFlight,
}

pub type Result<T> = std::result::Result<T, QaError>;
