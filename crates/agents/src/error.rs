//! Error types for the agent facades.

/// Result type for facade operations.
pub type AgentsResult<T> = Result<T, AgentsError>;

#[derive(Debug, thiserror::Error)]
pub enum AgentsError {
    /// Transport-level failure: connect refused, timeout, TLS, etc.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Endpoint answered with a non-success status.
    #[error("endpoint returned status {status}: {body}")]
    Api { status: u16, body: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Registry returned a JSON-RPC error object.
    #[error("registry error {code}: {message}")]
    Rpc { code: i32, message: String },

    #[error("invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("configuration error: {0}")]
    Config(String),

    /// Endpoint answered but carried no usable payload.
    #[error("empty response from {0}")]
    Empty(String),
}

impl AgentsError {
    pub fn api(status: reqwest::StatusCode, body: impl Into<String>) -> Self {
        Self::Api {
            status: status.as_u16(),
            body: body.into(),
        }
    }
}
