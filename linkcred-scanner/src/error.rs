use thiserror::Error;

#[derive(Error, Debug)]
pub enum LinkError {
    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// A call to the link service was rejected or could not be decoded.
    #[error("Link service unavailable: {0}")]
    RemoteUnavailable(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    /// The origin refused to let the client follow the redirect chain.
    #[error("Cross-origin restricted: {0}")]
    CorsRestricted(String),

    #[error("Unclassified failure for {url}: {reason}")]
    Unknown { url: String, reason: String },

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, LinkError>;
