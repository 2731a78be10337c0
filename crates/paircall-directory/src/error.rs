use thiserror::Error;

#[derive(Error, Debug)]
pub enum DirectoryError {
    #[error("Directory backend is gone")]
    Closed,

    #[error("Invalid path: {0:?}")]
    InvalidPath(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Directory rejected {operation} at {path}")]
    Rejected { operation: &'static str, path: String },

    #[error("Unexpected response: {0}")]
    UnexpectedResponse(String),
}

pub type Result<T> = std::result::Result<T, DirectoryError>;
