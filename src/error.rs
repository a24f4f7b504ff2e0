use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid URL: {0}")]
    Url(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Test error: {0}")]
    Test(String),
}

pub type Result<T> = std::result::Result<T, Error>;
