use thiserror::Error;

/// Errors that stop the bridge from starting or serving
#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Access token variable {0} is not set")]
    MissingCredentials(String),

    #[error("Invalid API URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
}
