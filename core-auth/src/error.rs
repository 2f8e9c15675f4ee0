use bridge_traits::BridgeError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("Missing credentials: {0}")]
    MissingCredentials(String),

    #[error("Token request failed: {0}")]
    TokenRequestFailed(String),

    #[error("No endpoint found for account {0}")]
    EndpointNotFound(String),

    #[error("Directory lookup failed: {0}")]
    DirectoryLookupFailed(String),

    #[error("HTTP error: {0}")]
    Http(#[from] BridgeError),
}

pub type Result<T> = std::result::Result<T, AuthError>;
