use bridge_traits::BridgeError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SchemaError {
    #[error("Failed to fetch schema: {0}")]
    Fetch(String),

    #[error("Failed to parse schema: {0}")]
    Parse(String),

    #[error("HTTP error while fetching schema: {0}")]
    Http(#[from] BridgeError),
}

pub type Result<T> = std::result::Result<T, SchemaError>;
