use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Invalid identifier: {0:?}")]
    InvalidIdentifier(String),

    #[error("Collection {0} has no id field")]
    MissingPrimaryKey(String),

    #[error("Lease on {collection} is no longer held by {owner}")]
    LeaseLost { collection: String, owner: String },
}

pub type Result<T> = std::result::Result<T, StoreError>;
