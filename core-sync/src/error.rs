use core_auth::AuthError;
use core_schema::SchemaError;
use core_store::StoreError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Schema error: {0}")]
    Schema(#[from] SchemaError),

    #[error("Auth error: {0}")]
    Auth(#[from] AuthError),

    #[error("Network error: {0}")]
    TransientNetwork(String),

    #[error("Unexpected response shape: {0}")]
    DataShape(String),

    #[error("Persistence error: {0}")]
    Persistence(StoreError),

    #[error("Lease on {0} was taken over by another worker")]
    LeaseLost(String),

    #[error("Invalid state transition from {from} to {to}: {reason}")]
    InvalidStateTransition {
        from: String,
        to: String,
        reason: String,
    },

    #[error("Sync cancelled")]
    Cancelled,
}

impl SyncError {
    /// Errors that stop the whole cycle rather than one collection.
    pub fn is_fatal_to_run(&self) -> bool {
        matches!(self, SyncError::Schema(_) | SyncError::Auth(_))
    }
}

impl From<StoreError> for SyncError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::LeaseLost { collection, .. } => SyncError::LeaseLost(collection),
            other => SyncError::Persistence(other),
        }
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
