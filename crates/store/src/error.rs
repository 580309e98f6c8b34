//! Store errors

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    DatabaseError(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Outbox row not found: {event_id}")]
    NotFound { event_id: String },

    #[error("Stored data is corrupt: {0}")]
    Corrupt(String),

    #[error("Store lock poisoned")]
    LockPoisoned,
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::SerializationError(e.to_string())
    }
}

impl From<waymark_domain::DomainError> for StoreError {
    fn from(e: waymark_domain::DomainError) -> Self {
        StoreError::SerializationError(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;
