//! Domain errors
//!
//! Pure domain errors with no infrastructure dependencies

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DomainError {
    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Unknown event type: {0}")]
    UnknownEventType(String),

    #[error("Unknown entity kind: {0}")]
    UnknownEntityKind(String),

    #[error("Invalid geohash: {0}")]
    InvalidGeohash(String),
}

pub type Result<T> = std::result::Result<T, DomainError>;
