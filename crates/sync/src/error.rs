//! Sync engine errors

use crate::transport::TransportError;
use thiserror::Error;
use waymark_store::StoreError;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Local apply refused the envelope; carries `"<category>:<reason>"`.
    #[error("Envelope rejected: {reason}")]
    Rejected { reason: String },

    #[error("Unknown entity: {0}")]
    UnknownEntity(String),
}

pub type Result<T> = std::result::Result<T, SyncError>;
