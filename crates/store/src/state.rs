//! Entity, cursor and publication-queue storage traits.

use crate::error::Result;
use crate::outbox::OutboxStore;
use serde::{Deserialize, Serialize};
use waymark_domain::{Endorsement, EntityKind, EntityRecord, PhotoMeta, Report};

/// Materialized entity state and the actor-scoped side tables.
pub trait EntityStore: Send + Sync {
    fn get_entity(&self, entity_id: &str) -> Result<Option<EntityRecord>>;

    /// Insert or replace by `entity_id`.
    fn put_entity(&self, record: &EntityRecord) -> Result<()>;

    fn entities_of_kind(&self, kind: EntityKind) -> Result<Vec<EntityRecord>>;

    fn entities_by_author(&self, author_pubkey: &str) -> Result<Vec<EntityRecord>>;

    fn get_endorsement(&self, entity_id: &str, actor: &str) -> Result<Option<Endorsement>>;

    /// Insert or replace by `(entity_id, actor)`.
    fn put_endorsement(&self, endorsement: &Endorsement) -> Result<()>;

    fn endorsements_for(&self, entity_id: &str) -> Result<Vec<Endorsement>>;

    fn get_report(&self, entity_id: &str, actor: &str) -> Result<Option<Report>>;

    fn put_report(&self, report: &Report) -> Result<()>;

    fn reports_for(&self, entity_id: &str) -> Result<Vec<Report>>;

    /// Highest Lamport value recorded on any entity.
    fn max_lamport(&self) -> Result<u64>;
}

/// Per-transport pull positions.
pub trait CursorStore: Send + Sync {
    fn get_cursor(&self, key: &str) -> Result<Option<String>>;

    /// Store `position` if it is ahead of the stored one. Numeric positions
    /// compare numerically. Returns whether the cursor moved.
    fn advance_cursor(&self, key: &str, position: &str) -> Result<bool>;
}

/// A request to publish a personal entity network-wide.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicationEntry {
    pub entry_id: String,
    pub entity_id: String,
    pub author_pubkey: String,
    pub photos: Vec<PhotoMeta>,
    pub queued_at: i64,
}

pub trait PublicationQueue: Send + Sync {
    fn push_publication(&self, entry: &PublicationEntry) -> Result<()>;

    /// Oldest first.
    fn pending_publications(&self, limit: usize) -> Result<Vec<PublicationEntry>>;

    fn remove_publication(&self, entry_id: &str) -> Result<()>;

    /// Record a processed entry for rate limiting and author feedback.
    fn record_publication(
        &self,
        entry: &PublicationEntry,
        accepted: bool,
        reasons: &[String],
        processed_at: i64,
    ) -> Result<()>;

    /// Entries by `author_pubkey` processed at or after `since`.
    fn publications_since(&self, author_pubkey: &str, since: i64) -> Result<usize>;
}

/// Everything the sync engine needs from storage.
pub trait SyncStore: OutboxStore + EntityStore + CursorStore + PublicationQueue {}

impl<T> SyncStore for T where T: OutboxStore + EntityStore + CursorStore + PublicationQueue {}

/// Whether `candidate` is past `current`. Numeric positions compare numerically.
pub fn cursor_is_ahead(current: Option<&str>, candidate: &str) -> bool {
    match current {
        None => true,
        Some(current) => match (current.parse::<i128>(), candidate.parse::<i128>()) {
            (Ok(current), Ok(candidate)) => candidate > current,
            _ => candidate > current,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cursor_comparison_is_numeric() {
        assert!(cursor_is_ahead(None, "0"));
        assert!(cursor_is_ahead(Some("9"), "10"));
        assert!(!cursor_is_ahead(Some("10"), "9"));
        assert!(!cursor_is_ahead(Some("10"), "10"));
        assert!(cursor_is_ahead(Some("abc"), "abd"));
    }
}
