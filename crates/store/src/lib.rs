//! Durable state for the Waymark sync engine.
//!
//! - Outbox rows with one retry lane per transport
//! - Materialized entities and the endorsement/report side tables
//! - Per-transport pull cursors
//! - Publication queue and its processing history
//!
//! Two implementations share every semantic: [`SqliteStore`] (rusqlite,
//! WAL, one connection behind a mutex) and [`MemoryStore`].

pub mod error;
pub mod memory;
pub mod outbox;
pub mod sqlite;
pub mod state;

pub use error::{Result, StoreError};
pub use memory::MemoryStore;
pub use outbox::{
    Lane, OutboxRow, OutboxStatus, OutboxStore, RetryPolicy, Transition, NO_ELIGIBLE_TRANSPORT,
};
pub use sqlite::SqliteStore;
pub use state::{
    cursor_is_ahead, CursorStore, EntityStore, PublicationEntry, PublicationQueue, SyncStore,
};
