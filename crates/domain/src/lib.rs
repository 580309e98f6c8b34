//! Domain model for the Waymark sync engine.
//!
//! This crate contains pure domain logic with no I/O dependencies:
//! - The closed set of replicated event types
//! - Envelope construction, canonical hashing and signing
//! - Structural and policy validation of envelopes
//! - Entity records and the endorsement/report side tables
//! - Geographic helpers (bounds, distance, geohash)

pub mod entity;
pub mod envelope;
pub mod error;
pub mod event_type;
pub mod geo;
pub mod transport;
pub mod validation;

pub use entity::{Endorsement, EntityRecord, PhotoMeta, Report, Scope, DEFAULT_BASE_SCORE};
pub use envelope::{
    build, canonical_hash, new_entity_id, Envelope, EnvelopeFactory, LamportClock, Payload,
    UnsignedEnvelope,
};
pub use error::{DomainError, Result};
pub use event_type::{Action, EntityKind, EventType};
pub use geo::{CoordinateError, Coordinates};
pub use transport::Transport;
pub use validation::{validate, FailureCategory, Origin, ValidationContext, ValidationFailure};

pub use waymark_crypto::{Authenticity, EnvelopeSignature};
