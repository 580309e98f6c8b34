//! Waymark sync engine.
//!
//! Wires the domain, store and trust crates into a running replica:
//! - [`merge`]: last-write-wins application of inbound and local envelopes
//! - [`dedup`]: collapses redundant outbox rows before transport
//! - [`transport`]: hub (HTTP) and relay (WebSocket notes) adapters
//! - [`orchestrator`]: the periodic push/pull tick
//! - [`local`]: authoring path for envelopes created on this device
//! - [`publication`]: quality gate from personal to network scope

pub mod dedup;
pub mod error;
pub mod local;
pub mod merge;
pub mod orchestrator;
pub mod publication;
pub mod transport;

pub use dedup::{dedup_due, DedupKey, DedupOutcome};
pub use error::{Result, SyncError};
pub use local::{AuthoredEvent, LocalAuthor};
pub use merge::{ApplyResult, MergeEngine};
pub use orchestrator::{SyncOrchestrator, SyncPhase, TickReport};
pub use publication::{PublicationGate, PublicationOutcome};
pub use transport::{
    GeoResolver, HubClient, InboundEnvelope, PullBatch, PushReport, RelayClient, RelayDirectory,
    StoreGeoResolver, SyncTransport, TransportError, TransportErrorKind, Verdict,
};
