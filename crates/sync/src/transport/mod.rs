//! Transport adapters.
//!
//! A transport pushes envelopes to a remote and pulls envelopes back. Each
//! push yields a per-event verdict; an event missing from the report was
//! never acknowledged and is retried.

pub mod hub;
pub mod nostr;
pub mod relay;

pub use hub::HubClient;
pub use relay::{GeoResolver, RelayClient, RelayDirectory, StoreGeoResolver};

use async_trait::async_trait;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use thiserror::Error;
use waymark_domain::{Envelope, FailureCategory, Transport};

/// Remote decision on one pushed event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Accepted,
    Rejected {
        category: FailureCategory,
        code: String,
    },
}

/// Per-event push outcome.
#[derive(Debug, Clone, Default)]
pub struct PushReport {
    verdicts: HashMap<String, Verdict>,
}

/// Ordering key for competing verdicts on one event; lower wins.
fn rejection_rank(verdict: &Verdict) -> (u8, &str) {
    match verdict {
        Verdict::Accepted => (0, ""),
        Verdict::Rejected { category, code } if !category.is_retryable() => (1, code.as_str()),
        Verdict::Rejected { code, .. } => (2, code.as_str()),
    }
}

impl PushReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn accept(&mut self, event_id: impl Into<String>) {
        self.verdicts.insert(event_id.into(), Verdict::Accepted);
    }

    /// Record a rejection. An acceptance already on file is kept; between
    /// two rejections the terminal one wins, then the lower code.
    pub fn reject(
        &mut self,
        event_id: impl Into<String>,
        category: FailureCategory,
        code: impl Into<String>,
    ) {
        let incoming = Verdict::Rejected {
            category,
            code: code.into(),
        };
        match self.verdicts.entry(event_id.into()) {
            Entry::Vacant(slot) => {
                slot.insert(incoming);
            }
            Entry::Occupied(mut slot) => {
                if rejection_rank(&incoming) < rejection_rank(slot.get()) {
                    slot.insert(incoming);
                }
            }
        }
    }

    pub fn verdict(&self, event_id: &str) -> Option<&Verdict> {
        self.verdicts.get(event_id)
    }

    pub fn len(&self) -> usize {
        self.verdicts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.verdicts.is_empty()
    }
}

/// An envelope received from a remote.
#[derive(Debug, Clone)]
pub struct InboundEnvelope {
    pub envelope: Envelope,
    /// Cursor position of this item on its transport
    pub position: String,
    /// Key that signed the carrying message, if the transport has one
    pub signer: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct PullBatch {
    pub items: Vec<InboundEnvelope>,
    /// Explicit resume position supplied by the remote
    pub next_cursor: Option<String>,
    /// Furthest position the cursor may move to. Set when part of the
    /// requested window was left unread, so the next pull resumes there.
    pub ceiling: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportErrorKind {
    Timeout,
    Http(u16),
    Network,
    BadResponse,
    NoRelays,
    NoIdentity,
}

/// A whole-request failure. Every event in the request is retried.
#[derive(Debug, Clone, Error)]
#[error("{transport} transport failed: {detail}")]
pub struct TransportError {
    pub transport: Transport,
    pub kind: TransportErrorKind,
    pub detail: String,
}

impl TransportError {
    pub fn new(transport: Transport, kind: TransportErrorKind, detail: impl Into<String>) -> Self {
        Self {
            transport,
            kind,
            detail: detail.into(),
        }
    }

    /// Short machine-readable code recorded on the outbox lane.
    pub fn code(&self) -> String {
        let prefix = code_prefix(self.transport);
        match self.kind {
            TransportErrorKind::Timeout => format!("{prefix}-timeout"),
            TransportErrorKind::Http(status) => format!("{prefix}-http-{status}"),
            TransportErrorKind::Network => format!("{prefix}-network"),
            TransportErrorKind::BadResponse => format!("{prefix}-bad-response"),
            TransportErrorKind::NoRelays => format!("{prefix}-no-relays"),
            TransportErrorKind::NoIdentity => format!("{prefix}-no-identity"),
        }
    }
}

pub(crate) fn code_prefix(transport: Transport) -> &'static str {
    match transport {
        Transport::Hub => "hub",
        Transport::Relay => "nostr",
    }
}

#[async_trait]
pub trait SyncTransport: Send + Sync {
    fn kind(&self) -> Transport;

    /// Code recorded when the remote never answered for an event.
    fn no_ack_code(&self) -> String {
        format!("{}-no-ack", code_prefix(self.kind()))
    }

    async fn push(&self, envelopes: &[Envelope]) -> Result<PushReport, TransportError>;

    async fn pull(&self, cursor: Option<&str>, limit: usize) -> Result<PullBatch, TransportError>;
}
