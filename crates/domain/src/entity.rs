//! Materialized entity state and the actor-scoped side tables.

use crate::envelope::{Envelope, Payload};
use crate::event_type::{Action, EntityKind};
use crate::geo::Coordinates;
use serde::{Deserialize, Serialize};

/// Base reliability used when an entity does not state one.
pub const DEFAULT_BASE_SCORE: u8 = 50;

/// Visibility of an entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    /// Only on this device until the publication gate accepts it
    Personal,
    /// Shared over the transports
    Network,
}

impl Scope {
    pub fn as_str(&self) -> &'static str {
        match self {
            Scope::Personal => "personal",
            Scope::Network => "network",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "personal" => Some(Scope::Personal),
            "network" => Some(Scope::Network),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityRecord {
    pub entity_id: String,
    pub kind: EntityKind,
    pub fields: Payload,
    pub author_pubkey: String,
    /// Set on first write, never changed afterwards
    pub created_at: i64,
    /// LWW high-water mark
    pub updated_at: i64,
    pub retracted: bool,
    pub last_event_id: String,
    pub lamport_clock: u64,
    pub scope: Scope,
    pub base_score: u8,
    /// Routes and services only
    pub trust_score: Option<u8>,
    /// Source tier 0..=3, routes and services only
    pub trust_tier: u8,
}

impl EntityRecord {
    /// Fresh record from the first lifecycle envelope seen for an entity.
    pub fn from_envelope(envelope: &Envelope, scope: Scope) -> Self {
        let mut record = Self {
            entity_id: envelope.entity_id.clone(),
            kind: envelope.event_type.kind(),
            fields: Payload::new(),
            author_pubkey: envelope.author_pubkey.clone(),
            created_at: envelope.created_at,
            updated_at: envelope.updated_at(),
            retracted: false,
            last_event_id: envelope.event_id.clone(),
            lamport_clock: envelope.lamport_clock,
            scope,
            base_score: DEFAULT_BASE_SCORE,
            trust_score: None,
            trust_tier: 0,
        };
        record.overwrite(envelope);
        record
    }

    /// Replace state with a winning envelope. `created_at` and `scope` stay.
    pub fn overwrite(&mut self, envelope: &Envelope) {
        let action = envelope.event_type.action();
        if action != Action::Retract {
            self.fields = envelope.payload.clone();
            self.base_score = base_score_of(&envelope.payload).unwrap_or(self.base_score);
        }
        self.retracted = action == Action::Retract;
        self.author_pubkey = envelope.author_pubkey.clone();
        self.updated_at = envelope.updated_at();
        self.last_event_id = envelope.event_id.clone();
        self.lamport_clock = envelope.lamport_clock;
    }

    /// Display name: `name`, else `title`.
    pub fn name(&self) -> Option<&str> {
        self.fields
            .get("name")
            .or_else(|| self.fields.get("title"))
            .map(String::as_str)
    }

    pub fn coordinates(&self) -> Option<Coordinates> {
        Coordinates::from_payload(&self.fields).ok().flatten()
    }
}

fn base_score_of(payload: &Payload) -> Option<u8> {
    payload
        .get("base_reliability")
        .and_then(|v| v.trim().parse::<u8>().ok())
        .map(|v| v.min(100))
}

/// One actor's endorsement of a route or service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Endorsement {
    pub entity_id: String,
    pub actor: String,
    /// 1..=5
    pub score: u8,
    pub comment: Option<String>,
    pub created_at: i64,
    pub event_id: String,
    /// Placeholder-signed entries are kept but never scored
    pub authenticated: bool,
}

/// One actor's report against a route or service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub entity_id: String,
    pub actor: String,
    pub reason: String,
    pub created_at: i64,
    pub event_id: String,
    pub authenticated: bool,
}

/// Photo metadata consumed by the quality gate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhotoMeta {
    pub width: u32,
    pub height: u32,
    pub bytes: u64,
    pub sha256: String,
}
