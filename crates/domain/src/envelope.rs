//! Signed event envelope: the unit of replication.
//!
//! Envelopes are immutable once built. `payload_hash` is the SHA-256 of the
//! canonical JSON form of the payload (keys sorted), so two devices that
//! agree on the payload agree on the hash regardless of insertion order.

use crate::error::{DomainError, Result};
use crate::event_type::EventType;
use crate::geo::{CoordinateError, Coordinates};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;
use waymark_core::Clock;
use waymark_crypto::{
    device_pseudonym, sha256_hex, signing_message, EnvelopeSignature, IdentityError,
    SigningIdentity,
};

/// String-to-string payload. `BTreeMap` keeps keys sorted.
pub type Payload = BTreeMap<String, String>;

/// SHA-256 hex of the canonical JSON object for `payload`.
pub fn canonical_hash<'a, I>(payload: I) -> String
where
    I: IntoIterator<Item = (&'a String, &'a String)>,
{
    let sorted: BTreeMap<&String, &String> = payload.into_iter().collect();
    let object: serde_json::Map<String, serde_json::Value> = sorted
        .into_iter()
        .map(|(k, v)| (k.clone(), serde_json::Value::String(v.clone())))
        .collect();
    sha256_hex(serde_json::Value::Object(object).to_string().as_bytes())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub event_type: EventType,
    /// `"<kind>:<uuid>"`
    pub entity_id: String,
    /// Lower-case hex x-only public key
    pub author_pubkey: String,
    /// UUID v4, independent of content
    pub event_id: String,
    /// Author-assigned Unix seconds
    pub created_at: i64,
    /// Per-device counter; a causality hint only
    pub lamport_clock: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<i64>,
    pub payload: Payload,
    pub payload_hash: String,
    pub signature: EnvelopeSignature,
}

impl Envelope {
    /// Merge timestamp: numeric payload `updated_at`, else `created_at`.
    pub fn updated_at(&self) -> i64 {
        self.payload
            .get("updated_at")
            .and_then(|v| v.trim().parse::<i64>().ok())
            .unwrap_or(self.created_at)
    }

    pub fn coordinates(&self) -> std::result::Result<Option<Coordinates>, CoordinateError> {
        Coordinates::from_payload(&self.payload)
    }

    pub fn is_signed(&self) -> bool {
        self.signature.is_genuine()
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| DomainError::SerializationError(e.to_string()))
    }

    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| DomainError::SerializationError(e.to_string()))
    }
}

/// Everything an envelope carries except the hash and signature.
#[derive(Debug, Clone)]
pub struct UnsignedEnvelope {
    pub event_type: EventType,
    pub entity_id: String,
    pub author_pubkey: String,
    pub event_id: String,
    pub created_at: i64,
    pub lamport_clock: u64,
    pub expires_at: Option<i64>,
    pub payload: Payload,
}

impl UnsignedEnvelope {
    /// Hash the payload and sign it.
    ///
    /// An identity that is absent or reports [`IdentityError::Unavailable`]
    /// yields a placeholder signature. Any other signing failure is also
    /// degraded to a placeholder so authoring never blocks.
    pub fn seal(self, identity: Option<&dyn SigningIdentity>) -> Envelope {
        let payload_hash = canonical_hash(&self.payload);
        let signature = match identity {
            Some(identity) => {
                let message = signing_message(&payload_hash, &self.author_pubkey);
                match identity.sign(&message) {
                    Ok(sig) => EnvelopeSignature::Genuine(sig),
                    Err(IdentityError::Unavailable { reason }) => {
                        debug!(event_id = %self.event_id, reason = %reason, "Identity unavailable, using placeholder signature");
                        EnvelopeSignature::placeholder(&payload_hash, &self.author_pubkey)
                    }
                    Err(e) => {
                        debug!(event_id = %self.event_id, error = %e, "Signing failed, using placeholder signature");
                        EnvelopeSignature::placeholder(&payload_hash, &self.author_pubkey)
                    }
                }
            }
            None => EnvelopeSignature::placeholder(&payload_hash, &self.author_pubkey),
        };

        Envelope {
            event_type: self.event_type,
            entity_id: self.entity_id,
            author_pubkey: self.author_pubkey,
            event_id: self.event_id,
            created_at: self.created_at,
            lamport_clock: self.lamport_clock,
            expires_at: self.expires_at,
            payload: self.payload,
            payload_hash,
            signature,
        }
    }
}

/// Monotonic per-device Lamport counter.
#[derive(Debug, Default)]
pub struct LamportClock {
    value: AtomicU64,
}

impl LamportClock {
    pub fn new(start: u64) -> Self {
        Self {
            value: AtomicU64::new(start),
        }
    }

    /// Advance and return the new value.
    pub fn tick(&self) -> u64 {
        self.value.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Fold in a value seen on an inbound event.
    pub fn observe(&self, seen: u64) {
        self.value.fetch_max(seen, Ordering::SeqCst);
    }

    pub fn current(&self) -> u64 {
        self.value.load(Ordering::SeqCst)
    }
}

/// Builds envelopes for the local author.
pub struct EnvelopeFactory {
    identity: Option<Arc<dyn SigningIdentity>>,
    device_author: String,
    lamport: Arc<LamportClock>,
    clock: Arc<dyn Clock>,
}

impl EnvelopeFactory {
    /// `device_id` seeds the fallback author key used when no identity is
    /// configured.
    pub fn new(
        identity: Option<Arc<dyn SigningIdentity>>,
        device_id: &str,
        lamport: Arc<LamportClock>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            identity,
            device_author: device_pseudonym(device_id),
            lamport,
            clock,
        }
    }

    /// Author key envelopes will carry.
    pub fn author_pubkey(&self) -> String {
        match &self.identity {
            Some(identity) => identity.public_key_hex(),
            None => self.device_author.clone(),
        }
    }

    pub fn lamport(&self) -> &Arc<LamportClock> {
        &self.lamport
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn build(&self, event_type: EventType, entity_id: &str, payload: Payload) -> Envelope {
        self.build_expiring(event_type, entity_id, payload, None)
    }

    pub fn build_expiring(
        &self,
        event_type: EventType,
        entity_id: &str,
        payload: Payload,
        expires_at: Option<i64>,
    ) -> Envelope {
        let unsigned = UnsignedEnvelope {
            event_type,
            entity_id: entity_id.to_string(),
            author_pubkey: self.author_pubkey(),
            event_id: uuid::Uuid::new_v4().to_string(),
            created_at: self.clock.now_secs(),
            lamport_clock: self.lamport.tick(),
            expires_at,
            payload,
        };
        unsigned.seal(self.identity.as_deref())
    }
}

/// One-shot build without a shared factory.
pub fn build(
    event_type: EventType,
    entity_id: &str,
    payload: Payload,
    identity: Option<&dyn SigningIdentity>,
    author_pubkey: &str,
    created_at: i64,
    lamport_clock: u64,
) -> Envelope {
    let author_pubkey = identity
        .map(|identity| identity.public_key_hex())
        .unwrap_or_else(|| author_pubkey.to_string());
    UnsignedEnvelope {
        event_type,
        entity_id: entity_id.to_string(),
        author_pubkey,
        event_id: uuid::Uuid::new_v4().to_string(),
        created_at,
        lamport_clock,
        expires_at: None,
        payload,
    }
    .seal(identity)
}

/// Fresh `"<kind>:<uuid>"` id for a new entity.
pub fn new_entity_id(kind: crate::event_type::EntityKind) -> String {
    format!("{}:{}", kind.as_str(), uuid::Uuid::new_v4())
}
