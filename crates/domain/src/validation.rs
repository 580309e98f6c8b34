//! Structural and policy validation of envelopes.
//!
//! Validation is stateless: it looks at one envelope and the context it
//! arrived in. Checks that need local state (parent existence) live in the
//! merge engine and report through the same [`ValidationFailure`] shape.

use crate::envelope::{canonical_hash, Envelope};
use crate::event_type::{Action, EntityKind};
use crate::geo::{CoordinateError, Coordinates};
use serde::{Deserialize, Serialize};
use std::fmt;
use waymark_crypto::{Authenticity, EnvelopeSignature, SignatureError};

/// Envelopes stamped further than this into the future are rejected.
pub const MAX_CLOCK_SKEW_SECS: i64 = 600;

/// Remote failure taxonomy shared by validation and transports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureCategory {
    /// Delivery problem; the only retryable category
    TransportFailed,
    /// Malformed or unverifiable envelope
    ProtocolInvalid,
    /// Well-formed but refused by policy
    PolicyRejected,
}

impl FailureCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureCategory::TransportFailed => "transport_failed",
            FailureCategory::ProtocolInvalid => "protocol_invalid",
            FailureCategory::PolicyRejected => "policy_rejected",
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, FailureCategory::TransportFailed)
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "transport_failed" => Some(FailureCategory::TransportFailed),
            "protocol_invalid" => Some(FailureCategory::ProtocolInvalid),
            "policy_rejected" => Some(FailureCategory::PolicyRejected),
            _ => None,
        }
    }
}

impl fmt::Display for FailureCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationFailure {
    pub category: FailureCategory,
    pub reason: String,
}

impl ValidationFailure {
    pub fn protocol(reason: impl Into<String>) -> Self {
        Self {
            category: FailureCategory::ProtocolInvalid,
            reason: reason.into(),
        }
    }

    pub fn policy(reason: impl Into<String>) -> Self {
        Self {
            category: FailureCategory::PolicyRejected,
            reason: reason.into(),
        }
    }

    /// `"<category>:<reason>"`
    pub fn tag(&self) -> String {
        format!("{}:{}", self.category, self.reason)
    }
}

impl fmt::Display for ValidationFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.tag())
    }
}

impl std::error::Error for ValidationFailure {}

/// Where an envelope came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Origin {
    Local,
    Relay,
    Hub,
}

#[derive(Debug, Clone)]
pub struct ValidationContext {
    pub origin: Origin,
    /// Key that signed the carrying transport message, when known.
    pub transport_signer: Option<String>,
    pub allow_placeholder: bool,
    pub now: i64,
}

impl ValidationContext {
    pub fn local(now: i64) -> Self {
        Self {
            origin: Origin::Local,
            transport_signer: None,
            allow_placeholder: true,
            now,
        }
    }

    /// Placeholder-signed envelopes are accepted inbound but come back
    /// [`Authenticity::Unauthenticated`].
    pub fn inbound(origin: Origin, transport_signer: Option<String>, now: i64) -> Self {
        Self {
            origin,
            transport_signer,
            allow_placeholder: true,
            now,
        }
    }

    pub fn strict(mut self) -> Self {
        self.allow_placeholder = false;
        self
    }
}

/// Validate an envelope, returning whether it is authenticated.
pub fn validate(
    envelope: &Envelope,
    ctx: &ValidationContext,
) -> Result<Authenticity, ValidationFailure> {
    let authenticity = check_protocol(envelope, ctx)?;
    check_policy(envelope, ctx)?;
    Ok(authenticity)
}

fn check_protocol(
    envelope: &Envelope,
    ctx: &ValidationContext,
) -> Result<Authenticity, ValidationFailure> {
    let event_type = envelope.event_type;

    if ctx.origin == Origin::Relay && !event_type.is_broadcast() {
        return Err(ValidationFailure::protocol("event_kind_not_broadcast"));
    }

    match entity_kind(&envelope.entity_id) {
        None => return Err(ValidationFailure::protocol("entity_id_malformed")),
        Some(kind) if kind != event_type.kind() => {
            return Err(ValidationFailure::protocol("entity_kind_mismatch"))
        }
        Some(_) => {}
    }

    if uuid::Uuid::parse_str(&envelope.event_id).is_err() {
        return Err(ValidationFailure::protocol("event_id_malformed"));
    }

    if !is_pubkey_hex(&envelope.author_pubkey) {
        return Err(ValidationFailure::protocol("author_pubkey_malformed"));
    }

    if envelope.expires_at.is_some() && !event_type.allows_expiry() {
        return Err(ValidationFailure::protocol("expires_at_not_allowed"));
    }

    if canonical_hash(&envelope.payload) != envelope.payload_hash {
        return Err(ValidationFailure::protocol("payload_hash_mismatch"));
    }

    if let Some(signer) = &ctx.transport_signer {
        if !signer.eq_ignore_ascii_case(&envelope.author_pubkey) {
            return Err(ValidationFailure::protocol("author_signer_mismatch"));
        }
    }

    if matches!(envelope.signature, EnvelopeSignature::Placeholder(_)) && !ctx.allow_placeholder {
        return Err(ValidationFailure::protocol("placeholder_signature_rejected"));
    }

    envelope
        .signature
        .verify(&envelope.payload_hash, &envelope.author_pubkey)
        .map_err(|e| match e {
            SignatureError::Malformed { .. } | SignatureError::NotHex => {
                ValidationFailure::protocol("signature_malformed")
            }
            SignatureError::PublicKeyMalformed => {
                ValidationFailure::protocol("author_pubkey_malformed")
            }
            SignatureError::Invalid => ValidationFailure::protocol("signature_invalid"),
        })
}

fn check_policy(envelope: &Envelope, ctx: &ValidationContext) -> Result<(), ValidationFailure> {
    let event_type = envelope.event_type;

    for field in event_type.required_fields() {
        let present = envelope
            .payload
            .get(*field)
            .map(|v| !v.trim().is_empty())
            .unwrap_or(false);
        if !present {
            return Err(ValidationFailure::policy(format!("missing_field:{field}")));
        }
    }

    // Place-bound kinds already required lat/lon above.
    match Coordinates::from_payload(&envelope.payload) {
        Ok(_) => {}
        Err(CoordinateError::Missing | CoordinateError::Malformed) => {
            return Err(ValidationFailure::policy("coordinates_malformed"))
        }
        Err(CoordinateError::OutOfRange) => {
            return Err(ValidationFailure::policy("coordinates_out_of_range"))
        }
    }

    if event_type.action() == Action::Endorse {
        let score = envelope
            .payload
            .get("score")
            .and_then(|s| s.trim().parse::<i64>().ok());
        if !matches!(score, Some(1..=5)) {
            return Err(ValidationFailure::policy("endorsement_score_out_of_range"));
        }
    }

    if let Some(expires_at) = envelope.expires_at {
        if expires_at <= ctx.now {
            return Err(ValidationFailure::policy("expired"));
        }
    }

    let horizon = ctx.now + MAX_CLOCK_SKEW_SECS;
    if envelope.created_at > horizon || envelope.updated_at() > horizon {
        return Err(ValidationFailure::policy("timestamp_in_future"));
    }

    Ok(())
}

fn entity_kind(entity_id: &str) -> Option<EntityKind> {
    let (_, rest) = entity_id.split_once(':')?;
    let well_formed = rest
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if !well_formed {
        return None;
    }
    EntityKind::from_entity_id(entity_id)
}

fn is_pubkey_hex(value: &str) -> bool {
    value.len() == 64
        && value
            .bytes()
            .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}
