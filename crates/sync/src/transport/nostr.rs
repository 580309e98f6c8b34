//! Signed relay notes carrying envelopes.
//!
//! A note id is the SHA-256 of `[0, pubkey, created_at, kind, tags,
//! content]` serialized as compact JSON; the signature is BIP-340 Schnorr
//! over that id by the note author.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use waymark_crypto::{sha256, verify_schnorr, IdentityError, SigningIdentity, GENUINE_SIGNATURE_LEN};
use waymark_domain::Envelope;

/// Application-specific replaceable note kind.
pub const NOTE_KIND: u32 = 30078;
pub const SYNC_TAG: &str = "waymark-sync";
pub const CONTENT_PREFIX: &str = "waymark:v1:";

#[derive(Debug, Error)]
pub enum NoteError {
    #[error("Note id does not match its contents")]
    IdMismatch,

    #[error("Note signature invalid")]
    SignatureInvalid,

    #[error("Note content is not a waymark envelope: {0}")]
    NotAnEnvelope(String),

    #[error("Note could not be signed: {0}")]
    Signing(#[from] IdentityError),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Note {
    pub id: String,
    pub pubkey: String,
    pub created_at: i64,
    pub kind: u32,
    pub tags: Vec<Vec<String>>,
    pub content: String,
    pub sig: String,
}

fn note_id(pubkey: &str, created_at: i64, kind: u32, tags: &[Vec<String>], content: &str) -> [u8; 32] {
    let commitment = serde_json::json!([0, pubkey, created_at, kind, tags, content]);
    sha256(commitment.to_string().as_bytes())
}

fn tag(name: &str, value: &str) -> Vec<String> {
    vec![name.to_string(), value.to_string()]
}

impl Note {
    /// Wrap an envelope in a note signed by `identity`.
    pub fn for_envelope(
        envelope: &Envelope,
        geohash: Option<&str>,
        identity: &dyn SigningIdentity,
        created_at: i64,
    ) -> Result<Self, NoteError> {
        let json = envelope
            .to_json()
            .map_err(|e| NoteError::NotAnEnvelope(e.to_string()))?;
        let content = format!("{CONTENT_PREFIX}{}", URL_SAFE_NO_PAD.encode(json.as_bytes()));

        let mut tags = vec![
            tag("t", SYNC_TAG),
            tag("d", &envelope.event_id),
            tag("event_id", &envelope.event_id),
            tag("event_type", envelope.event_type.as_str()),
        ];
        if let Some(geohash) = geohash {
            tags.push(tag("g", geohash));
        }

        let pubkey = identity.public_key_hex();
        let id = note_id(&pubkey, created_at, NOTE_KIND, &tags, &content);
        let sig = identity.sign(&id)?;

        Ok(Self {
            id: hex::encode(id),
            pubkey,
            created_at,
            kind: NOTE_KIND,
            tags,
            content,
            sig: hex::encode(sig),
        })
    }

    /// First value of the named tag.
    pub fn tag_value(&self, name: &str) -> Option<&str> {
        self.tags
            .iter()
            .find(|t| t.first().map(String::as_str) == Some(name))
            .and_then(|t| t.get(1))
            .map(String::as_str)
    }

    /// Check the id commitment and the author signature.
    pub fn verify(&self) -> Result<(), NoteError> {
        let expected = note_id(&self.pubkey, self.created_at, self.kind, &self.tags, &self.content);
        if hex::encode(expected) != self.id {
            return Err(NoteError::IdMismatch);
        }
        let sig_bytes = hex::decode(&self.sig).map_err(|_| NoteError::SignatureInvalid)?;
        let sig: [u8; GENUINE_SIGNATURE_LEN] = sig_bytes
            .try_into()
            .map_err(|_| NoteError::SignatureInvalid)?;
        verify_schnorr(&self.pubkey, &expected, &sig).map_err(|_| NoteError::SignatureInvalid)
    }

    pub fn decode_envelope(&self) -> Result<Envelope, NoteError> {
        let encoded = self
            .content
            .strip_prefix(CONTENT_PREFIX)
            .ok_or_else(|| NoteError::NotAnEnvelope("missing content prefix".to_string()))?;
        let bytes = URL_SAFE_NO_PAD
            .decode(encoded.trim())
            .map_err(|e| NoteError::NotAnEnvelope(e.to_string()))?;
        let json = String::from_utf8(bytes).map_err(|e| NoteError::NotAnEnvelope(e.to_string()))?;
        Envelope::from_json(&json).map_err(|e| NoteError::NotAnEnvelope(e.to_string()))
    }
}
