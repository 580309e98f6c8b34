//! Envelope signature variants.
//!
//! An envelope is signed either with a genuine BIP-340 Schnorr signature or,
//! when the signing identity is unavailable, with a deterministic placeholder
//! digest. On the wire both are hex strings; the variant is recovered from
//! the decoded length here and nowhere else.

use crate::hashing::signing_message;
use k256::schnorr::{Signature, VerifyingKey};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

/// Byte length of a genuine Schnorr signature.
pub const GENUINE_SIGNATURE_LEN: usize = 64;

/// Byte length of a placeholder digest.
pub const PLACEHOLDER_SIGNATURE_LEN: usize = 32;

const PLACEHOLDER_DOMAIN: &[u8] = b"waymark-placeholder-signature:";

/// Signature verification errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SignatureError {
    #[error("Signature has unexpected length {len}")]
    Malformed { len: usize },

    #[error("Signature is not hex")]
    NotHex,

    #[error("Author public key is malformed")]
    PublicKeyMalformed,

    #[error("Signature verification failed")]
    Invalid,
}

/// Whether a verified envelope is backed by a genuine signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Authenticity {
    /// Genuine signature verified against the author key
    Authenticated,
    /// Placeholder signature; accepted only as best-effort data
    Unauthenticated,
}

impl Authenticity {
    pub fn is_authenticated(&self) -> bool {
        matches!(self, Authenticity::Authenticated)
    }
}

/// Signature attached to an envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnvelopeSignature {
    /// BIP-340 Schnorr signature over `signing_message(payload_hash, author)`
    Genuine([u8; GENUINE_SIGNATURE_LEN]),
    /// Deterministic BLAKE3 digest over the same message
    Placeholder([u8; PLACEHOLDER_SIGNATURE_LEN]),
}

impl EnvelopeSignature {
    /// Build the placeholder signature for an unsigned envelope.
    pub fn placeholder(payload_hash: &str, author_pubkey: &str) -> Self {
        let message = signing_message(payload_hash, author_pubkey);
        let mut hasher = blake3::Hasher::new();
        hasher.update(PLACEHOLDER_DOMAIN);
        hasher.update(&message);
        EnvelopeSignature::Placeholder(*hasher.finalize().as_bytes())
    }

    pub fn is_genuine(&self) -> bool {
        matches!(self, EnvelopeSignature::Genuine(_))
    }

    pub fn to_hex(&self) -> String {
        match self {
            EnvelopeSignature::Genuine(bytes) => hex::encode(bytes),
            EnvelopeSignature::Placeholder(bytes) => hex::encode(bytes),
        }
    }

    pub fn from_hex(encoded: &str) -> Result<Self, SignatureError> {
        let bytes = hex::decode(encoded).map_err(|_| SignatureError::NotHex)?;
        match bytes.len() {
            GENUINE_SIGNATURE_LEN => {
                let mut sig = [0u8; GENUINE_SIGNATURE_LEN];
                sig.copy_from_slice(&bytes);
                Ok(EnvelopeSignature::Genuine(sig))
            }
            PLACEHOLDER_SIGNATURE_LEN => {
                let mut sig = [0u8; PLACEHOLDER_SIGNATURE_LEN];
                sig.copy_from_slice(&bytes);
                Ok(EnvelopeSignature::Placeholder(sig))
            }
            len => Err(SignatureError::Malformed { len }),
        }
    }

    /// Verify this signature for the given payload hash and author.
    ///
    /// Genuine signatures must verify against the author key. Placeholder
    /// signatures are recomputed and compared; a match only ever yields
    /// [`Authenticity::Unauthenticated`].
    pub fn verify(
        &self,
        payload_hash: &str,
        author_pubkey: &str,
    ) -> Result<Authenticity, SignatureError> {
        match self {
            EnvelopeSignature::Genuine(sig) => {
                let message = signing_message(payload_hash, author_pubkey);
                verify_schnorr(author_pubkey, &message, sig)?;
                Ok(Authenticity::Authenticated)
            }
            EnvelopeSignature::Placeholder(_) => {
                if *self == Self::placeholder(payload_hash, author_pubkey) {
                    Ok(Authenticity::Unauthenticated)
                } else {
                    Err(SignatureError::Invalid)
                }
            }
        }
    }
}

/// Verify a BIP-340 Schnorr signature over `message` by an x-only hex key.
pub fn verify_schnorr(
    pubkey_hex: &str,
    message: &[u8],
    signature: &[u8; GENUINE_SIGNATURE_LEN],
) -> Result<(), SignatureError> {
    let key_bytes = hex::decode(pubkey_hex).map_err(|_| SignatureError::PublicKeyMalformed)?;
    let key =
        VerifyingKey::from_bytes(&key_bytes).map_err(|_| SignatureError::PublicKeyMalformed)?;
    let signature = Signature::try_from(&signature[..]).map_err(|_| SignatureError::Malformed {
        len: GENUINE_SIGNATURE_LEN,
    })?;
    key.verify_raw(message, &signature)
        .map_err(|_| SignatureError::Invalid)
}

impl Serialize for EnvelopeSignature {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for EnvelopeSignature {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        EnvelopeSignature::from_hex(&encoded).map_err(serde::de::Error::custom)
    }
}
