//! Signing identity capability.
//!
//! The sync engine never owns key material. It borrows a [`SigningIdentity`]
//! from the host, which may refuse to sign for a while (locked keychain).
//! Callers degrade to placeholder signatures instead of blocking.

use k256::schnorr::SigningKey;
use rand::rngs::OsRng;
use rand::RngCore;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use zeroize::Zeroize;

/// Errors surfaced by a signing identity.
#[derive(Debug, Error)]
pub enum IdentityError {
    /// The identity exists but cannot sign right now
    #[error("Signing identity unavailable: {reason}")]
    Unavailable { reason: String },

    #[error("Invalid key material: {reason}")]
    InvalidKey { reason: String },

    #[error("Signing failed: {reason}")]
    SigningFailed { reason: String },
}

/// A read-mostly signing capability.
pub trait SigningIdentity: Send + Sync {
    /// Lower-case hex x-only public key (32 bytes, 64 hex chars).
    fn public_key_hex(&self) -> String;

    /// BIP-340 Schnorr signature over a 32-byte message.
    fn sign(&self, message: &[u8; 32]) -> Result<[u8; 64], IdentityError>;
}

/// In-process secp256k1 Schnorr identity.
pub struct SchnorrIdentity {
    signing_key: SigningKey,
    public_key_hex: String,
}

impl SchnorrIdentity {
    /// Generate a fresh random identity.
    pub fn generate() -> Self {
        Self::from_signing_key(SigningKey::random(&mut OsRng))
    }

    /// Load an identity from a hex-encoded 32-byte secret.
    ///
    /// # Security
    /// The decoded secret bytes are zeroized after use.
    pub fn from_secret_hex(secret_hex: &str) -> Result<Self, IdentityError> {
        let mut bytes = hex::decode(secret_hex.trim()).map_err(|e| IdentityError::InvalidKey {
            reason: format!("secret is not hex: {e}"),
        })?;

        if bytes.len() != 32 {
            let len = bytes.len();
            bytes.zeroize();
            return Err(IdentityError::InvalidKey {
                reason: format!("Invalid key length: {len} (expected 32)"),
            });
        }

        let result = SigningKey::from_bytes(&bytes);
        bytes.zeroize();

        let signing_key = result.map_err(|e| IdentityError::InvalidKey {
            reason: e.to_string(),
        })?;
        Ok(Self::from_signing_key(signing_key))
    }

    fn from_signing_key(signing_key: SigningKey) -> Self {
        let public_key_hex = hex::encode(signing_key.verifying_key().to_bytes());
        Self {
            signing_key,
            public_key_hex,
        }
    }
}

impl SigningIdentity for SchnorrIdentity {
    fn public_key_hex(&self) -> String {
        self.public_key_hex.clone()
    }

    fn sign(&self, message: &[u8; 32]) -> Result<[u8; 64], IdentityError> {
        // Fresh auxiliary randomness for every signature.
        let mut aux_rand = [0u8; 32];
        OsRng.fill_bytes(&mut aux_rand);

        let result = self.signing_key.sign_raw(message, &aux_rand);
        aux_rand.zeroize();

        let signature = result.map_err(|e| IdentityError::SigningFailed {
            reason: e.to_string(),
        })?;
        Ok(signature.to_bytes())
    }
}

/// Wraps an identity behind a lock switch, mirroring a host keychain that
/// can be locked while the app keeps running.
pub struct GatedIdentity {
    inner: Arc<dyn SigningIdentity>,
    unlocked: AtomicBool,
}

impl GatedIdentity {
    pub fn new(inner: Arc<dyn SigningIdentity>) -> Self {
        Self {
            inner,
            unlocked: AtomicBool::new(true),
        }
    }

    pub fn lock(&self) {
        self.unlocked.store(false, Ordering::SeqCst);
    }

    pub fn unlock(&self) {
        self.unlocked.store(true, Ordering::SeqCst);
    }

    pub fn is_unlocked(&self) -> bool {
        self.unlocked.load(Ordering::SeqCst)
    }
}

impl SigningIdentity for GatedIdentity {
    fn public_key_hex(&self) -> String {
        self.inner.public_key_hex()
    }

    fn sign(&self, message: &[u8; 32]) -> Result<[u8; 64], IdentityError> {
        if !self.is_unlocked() {
            return Err(IdentityError::Unavailable {
                reason: "keychain locked".to_string(),
            });
        }
        self.inner.sign(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signature::verify_schnorr;

    #[test]
    fn test_generated_identity_signs_verifiably() {
        let identity = SchnorrIdentity::generate();
        let message = [7u8; 32];

        let signature = identity.sign(&message).unwrap();
        assert!(verify_schnorr(&identity.public_key_hex(), &message, &signature).is_ok());
    }

    #[test]
    fn test_signatures_use_fresh_randomness() {
        let identity = SchnorrIdentity::generate();
        let message = [1u8; 32];

        let first = identity.sign(&message).unwrap();
        let second = identity.sign(&message).unwrap();
        assert_ne!(first, second);
    }

    #[test]
    fn test_from_secret_hex_is_deterministic() {
        let secret = "0000000000000000000000000000000000000000000000000000000000000003";
        let a = SchnorrIdentity::from_secret_hex(secret).unwrap();
        let b = SchnorrIdentity::from_secret_hex(secret).unwrap();
        assert_eq!(a.public_key_hex(), b.public_key_hex());
        // BIP-340 test vector 0 public key
        assert_eq!(
            a.public_key_hex(),
            "f9308a019258c31049344f85f89d5229b531c845836f99b08601f113bce036f9"
        );
    }

    #[test]
    fn test_invalid_secrets_rejected() {
        assert!(SchnorrIdentity::from_secret_hex("zz").is_err());
        assert!(SchnorrIdentity::from_secret_hex("abcd").is_err());
        let zero = "0".repeat(64);
        assert!(SchnorrIdentity::from_secret_hex(&zero).is_err());
    }

    #[test]
    fn test_gated_identity_refuses_when_locked() {
        let gated = GatedIdentity::new(Arc::new(SchnorrIdentity::generate()));
        gated.lock();
        assert!(matches!(
            gated.sign(&[0u8; 32]),
            Err(IdentityError::Unavailable { .. })
        ));

        gated.unlock();
        assert!(gated.sign(&[0u8; 32]).is_ok());
    }
}
