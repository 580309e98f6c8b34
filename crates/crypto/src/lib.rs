//! Cryptographic primitives for the Waymark sync engine.
//!
//! # Core Capabilities
//!
//! - **Signing identity**: a capability owned by the host (keychain, seed
//!   phrase manager) that may be briefly unavailable
//! - **Envelope signatures**: genuine BIP-340 Schnorr signatures, or a
//!   clearly weaker deterministic placeholder when no identity is available
//! - **Hashing**: SHA-256 for payload hashes and signed messages, BLAKE3 for
//!   placeholder digests and device pseudonyms
//!
//! # Security Principles
//!
//! - Secrets must never be logged
//! - A placeholder signature is never equivalent to a genuine one
//! - Secret key bytes are zeroized after use

pub mod hashing;
pub mod identity;
pub mod signature;

pub use hashing::{device_pseudonym, sha256, sha256_hex, signing_message};
pub use identity::{GatedIdentity, IdentityError, SchnorrIdentity, SigningIdentity};
pub use signature::{
    verify_schnorr, Authenticity, EnvelopeSignature, SignatureError, GENUINE_SIGNATURE_LEN,
    PLACEHOLDER_SIGNATURE_LEN,
};
