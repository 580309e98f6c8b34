//! Hash helpers shared by the envelope codec and the relay transport.

use sha2::{Digest, Sha256};

const DEVICE_PSEUDONYM_DOMAIN: &[u8] = b"waymark-device:";

/// SHA-256 digest of `data`.
pub fn sha256(data: &[u8]) -> [u8; 32] {
    let digest = Sha256::digest(data);
    let mut out = [0u8; 32];
    out.copy_from_slice(&digest);
    out
}

/// Lower-case hex SHA-256 digest of `data`.
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(sha256(data))
}

/// The 32-byte message an envelope signature covers: `SHA-256(payload_hash ‖ author_pubkey)`.
pub fn signing_message(payload_hash: &str, author_pubkey: &str) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(payload_hash.as_bytes());
    hasher.update(author_pubkey.as_bytes());
    let mut out = [0u8; 32];
    out.copy_from_slice(&hasher.finalize());
    out
}

/// Stable 64-hex author key for a device that has no signing identity.
///
/// No secret key stands behind it, so envelopes carrying it are only ever
/// placeholder-signed.
pub fn device_pseudonym(device_id: &str) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(DEVICE_PSEUDONYM_DOMAIN);
    hasher.update(device_id.as_bytes());
    hex::encode(hasher.finalize().as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sha256_known_vector() {
        assert_eq!(
            sha256_hex(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_signing_message_binds_author() {
        let a = signing_message("hash", "author-a");
        let b = signing_message("hash", "author-b");
        assert_ne!(a, b);
    }

    #[test]
    fn test_device_pseudonym_is_stable_hex() {
        let p = device_pseudonym("phone-1");
        assert_eq!(p.len(), 64);
        assert_eq!(p, device_pseudonym("phone-1"));
        assert_ne!(p, device_pseudonym("phone-2"));
    }
}
