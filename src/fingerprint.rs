//! Canonical FQDN derivation.
//!
//! A connected client's identity is the SHA-256 of its SSH public key,
//! rendered in lowercase base32 (no padding, alphabet `a-z2-7`). Concatenated
//! with the server's configured hostname this yields the session's canonical
//! FQDN, the routing key the whole system is built around.

use sha2::{Digest, Sha256};

const BASE32_ALPHABET: &[u8; 32] = b"abcdefghijklmnopqrstuvwxyz234567";

/// Encode bytes as lowercase base32 with no padding.
fn base32_encode(bytes: &[u8]) -> String {
    let mut out = String::with_capacity((bytes.len() * 8 + 4) / 5);
    let mut buf: u32 = 0;
    let mut bits: u32 = 0;

    for &b in bytes {
        buf = (buf << 8) | b as u32;
        bits += 8;
        while bits >= 5 {
            bits -= 5;
            let idx = (buf >> bits) & 0x1f;
            out.push(BASE32_ALPHABET[idx as usize] as char);
        }
    }

    if bits > 0 {
        let idx = (buf << (5 - bits)) & 0x1f;
        out.push(BASE32_ALPHABET[idx as usize] as char);
    }

    out
}

/// SHA-256 of the raw public key bytes, base32-encoded.
pub fn fingerprint(public_key_bytes: &[u8]) -> String {
    let digest = Sha256::digest(public_key_bytes);
    base32_encode(&digest)
}

/// `<fingerprint>.<hostname>`, the routing key for a session.
pub fn canonical_fqdn(public_key_bytes: &[u8], hostname: &str) -> String {
    format!("{}.{}", fingerprint(public_key_bytes), hostname)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base32_has_no_padding_and_is_lowercase() {
        let encoded = base32_encode(b"hello world");
        assert!(encoded.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()));
        assert!(!encoded.contains('='));
    }

    #[test]
    fn fingerprint_is_deterministic() {
        let key = b"some-public-key-bytes";
        assert_eq!(fingerprint(key), fingerprint(key));
    }

    #[test]
    fn different_keys_yield_different_fingerprints() {
        assert_ne!(fingerprint(b"key-a"), fingerprint(b"key-b"));
    }

    #[test]
    fn canonical_fqdn_joins_fingerprint_and_hostname() {
        let fqdn = canonical_fqdn(b"key-a", "example.com");
        assert!(fqdn.ends_with(".example.com"));
        assert_eq!(fqdn, format!("{}.example.com", fingerprint(b"key-a")));
    }
}
