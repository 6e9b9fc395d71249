use sha2::{Digest, Sha224};

use crate::core::{CredentialKey, KEY_LENGTH};

/// Derive the wire-visible credential key from a plaintext password.
///
/// The key is the lowercase hex encoding of `SHA224(password)`, the exact
/// 56 bytes a conforming client writes first on the stream. Deterministic
/// and infallible; run once per configuration reload, not per connection.
pub fn derive_key(password: &str) -> CredentialKey {
    let digest = Sha224::digest(password.as_bytes());
    let mut key: CredentialKey = [0u8; KEY_LENGTH];
    hex::encode_to_slice(digest, &mut key).expect("56-byte buffer fits 28-byte digest");
    key
}

/// Truncate a credential for log output. At most the first 8 characters are
/// ever emitted.
pub fn redact(credential: &str) -> &str {
    credential.get(..8).unwrap_or(credential)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derive_key_known_vector() {
        // SHA224("password") = d63dc919e201d7bc4c825630d2cf25fdc93d4b2f0d46706d29038d01
        let key = derive_key("password");
        assert_eq!(
            std::str::from_utf8(&key).unwrap(),
            "d63dc919e201d7bc4c825630d2cf25fdc93d4b2f0d46706d29038d01"
        );
    }

    #[test]
    fn derive_key_deterministic() {
        assert_eq!(derive_key("same secret"), derive_key("same secret"));
        assert_ne!(derive_key("secret a"), derive_key("secret b"));
    }

    #[test]
    fn derive_key_is_hex() {
        for &byte in derive_key("unicode 密码 ok").iter() {
            assert!((byte as char).is_ascii_hexdigit());
        }
    }

    #[test]
    fn redact_truncates() {
        assert_eq!(redact("d63dc919e201d7bc"), "d63dc919");
        assert_eq!(redact("short"), "short");
        assert_eq!(redact(""), "");
    }
}
