//! Password hashing compatible with the legacy authentication backend.
//!
//! Hashes use the `$SHA$<salt>$<digest>` layout where the digest is
//! `sha256_hex(sha256_hex(password) + salt)` and the salt is 16 lowercase hex characters.

use rand::RngCore;
use sha2::{Digest, Sha256};

const SALTED_PREFIX: &str = "$SHA$";
const SALT_BYTES: usize = 8;

/// Hash a plaintext password. Values already in the salted format are returned unchanged.
pub fn hash_password(password: &str) -> String {
    if is_hashed(password) {
        return password.to_string();
    }

    let mut salt = [0u8; SALT_BYTES];
    rand::thread_rng().fill_bytes(&mut salt);
    hash_with_salt(password, &hex::encode(salt))
}

/// Check a plaintext password against a stored value.
///
/// Stored values may be salted hashes, bare SHA-256 hex digests or plaintext left behind by
/// older deployments.
pub fn verify_password(password: &str, stored: &str) -> bool {
    if stored.is_empty() {
        return false;
    }

    if let Some(rest) = stored.strip_prefix(SALTED_PREFIX) {
        return match rest.split_once('$') {
            Some((salt, _)) => hash_with_salt(password, salt) == stored,
            None => false,
        };
    }

    if is_bare_digest(stored) {
        return sha256_hex(password).eq_ignore_ascii_case(stored);
    }

    password == stored
}

/// True when the value is already in the salted storage format.
pub fn is_hashed(value: &str) -> bool {
    value
        .strip_prefix(SALTED_PREFIX)
        .and_then(|rest| rest.split_once('$'))
        .map(|(salt, digest)| !salt.is_empty() && !digest.is_empty())
        .unwrap_or(false)
}

fn hash_with_salt(password: &str, salt: &str) -> String {
    let inner = sha256_hex(password);
    let outer = sha256_hex(&format!("{inner}{salt}"));
    format!("{SALTED_PREFIX}{salt}${outer}")
}

fn sha256_hex(input: &str) -> String {
    hex::encode(Sha256::digest(input.as_bytes()))
}

fn is_bare_digest(value: &str) -> bool {
    value.len() == 64 && value.chars().all(|c| c.is_ascii_hexdigit())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hashed_password_verifies_and_carries_salt() {
        let hashed = hash_password("correct_horse");
        assert!(hashed.starts_with("$SHA$"));
        let salt = hashed[5..].split('$').next().expect("salt segment");
        assert_eq!(salt.len(), 16);
        assert!(verify_password("correct_horse", &hashed));
        assert!(!verify_password("wrong_horse", &hashed));
    }

    #[test]
    fn salts_differ_between_calls() {
        assert_ne!(hash_password("same_input"), hash_password("same_input"));
    }

    #[test]
    fn already_hashed_values_pass_through() {
        let hashed = hash_password("passthrough1");
        assert_eq!(hash_password(&hashed), hashed);
    }

    #[test]
    fn known_digest_matches_legacy_layout() {
        let stored = hash_with_salt("password", "0011223344556677");
        let inner = sha256_hex("password");
        let expected = sha256_hex(&format!("{inner}0011223344556677"));
        assert_eq!(stored, format!("$SHA$0011223344556677${expected}"));
    }

    #[test]
    fn verifies_bare_digest_and_plaintext_values() {
        let digest = sha256_hex("legacy_pw");
        assert!(verify_password("legacy_pw", &digest));
        assert!(verify_password("legacy_pw", &digest.to_uppercase()));
        assert!(verify_password("plain_value", "plain_value"));
        assert!(!verify_password("anything", ""));
        assert!(!verify_password("anything", "$SHA$malformed"));
    }
}
