//! The shared secret key regular peers present to join a room.
//!
//! One key is generated per server run and lives in the
//! [`ServerContext`](super::server::ServerContext) until the server stops.
//!
//! The generator is seeded from the system clock and the current thread and
//! mixed through `DefaultHasher`.  It is **not** cryptographically secure: a
//! peer that can guess the server's start time can narrow the key space.

use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::time::SystemTime;

use lanchat_core::{decode, encode};
use lanchat_core::protocol::messages::SECRET_KEY_LENGTH;

/// Characters a secret key is drawn from.  Includes the protocol delimiter,
/// so keys must always be encoded on the wire.
pub const SECRET_KEY_CHARSET: &[u8] =
    b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789!@#$%^&*()-_=+[]{}|;:,.<>?/";

/// A 24-character room key.
#[derive(Clone, PartialEq, Eq)]
pub struct SecretKey(String);

impl SecretKey {
    /// Generates a fresh key from the documented character set.
    pub fn generate() -> Self {
        let mut seed = DefaultHasher::new();
        SystemTime::now().hash(&mut seed);
        std::thread::current().id().hash(&mut seed);
        let mut state = seed.finish();

        loop {
            let key: String = (0..SECRET_KEY_LENGTH)
                .map(|i| {
                    let mut hasher = DefaultHasher::new();
                    state.hash(&mut hasher);
                    i.hash(&mut hasher);
                    state = hasher.finish();
                    SECRET_KEY_CHARSET[(state % SECRET_KEY_CHARSET.len() as u64) as usize] as char
                })
                .collect();
            // Keys such as "|C:" would not survive the delimiter escape.
            if decode(&encode(&key)) == key {
                return Self(key);
            }
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// `true` when `candidate` is exactly this key.
    pub fn matches(&self, candidate: &str) -> bool {
        self.0 == candidate
    }
}

impl From<&str> for SecretKey {
    fn from(key: &str) -> Self {
        Self(key.to_string())
    }
}

// Keeps the key out of `{:?}` log output.
impl fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretKey(..)")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_produces_24_characters() {
        let key = SecretKey::generate();
        assert_eq!(key.as_str().chars().count(), SECRET_KEY_LENGTH);
    }

    #[test]
    fn test_generate_uses_only_documented_charset() {
        for _ in 0..50 {
            let key = SecretKey::generate();
            assert!(
                key.as_str().bytes().all(|b| SECRET_KEY_CHARSET.contains(&b)),
                "unexpected character in generated key"
            );
        }
    }

    #[test]
    fn test_generated_keys_survive_the_wire_codec() {
        for _ in 0..50 {
            let key = SecretKey::generate();
            assert_eq!(decode(&encode(key.as_str())), key.as_str());
        }
    }

    #[test]
    fn test_charset_has_expected_size() {
        assert_eq!(SECRET_KEY_CHARSET.len(), 89);
    }

    #[test]
    fn test_matches_requires_exact_key() {
        let key = SecretKey::from("ABCDEFGHIJKLMNOPQRSTUVWX");
        assert!(key.matches("ABCDEFGHIJKLMNOPQRSTUVWX"));
        assert!(!key.matches("ABCDEFGHIJKLMNOPQRSTUVW"));
        assert!(!key.matches("abcdefghijklmnopqrstuvwx"));
    }

    #[test]
    fn test_debug_does_not_leak_key() {
        let key = SecretKey::from("ABCDEFGHIJKLMNOPQRSTUVWX");
        assert!(!format!("{key:?}").contains("ABC"));
    }
}
