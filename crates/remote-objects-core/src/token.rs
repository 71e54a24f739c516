//! Session tokens and the per-process channel secret.

use std::fmt;

use rand::RngCore;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Session token identifying one client's namespace.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Uid(String);

impl Uid {
    /// Mint a fresh random token.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Uid {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for Uid {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for Uid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Shared secret minted once per server context.
///
/// Only proves that a request was produced by a script this server instance
/// handed out; it is not an authorization mechanism.
#[derive(Clone, PartialEq, Eq)]
pub struct ChannelSecret(String);

impl ChannelSecret {
    /// Mint 32 random bytes, hex encoded.
    #[must_use]
    pub fn generate() -> Self {
        let mut bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(hex::encode(bytes))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether a presented value matches this secret.
    #[must_use]
    pub fn matches(&self, presented: Option<&str>) -> bool {
        presented == Some(self.0.as_str())
    }
}

impl From<&str> for ChannelSecret {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

// Keep the secret out of logs.
impl fmt::Debug for ChannelSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ChannelSecret(..)")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokens_are_random_hex() {
        let a = ChannelSecret::generate();
        let b = ChannelSecret::generate();
        assert_ne!(a, b);
        assert_eq!(a.as_str().len(), 64);
        assert!(a.as_str().chars().all(|c| c.is_ascii_hexdigit()));

        let uid = Uid::generate();
        assert_eq!(uid.as_str().len(), 32);
        assert_ne!(uid, Uid::generate());
    }

    #[test]
    fn test_secret_matching() {
        let secret = ChannelSecret::from("abc");
        assert!(secret.matches(Some("abc")));
        assert!(!secret.matches(Some("abd")));
        assert!(!secret.matches(None));
        assert_eq!(format!("{secret:?}"), "ChannelSecret(..)");
    }
}
