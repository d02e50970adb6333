//! Zeroizing wrapper for credentials.
//!
//! Client secrets and tokens are held in a `SecureString`, which clears
//! its backing memory when dropped and never prints its contents.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use zeroize::{Zeroize, Zeroizing};

/// A string whose memory is zeroized on drop.
///
/// # Example
///
/// ```
/// use keel_connectors::SecureString;
///
/// let secret = SecureString::new("client-secret".to_string());
/// assert_eq!(secret.expose_secret(), "client-secret");
/// ```
#[derive(Clone)]
pub struct SecureString(Zeroizing<String>);

impl SecureString {
    /// Wraps a `String`; the memory is cleared when the wrapper drops.
    pub fn new(s: String) -> Self {
        Self(Zeroizing::new(s))
    }

    /// Exposes the secret. Avoid copying the returned slice; copies are
    /// not zeroized.
    pub fn expose_secret(&self) -> &str {
        &self.0
    }

    /// Length of the underlying secret.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True if the secret is empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<String> for SecureString {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl From<&str> for SecureString {
    fn from(s: &str) -> Self {
        Self::new(s.to_string())
    }
}

impl Default for SecureString {
    fn default() -> Self {
        Self::new(String::new())
    }
}

impl fmt::Debug for SecureString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecureString([REDACTED])")
    }
}

impl fmt::Display for SecureString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[REDACTED]")
    }
}

impl PartialEq for SecureString {
    fn eq(&self, other: &Self) -> bool {
        // Constant-time comparison; secrets must not leak via timing
        use subtle::ConstantTimeEq;
        self.0.as_bytes().ct_eq(other.0.as_bytes()).into()
    }
}

impl Eq for SecureString {}

impl Serialize for SecureString {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for SecureString {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Ok(SecureString::new(s))
    }
}

impl Drop for SecureString {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expose_secret() {
        let s = SecureString::new("hunter2".to_string());
        assert_eq!(s.expose_secret(), "hunter2");
        assert_eq!(s.len(), 7);
        assert!(!s.is_empty());
    }

    #[test]
    fn test_debug_and_display_redact() {
        let s = SecureString::from("topsecret");
        assert_eq!(format!("{:?}", s), "SecureString([REDACTED])");
        assert_eq!(format!("{}", s), "[REDACTED]");
    }

    #[test]
    fn test_equality() {
        let a = SecureString::from("same");
        let b = SecureString::from("same");
        let c = SecureString::from("different");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_serde_round_trip() {
        let s = SecureString::from("serialized");
        let json = serde_json::to_string(&s).unwrap();
        assert_eq!(json, "\"serialized\"");
        let back: SecureString = serde_json::from_str(&json).unwrap();
        assert_eq!(back.expose_secret(), "serialized");
    }
}
