//! Queue message identifiers.
//!
//! Base ids are 20 lowercase alphanumeric characters; the cc/bcc companion
//! entries of a request share the base id with a literal `+cc` / `+bcc`
//! suffix. Ids double as filenames in the file-backed store, so parsing
//! rejects anything that could escape the store directory.

use std::fmt;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::QueueError;

/// Length of a generated base id.
pub const ID_LEN: usize = 20;

const ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

/// Longest id accepted from callers. Caller-supplied ids may be longer than
/// generated ones, but they still have to fit in a filename.
const MAX_ID_LEN: usize = 128;

/// Companion kind for the cc/bcc entries fanned out of one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Companion {
    Cc,
    Bcc,
}

impl Companion {
    pub const fn suffix(self) -> &'static str {
        match self {
            Self::Cc => "+cc",
            Self::Bcc => "+bcc",
        }
    }
}

/// An opaque queue identifier, unique across the active queue.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MessageId(String);

impl MessageId {
    /// Generate a fresh 20-character lowercase alphanumeric id.
    ///
    /// Uniqueness is probabilistic (36^20 tokens); callers may supply their
    /// own id instead.
    pub fn generate() -> Self {
        let mut rng = rand::rng();
        let id = (0..ID_LEN)
            .map(|_| ALPHABET[rng.random_range(0..ALPHABET.len())] as char)
            .collect();
        Self(id)
    }

    /// Validate a caller-supplied id.
    ///
    /// Accepts printable ASCII without separators or path characters, so an
    /// id is always safe as a filename in the file-backed store.
    pub fn parse(raw: &str) -> Result<Self, QueueError> {
        if raw.is_empty() || raw.len() > MAX_ID_LEN {
            return Err(QueueError::InvalidId(raw.to_string()));
        }
        if raw.contains("..") {
            return Err(QueueError::InvalidId(raw.to_string()));
        }
        let ok = raw.bytes().all(|b| {
            b.is_ascii_graphic() && !matches!(b, b'/' | b'\\' | b'@' | b'.' | b':')
        });
        if !ok {
            return Err(QueueError::InvalidId(raw.to_string()));
        }
        Ok(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Derive the companion id for the cc/bcc entry of the same request.
    pub fn companion(&self, kind: Companion) -> Self {
        Self(format!("{}{}", self.0, kind.suffix()))
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Serialize for MessageId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for MessageId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_id_shape() {
        let id = MessageId::generate();
        assert_eq!(id.as_str().len(), ID_LEN);
        assert!(id
            .as_str()
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit()));
    }

    #[test]
    fn test_generated_ids_differ() {
        let ids: std::collections::HashSet<_> =
            (0..1000).map(|_| MessageId::generate()).collect();
        assert_eq!(ids.len(), 1000);
    }

    #[test]
    fn test_companion_suffixes() {
        let id = MessageId::parse("a1b2c3d4e5f6g7h8i9j0").unwrap();
        assert_eq!(id.companion(Companion::Cc).as_str(), "a1b2c3d4e5f6g7h8i9j0+cc");
        assert_eq!(id.companion(Companion::Bcc).as_str(), "a1b2c3d4e5f6g7h8i9j0+bcc");
    }

    #[test]
    fn test_parse_rejects_path_characters() {
        assert!(MessageId::parse("../../etc/passwd").is_err());
        assert!(MessageId::parse("a/b").is_err());
        assert!(MessageId::parse("a\\b").is_err());
        assert!(MessageId::parse("a b").is_err());
        assert!(MessageId::parse("").is_err());
        assert!(MessageId::parse("id@host").is_err());
    }

    #[test]
    fn test_parse_accepts_companion_ids() {
        assert!(MessageId::parse("a1b2c3d4e5f6g7h8i9j0+cc").is_ok());
        assert!(MessageId::parse("a1b2c3d4e5f6g7h8i9j0+bcc").is_ok());
    }
}
