//! Source identifiers for audio clips.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Prefix marking ephemeral in-memory sources (preview buffers).
pub const EPHEMERAL_PREFIX: &str = "mem:";

/// The address space a source identifier belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    /// Local filesystem path.
    Local,
    /// Remote HTTP(S) URL.
    Remote,
    /// Ephemeral in-memory handle, e.g. a preview buffer.
    Ephemeral,
}

/// Opaque identifier for an audio source.
///
/// The raw string is used verbatim as the cache key: two distinct strings
/// that resolve to the same underlying bytes are cached separately.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SourceId(String);

impl SourceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The raw identifier string (also the cache key).
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Classify the identifier by its prefix.
    pub fn kind(&self) -> SourceKind {
        if self.0.starts_with(EPHEMERAL_PREFIX) {
            SourceKind::Ephemeral
        } else if self.0.starts_with("http://") || self.0.starts_with("https://") {
            SourceKind::Remote
        } else {
            SourceKind::Local
        }
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SourceId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for SourceId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_kind_classification() {
        assert_eq!(SourceId::from("mem:1234").kind(), SourceKind::Ephemeral);
        assert_eq!(
            SourceId::from("https://example.com/a.mp3").kind(),
            SourceKind::Remote
        );
        assert_eq!(
            SourceId::from("http://example.com/a.mp3").kind(),
            SourceKind::Remote
        );
        assert_eq!(SourceId::from("/home/user/clip.wav").kind(), SourceKind::Local);
        assert_eq!(SourceId::from("clip.wav").kind(), SourceKind::Local);
    }

    #[test]
    fn test_no_canonicalization() {
        // Equivalent paths remain distinct cache keys.
        let a = SourceId::from("/sounds/./clip.wav");
        let b = SourceId::from("/sounds/clip.wav");
        assert_ne!(a, b);
    }
}
