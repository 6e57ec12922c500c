//! Error types for Clipdeck.

use thiserror::Error;

/// Result type alias using Clipdeck's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for Clipdeck.
#[derive(Error, Debug)]
pub enum Error {
    // Source resolution errors
    #[error("Failed to resolve source: {0}")]
    Resolve(String),

    #[error("Network error: {0}")]
    Network(String),

    // Audio errors
    #[error("Audio decode error: {0}")]
    Decode(String),

    #[error("Audio output error: {0}")]
    AudioOutput(String),

    #[error("Failed to bind output device {device}: {reason}")]
    DeviceBind { device: String, reason: String },

    // Cache errors
    #[error("Cache error: {0}")]
    Cache(String),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // Control flow
    #[error("Operation superseded by a newer request")]
    Superseded,

    // Generic errors
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Returns true if this error is expected control flow under rapid
    /// repeated triggering and must never surface to the user.
    pub const fn is_superseded(&self) -> bool {
        matches!(self, Self::Superseded)
    }

    /// Returns true if this error should be reported to the user with a
    /// human-readable reason.
    pub const fn is_user_visible(&self) -> bool {
        !matches!(self, Self::Superseded)
    }

    /// Returns true if the failed operation left prior playback untouched
    /// and the engine remains usable for the next request.
    pub const fn is_recoverable(&self) -> bool {
        !matches!(self, Self::Internal(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_superseded_is_not_user_visible() {
        assert!(Error::Superseded.is_superseded());
        assert!(!Error::Superseded.is_user_visible());
        assert!(Error::Resolve("missing".into()).is_user_visible());
        assert!(Error::Decode("bad bytes".into()).is_user_visible());
    }

    #[test]
    fn test_error_display() {
        let err = Error::Decode("unsupported codec".into());
        assert_eq!(err.to_string(), "Audio decode error: unsupported codec");

        let err = Error::DeviceBind {
            device: "usb-dac".into(),
            reason: "not found".into(),
        };
        assert_eq!(
            err.to_string(),
            "Failed to bind output device usb-dac: not found"
        );
    }
}
