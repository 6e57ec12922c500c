//! Core domain types for Clipdeck.

pub mod audio;
pub mod source;
pub mod transport;

pub use audio::DecodedBuffer;
pub use source::{SourceId, SourceKind};
pub use transport::{
    gain_from_percent, clamp_rate_percent, DeviceSelection, OutputPath, PlaybackStatus,
    TransportSnapshot, MAX_RATE_PERCENT, MIN_RATE_PERCENT,
};
