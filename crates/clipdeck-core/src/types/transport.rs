//! Transport state and output routing types.

use serde::{Deserialize, Serialize};

use crate::types::SourceId;

/// Lowest accepted playback rate, in percent.
pub const MIN_RATE_PERCENT: f64 = 50.0;
/// Highest accepted playback rate, in percent.
pub const MAX_RATE_PERCENT: f64 = 200.0;

/// One of the two independent output destinations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OutputPath {
    Main,
    Aux,
}

/// Physical destination for an output path.
///
/// `Default` means "use the system default device" and never triggers
/// device-specific rebinding logic.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DeviceSelection {
    #[default]
    Default,
    Device(String),
}

impl DeviceSelection {
    /// Parse a raw device id, mapping the literal `"default"` to `Default`.
    pub fn from_id(id: &str) -> Self {
        if id == "default" || id.is_empty() {
            Self::Default
        } else {
            Self::Device(id.to_string())
        }
    }
}

/// Session-level playback status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PlaybackStatus {
    #[default]
    Idle,
    Loading,
    Playing,
    Paused,
}

/// Read-only snapshot of the transport state, published to external readers.
///
/// Subscribers never see the live session object, only these snapshots.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TransportSnapshot {
    pub current_clip: Option<SourceId>,
    pub playing: bool,
    pub paused: bool,
    pub looping: bool,
    pub position_secs: f64,
    pub duration_secs: f64,
    pub rate_percent: f64,
}

impl TransportSnapshot {
    /// Coarse status derived from the snapshot flags.
    ///
    /// `Loading` is a host-side state while a play request is still in
    /// flight; snapshots only ever report settled states.
    pub const fn status(&self) -> PlaybackStatus {
        if self.playing {
            PlaybackStatus::Playing
        } else if self.paused {
            PlaybackStatus::Paused
        } else {
            PlaybackStatus::Idle
        }
    }
}

/// Scale a volume percentage in `[0, 100]` to a gain clamped to `[0, 1]`.
pub fn gain_from_percent(percent: f64) -> f32 {
    let gain = (percent / 100.0) as f32;
    gain.clamp(0.0, 1.0)
}

/// Clamp a playback rate percentage to `[50, 200]`.
pub fn clamp_rate_percent(percent: f64) -> f64 {
    if percent.is_nan() {
        return 100.0;
    }
    percent.clamp(MIN_RATE_PERCENT, MAX_RATE_PERCENT)
}
