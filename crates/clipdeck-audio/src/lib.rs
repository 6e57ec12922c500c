//! # clipdeck-audio
//!
//! Playback engine for the Clipdeck soundboard.
//!
//! Features:
//! - Sample-accurate transport clock across pause/resume/seek
//! - Dual-output routing (main + auxiliary) fed from one graph node
//! - Bounded decoded-audio cache with cooperative load cancellation
//! - symphonia decoding and cpal output

pub mod clock;
pub mod decode;
pub mod engine;
pub mod mock;
pub mod output;
pub mod resample;
pub mod resolver;
pub mod ring;
pub mod router;
pub mod session;

#[cfg(test)]
pub(crate) mod testutil;

pub use clock::{AudioClock, ManualClock, SystemClock};
pub use decode::decode_bytes;
pub use engine::{EngineConfig, SoundEngine, SubscriptionId};
pub use output::{default_device_name, list_output_devices, CpalBackend};
pub use resolver::{BlobRegistry, ByteSource, FsHttpResolver};
pub use router::{GraphNode, NodeSpec, OutputBackend, OutputRouter};
pub use session::PlaybackSession;
