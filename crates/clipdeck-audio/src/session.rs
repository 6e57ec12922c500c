//! Playback session and clock arithmetic.
//!
//! At most one session is alive at a time. It bridges a decoded buffer to a
//! live graph node plus the logical clock anchor, and owns the position
//! formula used identically while playing and paused, so toggling pause
//! never jumps the playhead.

use std::sync::Arc;

use clipdeck_core::{DecodedBuffer, SourceId};

use crate::router::GraphNode;

/// Margin kept from the clip end when seeking, so a node is never scheduled
/// exactly at the end of its buffer.
pub const SEEK_END_GUARD: f64 = 0.02;

/// The single active "a clip is loaded" instance.
pub struct PlaybackSession {
    source: SourceId,
    buffer: Arc<DecodedBuffer>,
    /// `Some` iff audio is actively advancing.
    node: Option<Box<dyn GraphNode>>,
    /// Clock reading when the current node started.
    start_time: f64,
    /// Logical playhead position while paused; anchor offset while playing.
    paused_at: f64,
    looping: bool,
    /// Reached natural (non-looping) completion.
    ended: bool,
}

impl PlaybackSession {
    pub fn new(source: SourceId, buffer: Arc<DecodedBuffer>, looping: bool) -> Self {
        Self {
            source,
            buffer,
            node: None,
            start_time: 0.0,
            paused_at: 0.0,
            looping,
            ended: false,
        }
    }

    pub const fn source(&self) -> &SourceId {
        &self.source
    }

    pub const fn buffer(&self) -> &Arc<DecodedBuffer> {
        &self.buffer
    }

    pub fn duration(&self) -> f64 {
        self.buffer.duration_secs()
    }

    pub const fn is_playing(&self) -> bool {
        self.node.is_some()
    }

    pub const fn is_looping(&self) -> bool {
        self.looping
    }

    pub const fn has_ended(&self) -> bool {
        self.ended
    }

    /// The logical playhead position in seconds.
    ///
    /// While a node is live: `paused_at + (now − start_time) × rate`;
    /// otherwise `paused_at`. The same formula serves display, seeks, and
    /// pause bookkeeping.
    pub fn current_time(&self, now: f64, rate: f64) -> f64 {
        if self.node.is_some() {
            self.paused_at + (now - self.start_time) * rate
        } else {
            self.paused_at
        }
    }

    /// Attach a freshly started node, anchoring the clock at `now`.
    pub fn attach_node(&mut self, node: Box<dyn GraphNode>, now: f64) {
        self.node = Some(node);
        self.start_time = now;
        self.ended = false;
    }

    /// Detach and return the live node (dropping it stops the audio).
    pub fn take_node(&mut self) -> Option<Box<dyn GraphNode>> {
        self.node.take()
    }

    pub fn node_mut(&mut self) -> Option<&mut (dyn GraphNode + '_)> {
        match self.node {
            Some(ref mut n) => Some(&mut **n),
            None => None,
        }
    }

    /// Store the playhead and discard the node. No-op if already paused.
    pub fn pause(&mut self, now: f64, rate: f64) {
        if self.node.is_none() {
            return;
        }
        self.paused_at = self.current_time(now, rate);
        self.node = None;
    }

    /// Clamp a seek target to `[0, duration − SEEK_END_GUARD]`.
    pub fn clamp_seek(&self, target_secs: f64) -> f64 {
        let max = (self.duration() - SEEK_END_GUARD).max(0.0);
        target_secs.clamp(0.0, max)
    }

    /// Move the paused playhead. Callers recreate the node themselves when
    /// the session was playing.
    pub fn set_offset(&mut self, offset_secs: f64) {
        self.paused_at = offset_secs;
        self.ended = false;
    }

    pub fn set_looping(&mut self, looping: bool) {
        self.looping = looping;
        if let Some(node) = self.node.as_deref_mut() {
            node.set_looping(looping);
        }
    }

    /// Transition to the ended state after natural completion: node cleared,
    /// playhead parked at the clip end.
    pub fn mark_ended(&mut self) {
        self.node = None;
        self.paused_at = self.duration();
        self.ended = true;
    }

    /// Wrap a looping session that ran past the clip end back into range,
    /// re-anchoring at `now`.
    pub fn rewrap(&mut self, now: f64, rate: f64) {
        let duration = self.duration();
        if duration <= 0.0 {
            return;
        }
        let position = self.current_time(now, rate);
        self.paused_at = position.rem_euclid(duration);
        self.start_time = now;
    }

    /// Re-anchor the clock without moving the playhead. Used when the rate
    /// changes mid-play so the position formula stays continuous.
    pub fn re_anchor(&mut self, now: f64, rate: f64) {
        if self.node.is_none() {
            return;
        }
        self.paused_at = self.current_time(now, rate);
        self.start_time = now;
    }
}
