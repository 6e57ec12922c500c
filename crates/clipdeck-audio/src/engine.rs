//! Engine façade and transport.
//!
//! `SoundEngine` is the composition root: it owns the decoded-audio cache,
//! the output router, and the at-most-one playback session, and exposes the
//! transport operations plus an "ended" subscription interface.
//!
//! Concurrency model: every transport entry point serializes on one mutex
//! around the engine state. `play` never holds that mutex across its
//! suspension points (byte fetch, decode); instead each `play` takes a fresh
//! generation token and re-checks it after every suspension point and before
//! its mutation phase, so the last request to reach that phase wins and
//! superseded requests abort without side effects.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use clipdeck_cache::{ClipCache, ReleaseHook};
use clipdeck_core::{
    clamp_rate_percent, Error, OutputPath, Result, SourceId, SourceKind, TransportSnapshot,
};
use crossbeam_channel::{bounded, Sender};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::clock::{AudioClock, SystemClock};
use crate::decode;
use crate::output::CpalBackend;
use crate::resolver::ByteSource;
use crate::router::{OutputBackend, OutputRouter};
use crate::session::PlaybackSession;

/// Engine tunables.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Decoded-audio cache capacity in clips.
    pub cache_capacity: usize,
    /// Default rewind/forward distance in seconds.
    pub skip_secs: f64,
    /// Housekeeping interval of the background ticker.
    pub tick_interval: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            cache_capacity: clipdeck_cache::DEFAULT_CAPACITY,
            skip_secs: 5.0,
            tick_interval: Duration::from_millis(25),
        }
    }
}

/// Token returned by [`SoundEngine::on_ended`], used to unsubscribe.
pub type SubscriptionId = u64;

type EndedCallback = Arc<dyn Fn() + Send + Sync>;

struct EngineInner {
    cache: ClipCache,
    router: OutputRouter,
    session: Option<PlaybackSession>,
    /// Rate multiplier (1.0 = normal speed); persists across sessions.
    rate: f64,
    /// Published "now playing" clip; cleared on stop and on natural end.
    current_clip: Option<SourceId>,
}

impl EngineInner {
    /// Apply the router's effective gains to the live node, if any.
    fn sync_node_gains(&mut self) {
        let (main, aux) = self.router.effective_gains();
        if let Some(node) = self.session.as_mut().and_then(PlaybackSession::node_mut) {
            node.set_gains(main, aux);
        }
    }

    /// Detect natural completion. Returns true when a non-looping clip just
    /// ended and subscribers must be notified.
    fn tick(&mut self, now: f64) -> bool {
        let Some(session) = self.session.as_mut() else {
            return false;
        };
        if !session.is_playing() {
            return false;
        }
        let position = session.current_time(now, self.rate);
        if position < session.duration() {
            return false;
        }

        if session.is_looping() {
            session.rewrap(now, self.rate);
            return false;
        }

        debug!("Clip ended naturally: {}", session.source());
        session.mark_ended();
        self.current_clip = None;
        true
    }
}

struct Ticker {
    shutdown: Sender<()>,
    handle: Option<std::thread::JoinHandle<()>>,
}

/// The playback engine.
///
/// An explicit handle owned by the host's composition root; collaborators
/// receive references (or clones of the `Arc`s they need), never a global.
pub struct SoundEngine {
    inner: Arc<Mutex<EngineInner>>,
    clock: Arc<dyn AudioClock>,
    resolver: Arc<dyn ByteSource>,
    /// Generation counter for cooperative play cancellation.
    generation: Arc<AtomicU64>,
    subscribers: Arc<Mutex<Vec<(SubscriptionId, EndedCallback)>>>,
    next_subscription: AtomicU64,
    skip_secs: f64,
    ticker: Option<Ticker>,
}

impl SoundEngine {
    /// Create an engine with the cpal output backend, the system clock, and
    /// a background housekeeping ticker.
    pub fn new(resolver: Arc<dyn ByteSource>) -> Result<Self> {
        let backend = CpalBackend::new()?;
        let config = EngineConfig::default();
        let tick_interval = config.tick_interval;
        let mut engine = Self::with_parts(
            resolver,
            Box::new(backend),
            Arc::new(SystemClock::new()),
            config,
        );
        engine.spawn_ticker(tick_interval);
        Ok(engine)
    }

    /// Create an engine from explicit parts, without a background ticker.
    /// The host drives [`SoundEngine::tick`] itself.
    pub fn with_parts(
        resolver: Arc<dyn ByteSource>,
        backend: Box<dyn OutputBackend>,
        clock: Arc<dyn AudioClock>,
        config: EngineConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Mutex::new(EngineInner {
                cache: ClipCache::with_capacity(config.cache_capacity),
                router: OutputRouter::new(backend),
                session: None,
                rate: 1.0,
                current_clip: None,
            })),
            clock,
            resolver,
            generation: Arc::new(AtomicU64::new(0)),
            subscribers: Arc::new(Mutex::new(Vec::new())),
            next_subscription: AtomicU64::new(0),
            skip_secs: config.skip_secs,
            ticker: None,
        }
    }

    fn spawn_ticker(&mut self, interval: Duration) {
        let (shutdown_tx, shutdown_rx) = bounded::<()>(1);
        let inner = Arc::clone(&self.inner);
        let clock = Arc::clone(&self.clock);
        let subscribers = Arc::clone(&self.subscribers);

        let handle = std::thread::Builder::new()
            .name("clipdeck-tick".to_string())
            .spawn(move || loop {
                match shutdown_rx.recv_timeout(interval) {
                    Err(crossbeam_channel::RecvTimeoutError::Timeout) => {
                        run_tick(&inner, clock.as_ref(), &subscribers);
                    }
                    Ok(()) | Err(crossbeam_channel::RecvTimeoutError::Disconnected) => break,
                }
            });

        match handle {
            Ok(handle) => {
                self.ticker = Some(Ticker {
                    shutdown: shutdown_tx,
                    handle: Some(handle),
                });
            }
            Err(e) => warn!("Failed to spawn ticker thread: {e}"),
        }
    }

    // --- Transport ------------------------------------------------------

    /// Load and start a clip.
    ///
    /// Returns [`Error::Superseded`] when a newer `play`/`stop` overtook
    /// this call at a suspension point; that outcome is expected control
    /// flow under rapid triggering and is safe to ignore.
    pub fn play(&self, source: &SourceId, looping: bool) -> Result<()> {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        debug!("Play request {generation}: {source}");

        let cached = self.inner.lock().cache.get(source.as_str());
        let buffer = match cached {
            Some(buffer) => buffer,
            None => {
                // Suspension point: byte fetch. The state mutex is not held.
                let bytes = self.resolver.fetch(source)?;
                self.check_current(generation)?;

                // Suspension point: decode.
                let buffer = Arc::new(decode::decode_bytes(&bytes, ext_hint(source))?);
                self.check_current(generation)?;

                let release = self.release_hook(source);
                self.inner
                    .lock()
                    .cache
                    .put(source.as_str(), Arc::clone(&buffer), release);
                buffer
            }
        };

        let now = self.clock.now_secs();
        let mut inner = self.inner.lock();
        // Mutation phase: the last request to get here wins.
        self.check_current(generation)?;

        // Tear down any previous session before its replacement starts.
        inner.session = None;

        let inner = &mut *inner;
        let mut session = PlaybackSession::new(source.clone(), buffer, looping);
        let node = inner
            .router
            .start_node(Arc::clone(session.buffer()), 0.0, inner.rate, looping)?;
        session.attach_node(node, now);
        inner.session = Some(session);
        inner.current_clip = Some(source.clone());

        info!("Playing {source} (loop={looping})");
        Ok(())
    }

    /// Play a clip once; previewing the clip that is already current stops
    /// it instead.
    pub fn preview(&self, source: &SourceId) -> Result<()> {
        let current = self.inner.lock().current_clip.clone();
        if current.as_ref() == Some(source) {
            self.stop();
            return Ok(());
        }
        self.play(source, false)
    }

    /// Tear down the session unconditionally. Idempotent; also cancels any
    /// in-flight `play`.
    pub fn stop(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        let mut inner = self.inner.lock();
        if inner.session.take().is_some() {
            debug!("Stopped playback");
        }
        inner.current_clip = None;
    }

    /// Freeze the playhead and discard the graph node. No-op when already
    /// paused or stopped.
    pub fn pause(&self) {
        let now = self.clock.now_secs();
        let mut inner = self.inner.lock();
        let rate = inner.rate;
        if let Some(session) = inner.session.as_mut() {
            session.pause(now, rate);
        }
    }

    /// Recreate a graph node from the paused playhead. No-op when already
    /// playing, ended, or without a session.
    pub fn resume(&self) -> Result<()> {
        let now = self.clock.now_secs();
        let mut inner = self.inner.lock();
        let inner = &mut *inner;
        let Some(session) = inner.session.as_mut() else {
            return Ok(());
        };
        if session.is_playing() || session.has_ended() {
            return Ok(());
        }

        let offset = session.current_time(now, inner.rate);
        let node = inner.router.start_node(
            Arc::clone(session.buffer()),
            offset,
            inner.rate,
            session.is_looping(),
        )?;
        session.attach_node(node, now);
        // Natural end cleared the published clip; restarting audio must
        // publish it again so playing and current_clip stay paired.
        inner.current_clip = Some(session.source().clone());
        Ok(())
    }

    /// Pause if playing, resume otherwise. Returns whether audio is now
    /// advancing.
    pub fn toggle_pause(&self) -> Result<bool> {
        if self.is_playing() {
            self.pause();
            Ok(false)
        } else {
            self.resume()?;
            Ok(self.is_playing())
        }
    }

    /// Move the playhead, clamped to `[0, duration − ε]`, preserving the
    /// play/pause state. No-op without a session.
    pub fn seek(&self, target_secs: f64) -> Result<()> {
        let now = self.clock.now_secs();
        let mut inner = self.inner.lock();
        let inner = &mut *inner;
        let Some(session) = inner.session.as_mut() else {
            return Ok(());
        };

        let clamped = session.clamp_seek(target_secs);
        let was_playing = session.is_playing();

        if was_playing {
            session.pause(now, inner.rate);
        }
        session.set_offset(clamped);
        if was_playing {
            let node = inner.router.start_node(
                Arc::clone(session.buffer()),
                clamped,
                inner.rate,
                session.is_looping(),
            )?;
            session.attach_node(node, now);
        }
        Ok(())
    }

    /// Seek relative to the current playhead.
    pub fn seek_by(&self, delta_secs: f64) -> Result<()> {
        let position = self.current_time();
        self.seek(position + delta_secs)
    }

    pub fn rewind(&self) -> Result<()> {
        self.seek_by(-self.skip_secs)
    }

    pub fn forward(&self) -> Result<()> {
        self.seek_by(self.skip_secs)
    }

    /// Set the playback rate as a percentage, clamped to `[50, 200]`.
    /// Applies to the live node and persists across seek/resume.
    pub fn set_rate_percent(&self, percent: f64) {
        let clamped = clamp_rate_percent(percent);
        let now = self.clock.now_secs();
        let mut inner = self.inner.lock();

        // Re-anchor at the old rate so the position stays continuous.
        let old_rate = inner.rate;
        if let Some(session) = inner.session.as_mut() {
            session.re_anchor(now, old_rate);
        }
        inner.rate = clamped / 100.0;

        let rate = inner.rate;
        if let Some(node) = inner.session.as_mut().and_then(PlaybackSession::node_mut) {
            node.set_rate(rate);
        }
    }

    pub fn rate_percent(&self) -> f64 {
        self.inner.lock().rate * 100.0
    }

    /// Toggle looping on the active session. Returns the new state.
    pub fn toggle_loop(&self) -> bool {
        let mut inner = self.inner.lock();
        if let Some(session) = inner.session.as_mut() {
            let looping = !session.is_looping();
            session.set_looping(looping);
            looping
        } else {
            false
        }
    }

    pub fn set_looping(&self, looping: bool) {
        if let Some(session) = self.inner.lock().session.as_mut() {
            session.set_looping(looping);
        }
    }

    /// Set output volumes as percentages in `[0, 100]`.
    pub fn set_volumes(&self, main_percent: f64, aux_percent: Option<f64>) {
        let mut inner = self.inner.lock();
        inner.router.set_volumes(main_percent, aux_percent);
        inner.sync_node_gains();
    }

    pub fn set_aux_enabled(&self, enabled: bool) {
        let mut inner = self.inner.lock();
        inner.router.set_aux_enabled(enabled);
        inner.sync_node_gains();
    }

    /// Rebind an output path's destination device. Unavailable devices
    /// degrade to the system default; never fails playback.
    pub fn set_output_device(&self, path: OutputPath, device_id: &str) {
        let mut inner = self.inner.lock();
        inner.router.set_device(path, device_id);
        inner.sync_node_gains();
    }

    pub fn set_muted(&self, muted: bool) {
        let mut inner = self.inner.lock();
        inner.router.set_muted(muted);
        inner.sync_node_gains();
    }

    /// Returns the new muted state.
    pub fn toggle_mute(&self) -> bool {
        let mut inner = self.inner.lock();
        let muted = !inner.router.muted();
        inner.router.set_muted(muted);
        inner.sync_node_gains();
        muted
    }

    // --- Notifications --------------------------------------------------

    /// Subscribe to "ended" notifications, fired exactly once per natural
    /// (non-looping) completion. Callbacks run outside the engine lock.
    pub fn on_ended(&self, callback: impl Fn() + Send + Sync + 'static) -> SubscriptionId {
        let id = self.next_subscription.fetch_add(1, Ordering::SeqCst);
        self.subscribers.lock().push((id, Arc::new(callback)));
        id
    }

    /// Remove a subscription. Returns whether it existed.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscribers = self.subscribers.lock();
        let before = subscribers.len();
        subscribers.retain(|(sub_id, _)| *sub_id != id);
        subscribers.len() != before
    }

    /// Run one housekeeping pass: loop wrap-around and natural-end
    /// detection. The default constructor drives this from a background
    /// ticker; hosts using [`SoundEngine::with_parts`] call it themselves.
    pub fn tick(&self) {
        run_tick(&self.inner, self.clock.as_ref(), &self.subscribers);
    }

    // --- Accessors ------------------------------------------------------

    pub fn is_playing(&self) -> bool {
        self.inner
            .lock()
            .session
            .as_ref()
            .is_some_and(PlaybackSession::is_playing)
    }

    pub fn is_paused(&self) -> bool {
        self.inner
            .lock()
            .session
            .as_ref()
            .is_some_and(|s| !s.is_playing())
    }

    pub fn is_looping(&self) -> bool {
        self.inner
            .lock()
            .session
            .as_ref()
            .is_some_and(PlaybackSession::is_looping)
    }

    /// Current playhead position in seconds; 0.0 without a session.
    pub fn current_time(&self) -> f64 {
        let now = self.clock.now_secs();
        let inner = self.inner.lock();
        inner.session.as_ref().map_or(0.0, |session| {
            session
                .current_time(now, inner.rate)
                .clamp(0.0, session.duration())
        })
    }

    /// Duration of the loaded clip in seconds; 0.0 without a session.
    pub fn duration(&self) -> f64 {
        self.inner
            .lock()
            .session
            .as_ref()
            .map_or(0.0, PlaybackSession::duration)
    }

    /// Read-only snapshot of the transport state.
    pub fn snapshot(&self) -> TransportSnapshot {
        let now = self.clock.now_secs();
        let inner = self.inner.lock();
        let playing = inner
            .session
            .as_ref()
            .is_some_and(PlaybackSession::is_playing);
        TransportSnapshot {
            current_clip: inner.current_clip.clone(),
            playing,
            paused: inner.session.as_ref().is_some_and(|s| !s.is_playing()),
            looping: inner
                .session
                .as_ref()
                .is_some_and(PlaybackSession::is_looping),
            position_secs: inner.session.as_ref().map_or(0.0, |session| {
                session
                    .current_time(now, inner.rate)
                    .clamp(0.0, session.duration())
            }),
            duration_secs: inner.session.as_ref().map_or(0.0, PlaybackSession::duration),
            rate_percent: inner.rate * 100.0,
        }
    }

    /// Stop playback, shut down the ticker, and release all cached clips.
    pub fn close(&mut self) {
        if let Some(mut ticker) = self.ticker.take() {
            let _ = ticker.shutdown.send(());
            if let Some(handle) = ticker.handle.take() {
                let _ = handle.join();
            }
        }
        let mut inner = self.inner.lock();
        inner.session = None;
        inner.current_clip = None;
        inner.cache.clear();
    }

    // --- Internals ------------------------------------------------------

    fn check_current(&self, generation: u64) -> Result<()> {
        if self.generation.load(Ordering::SeqCst) == generation {
            Ok(())
        } else {
            debug!("Play request {generation} superseded");
            Err(Error::Superseded)
        }
    }

    /// Release hook for the cache entry of `source`: ephemeral handles are
    /// revoked exactly once when their entry leaves the cache.
    fn release_hook(&self, source: &SourceId) -> Option<ReleaseHook> {
        if source.kind() != SourceKind::Ephemeral {
            return None;
        }
        let resolver = Arc::clone(&self.resolver);
        let source = source.clone();
        Some(Box::new(move || resolver.release(&source)))
    }
}

impl Drop for SoundEngine {
    fn drop(&mut self) {
        self.close();
    }
}

fn run_tick(
    inner: &Mutex<EngineInner>,
    clock: &dyn AudioClock,
    subscribers: &Mutex<Vec<(SubscriptionId, EndedCallback)>>,
) {
    let ended = inner.lock().tick(clock.now_secs());
    if ended {
        // Clone the callbacks out so they run without any engine lock held.
        let callbacks: Vec<EndedCallback> = subscribers
            .lock()
            .iter()
            .map(|(_, callback)| Arc::clone(callback))
            .collect();
        for callback in callbacks {
            callback();
        }
    }
}

/// File-extension probe hint for local sources.
fn ext_hint(source: &SourceId) -> Option<&str> {
    if source.kind() != SourceKind::Local {
        return None;
    }
    source
        .as_str()
        .rsplit_once('.')
        .map(|(_, ext)| ext)
        .filter(|ext| !ext.is_empty() && ext.len() <= 4 && !ext.contains('/'))
}
