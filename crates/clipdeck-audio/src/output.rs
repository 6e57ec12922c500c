//! Audio output using cpal.
//!
//! `cpal::Stream` is not `Send`, so all streams live on one dedicated audio
//! thread driven by a command mailbox. The backend handle and the node
//! handles it returns only push commands and flip shared atomics; nothing on
//! the engine side ever touches a stream directly.
//!
//! Fan-out: the main stream renders the active clip from its advancing
//! cursor and mirrors every rendered frame (at the auxiliary gain) into a
//! lock-free ring drained by the auxiliary stream, so both devices follow
//! one cursor instead of running two.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use clipdeck_core::{DecodedBuffer, DeviceSelection, Error, OutputPath, Result};
use cpal::{
    traits::{DeviceTrait, HostTrait, StreamTrait},
    Device, SampleFormat, Stream, StreamConfig,
};
use crossbeam_channel::{bounded, Receiver, Sender};
use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use crate::resample::resample_buffer;
use crate::ring::{shared_ring, SharedRing};
use crate::router::{GraphNode, NodeSpec, OutputBackend};

/// Samples buffered between the main and auxiliary callbacks
/// (stereo interleaved, about half a second at 48 kHz).
const AUX_RING_SAMPLES: usize = 48_000;

/// Control atomics shared between a node handle and the render callback.
struct NodeControls {
    rate_bits: AtomicU64,
    main_gain_bits: AtomicU32,
    aux_gain_bits: AtomicU32,
    looping: AtomicBool,
    stopped: AtomicBool,
}

impl NodeControls {
    fn new(spec: &NodeSpec) -> Self {
        Self {
            rate_bits: AtomicU64::new(spec.rate.to_bits()),
            main_gain_bits: AtomicU32::new(spec.main_gain.to_bits()),
            aux_gain_bits: AtomicU32::new(spec.aux_gain.to_bits()),
            looping: AtomicBool::new(spec.looping),
            stopped: AtomicBool::new(false),
        }
    }

    fn rate(&self) -> f64 {
        f64::from_bits(self.rate_bits.load(Ordering::Relaxed))
    }

    fn gains(&self) -> (f32, f32) {
        (
            f32::from_bits(self.main_gain_bits.load(Ordering::Relaxed)),
            f32::from_bits(self.aux_gain_bits.load(Ordering::Relaxed)),
        )
    }
}

/// The clip currently rendered by the main callback.
struct ActiveClip {
    /// Original decode, kept so a device change to a different sample rate
    /// can re-derive the render buffer.
    source: Arc<DecodedBuffer>,
    /// Buffer resampled to the main stream rate.
    render: Arc<DecodedBuffer>,
    channels: usize,
    frames: usize,
    /// Fractional frame cursor.
    cursor: f64,
    controls: Arc<NodeControls>,
}

impl ActiveClip {
    fn new(source: Arc<DecodedBuffer>, render: Arc<DecodedBuffer>, controls: Arc<NodeControls>) -> Self {
        let channels = usize::from(render.channels());
        let frames = render.frames();
        Self {
            source,
            render,
            channels,
            frames,
            cursor: 0.0,
            controls,
        }
    }
}

type SharedClip = Arc<Mutex<Option<ActiveClip>>>;

enum Command {
    StartNode {
        id: u64,
        buffer: Arc<DecodedBuffer>,
        offset_secs: f64,
        controls: Arc<NodeControls>,
        reply: Sender<Result<()>>,
    },
    StopNode {
        id: u64,
    },
    Bind {
        path: OutputPath,
        selection: DeviceSelection,
        reply: Sender<Result<()>>,
    },
    Release {
        path: OutputPath,
    },
    Shutdown,
}

/// Output backend rendering through cpal devices.
pub struct CpalBackend {
    commands: Sender<Command>,
    thread: Option<std::thread::JoinHandle<()>>,
    next_node: u64,
}

impl CpalBackend {
    /// Spawn the audio thread. The main output stream is opened lazily on
    /// the first node start, so construction succeeds without hardware.
    pub fn new() -> Result<Self> {
        let (tx, rx) = crossbeam_channel::unbounded();
        let thread = std::thread::Builder::new()
            .name("clipdeck-audio".to_string())
            .spawn(move || AudioThread::new(rx).run())
            .map_err(|e| Error::AudioOutput(format!("Failed to spawn audio thread: {e}")))?;

        Ok(Self {
            commands: tx,
            thread: Some(thread),
            next_node: 0,
        })
    }

    fn roundtrip(&self, build: impl FnOnce(Sender<Result<()>>) -> Command) -> Result<()> {
        let (reply_tx, reply_rx) = bounded(1);
        self.commands
            .send(build(reply_tx))
            .map_err(|_| Error::AudioOutput("Audio thread is gone".to_string()))?;
        reply_rx
            .recv()
            .map_err(|_| Error::AudioOutput("Audio thread is gone".to_string()))?
    }
}

impl OutputBackend for CpalBackend {
    fn start_node(&mut self, spec: NodeSpec) -> Result<Box<dyn GraphNode>> {
        self.next_node += 1;
        let id = self.next_node;
        let controls = Arc::new(NodeControls::new(&spec));

        let node_controls = Arc::clone(&controls);
        self.roundtrip(|reply| Command::StartNode {
            id,
            buffer: spec.buffer,
            offset_secs: spec.offset_secs,
            controls,
            reply,
        })?;

        Ok(Box::new(CpalNode {
            id,
            controls: node_controls,
            commands: self.commands.clone(),
        }))
    }

    fn bind_device(&mut self, path: OutputPath, selection: &DeviceSelection) -> Result<()> {
        let selection = selection.clone();
        self.roundtrip(|reply| Command::Bind {
            path,
            selection,
            reply,
        })
    }

    fn release_path(&mut self, path: OutputPath) {
        let _ = self.commands.send(Command::Release { path });
    }
}

impl Drop for CpalBackend {
    fn drop(&mut self) {
        let _ = self.commands.send(Command::Shutdown);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

/// Live node handle. Parameter changes flip shared atomics read by the
/// render callback; dropping the handle silences and stops the node.
struct CpalNode {
    id: u64,
    controls: Arc<NodeControls>,
    commands: Sender<Command>,
}

impl GraphNode for CpalNode {
    fn set_rate(&mut self, rate: f64) {
        self.controls
            .rate_bits
            .store(rate.to_bits(), Ordering::Relaxed);
    }

    fn set_looping(&mut self, looping: bool) {
        self.controls.looping.store(looping, Ordering::Relaxed);
    }

    fn set_gains(&mut self, main: f32, aux: f32) {
        self.controls
            .main_gain_bits
            .store(main.to_bits(), Ordering::Relaxed);
        self.controls
            .aux_gain_bits
            .store(aux.to_bits(), Ordering::Relaxed);
    }
}

impl Drop for CpalNode {
    fn drop(&mut self) {
        // Silence immediately; the mailbox removes the clip shortly after.
        self.controls.stopped.store(true, Ordering::Relaxed);
        let _ = self.commands.send(Command::StopNode { id: self.id });
    }
}

struct AudioThread {
    commands: Receiver<Command>,
    active: SharedClip,
    ring: SharedRing,
    main_stream: Option<Stream>,
    main_rate: u32,
    aux_stream: Option<Stream>,
    current_node: u64,
}

impl AudioThread {
    fn new(commands: Receiver<Command>) -> Self {
        Self {
            commands,
            active: Arc::new(Mutex::new(None)),
            ring: shared_ring(AUX_RING_SAMPLES),
            main_stream: None,
            main_rate: 0,
            aux_stream: None,
            current_node: 0,
        }
    }

    fn run(mut self) {
        while let Ok(command) = self.commands.recv() {
            match command {
                Command::StartNode {
                    id,
                    buffer,
                    offset_secs,
                    controls,
                    reply,
                } => {
                    let result = self.start_node(id, &buffer, offset_secs, controls);
                    let _ = reply.send(result);
                }
                Command::StopNode { id } => {
                    if id == self.current_node {
                        *self.active.lock() = None;
                    }
                }
                Command::Bind {
                    path,
                    selection,
                    reply,
                } => {
                    let _ = reply.send(self.bind(path, &selection));
                }
                Command::Release { path } => self.release(path),
                Command::Shutdown => break,
            }
        }
        debug!("Audio thread shutting down");
    }

    fn start_node(
        &mut self,
        id: u64,
        buffer: &Arc<DecodedBuffer>,
        offset_secs: f64,
        controls: Arc<NodeControls>,
    ) -> Result<()> {
        if self.main_stream.is_none() {
            self.open_main_stream(None)?;
        }

        let render = if buffer.sample_rate() == self.main_rate {
            Arc::clone(buffer)
        } else {
            Arc::new(resample_buffer(buffer, self.main_rate)?)
        };

        let frames = render.frames();
        let start_frame = ((offset_secs * f64::from(self.main_rate)).max(0.0) as usize).min(frames);

        let mut clip = ActiveClip::new(Arc::clone(buffer), render, controls);
        clip.cursor = start_frame as f64;
        *self.active.lock() = Some(clip);
        self.current_node = id;
        Ok(())
    }

    fn bind(&mut self, path: OutputPath, selection: &DeviceSelection) -> Result<()> {
        let device = match selection {
            DeviceSelection::Default => default_output_device()?,
            DeviceSelection::Device(name) => find_output_device(name)?,
        };

        match path {
            OutputPath::Main => self.open_main_on(&device),
            OutputPath::Aux => self.open_aux_on(&device),
        }
    }

    fn release(&mut self, path: OutputPath) {
        match path {
            OutputPath::Main => {
                if self.main_stream.is_some() {
                    if let Err(e) = self.open_main_stream(None) {
                        warn!("Failed to reopen default output: {e}");
                        self.main_stream = None;
                    }
                }
            }
            OutputPath::Aux => {
                self.aux_stream = None;
                self.ring.clear();
            }
        }
    }

    fn open_main_stream(&mut self, device_name: Option<&str>) -> Result<()> {
        let device = match device_name {
            Some(name) => find_output_device(name)?,
            None => default_output_device()?,
        };
        self.open_main_on(&device)
    }

    fn open_main_on(&mut self, device: &Device) -> Result<()> {
        let name = device.name().unwrap_or_else(|_| "Unknown".to_string());

        // The outgoing stream must be gone before its replacement starts:
        // two live callbacks on one clip advance the shared cursor twice
        // per quantum and enqueue duplicate frames into the auxiliary ring.
        self.main_stream = None;

        let (stream, sample_rate) =
            build_stream(device, StreamRole::Main, &self.active, &self.ring)?;
        info!("Main output on {name} at {sample_rate} Hz");

        // A different hardware rate invalidates the render buffer; re-derive
        // it from the original decode, keeping the playhead position.
        if sample_rate != self.main_rate {
            let mut guard = self.active.lock();
            if let Some(clip) = guard.as_mut() {
                let render = if clip.source.sample_rate() == sample_rate {
                    Arc::clone(&clip.source)
                } else {
                    Arc::new(resample_buffer(&clip.source, sample_rate)?)
                };
                let scale = f64::from(sample_rate) / f64::from(self.main_rate.max(1));
                clip.cursor = (clip.cursor * scale).min(render.frames() as f64);
                clip.frames = render.frames();
                clip.channels = usize::from(render.channels());
                clip.render = render;
            }
        }

        self.main_stream = Some(stream);
        self.main_rate = sample_rate;
        Ok(())
    }

    fn open_aux_on(&mut self, device: &Device) -> Result<()> {
        let name = device.name().unwrap_or_else(|_| "Unknown".to_string());

        // Detach the old consumer before resetting the ring; clearing is
        // only safe while no consumer is attached. The replacement stream
        // is built only after both, so the ring never has two readers.
        self.aux_stream = None;
        self.ring.clear();

        let (stream, sample_rate) =
            build_stream(device, StreamRole::Aux, &self.active, &self.ring)?;
        info!("Auxiliary output on {name} at {sample_rate} Hz");
        self.aux_stream = Some(stream);
        Ok(())
    }
}

#[derive(Clone, Copy)]
enum StreamRole {
    Main,
    Aux,
}

fn build_stream(
    device: &Device,
    role: StreamRole,
    active: &SharedClip,
    ring: &SharedRing,
) -> Result<(Stream, u32)> {
    let supported = device
        .default_output_config()
        .map_err(|e| Error::AudioOutput(format!("Failed to get output config: {e}")))?;

    let sample_format = supported.sample_format();
    let config: StreamConfig = supported.into();
    let sample_rate = config.sample_rate.0;
    debug!(
        "Output config: {sample_rate} Hz, {} channels, {sample_format:?}",
        config.channels
    );

    let stream = match sample_format {
        SampleFormat::F32 => build_typed::<f32>(device, &config, role, active, ring),
        SampleFormat::I16 => build_typed::<i16>(device, &config, role, active, ring),
        SampleFormat::U16 => build_typed::<u16>(device, &config, role, active, ring),
        _ => Err(Error::AudioOutput(format!(
            "Unsupported sample format: {sample_format:?}"
        ))),
    }?;

    stream
        .play()
        .map_err(|e| Error::AudioOutput(format!("Failed to start stream: {e}")))?;

    Ok((stream, sample_rate))
}

fn build_typed<T: cpal::SizedSample + cpal::FromSample<f32>>(
    device: &Device,
    config: &StreamConfig,
    role: StreamRole,
    active: &SharedClip,
    ring: &SharedRing,
) -> Result<Stream> {
    let channels = usize::from(config.channels);
    let err_fn = |err| error!("Audio stream error: {err}");

    let stream = match role {
        StreamRole::Main => {
            let active = Arc::clone(active);
            let ring = Arc::clone(ring);
            device.build_output_stream(
                config,
                move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                    render_main(data, channels, &active, &ring);
                },
                err_fn,
                None,
            )
        }
        StreamRole::Aux => {
            let ring = Arc::clone(ring);
            device.build_output_stream(
                config,
                move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                    render_aux(data, channels, &ring);
                },
                err_fn,
                None,
            )
        }
    };

    stream.map_err(|e| Error::AudioOutput(format!("Failed to build stream: {e}")))
}

/// Main render callback: advance the clip cursor with linear interpolation,
/// apply the main gain with soft limiting, and mirror each rendered frame
/// into the auxiliary ring as a stereo pair at the auxiliary gain.
fn render_main<T: cpal::SizedSample + cpal::FromSample<f32>>(
    data: &mut [T],
    channels: usize,
    active: &SharedClip,
    ring: &SharedRing,
) {
    let mut guard = active.lock();
    let Some(clip) = guard.as_mut() else {
        silence(data);
        return;
    };
    if clip.controls.stopped.load(Ordering::Relaxed) || clip.frames == 0 {
        silence(data);
        return;
    }

    let rate = clip.controls.rate();
    let (main_gain, aux_gain) = clip.controls.gains();
    let looping = clip.controls.looping.load(Ordering::Relaxed);

    let frames_out = data.len() / channels;
    let mut aux_block = vec![0.0f32; frames_out * 2];
    let mut exhausted = false;

    for frame in 0..frames_out {
        if clip.cursor >= clip.frames as f64 {
            if looping {
                clip.cursor %= clip.frames as f64;
            } else {
                exhausted = true;
            }
        }
        if exhausted {
            for ch in 0..channels {
                data[frame * channels + ch] = T::from_sample(0.0f32);
            }
            continue;
        }

        let base = clip.cursor as usize;
        let frac = (clip.cursor - base as f64) as f32;
        let next = if base + 1 < clip.frames {
            base + 1
        } else if looping {
            0
        } else {
            base
        };

        for ch in 0..channels {
            let src_ch = ch % clip.channels;
            let a = clip.render.samples()[base * clip.channels + src_ch];
            let b = clip.render.samples()[next * clip.channels + src_ch];
            let sample = a + (b - a) * frac;

            let scaled = sample * main_gain;
            // Soft clipping with tanh for smooth limiting.
            let limited = if scaled.abs() > 0.9 { scaled.tanh() } else { scaled };
            data[frame * channels + ch] = T::from_sample(limited);

            if ch < 2 {
                aux_block[frame * 2 + ch] = sample * aux_gain;
            }
        }
        if channels == 1 {
            aux_block[frame * 2 + 1] = aux_block[frame * 2];
        }

        clip.cursor += rate;
    }

    if exhausted {
        clip.controls.stopped.store(true, Ordering::Relaxed);
    }
    // Overflow drops samples; the auxiliary path lags rather than blocking.
    ring.write(&aux_block);
}

/// Auxiliary render callback: drain stereo frames mirrored by the main
/// callback, filling with silence on underrun.
fn render_aux<T: cpal::SizedSample + cpal::FromSample<f32>>(
    data: &mut [T],
    channels: usize,
    ring: &SharedRing,
) {
    let frames_out = data.len() / channels;
    let mut block = vec![0.0f32; frames_out * 2];
    let _ = ring.read(&mut block);

    for frame in 0..frames_out {
        for ch in 0..channels {
            data[frame * channels + ch] = T::from_sample(block[frame * 2 + ch % 2]);
        }
    }
}

fn silence<T: cpal::SizedSample + cpal::FromSample<f32>>(data: &mut [T]) {
    for sample in data.iter_mut() {
        *sample = T::from_sample(0.0f32);
    }
}

fn default_output_device() -> Result<Device> {
    cpal::default_host()
        .default_output_device()
        .ok_or_else(|| Error::AudioOutput("No output device found".to_string()))
}

fn find_output_device(name: &str) -> Result<Device> {
    let host = cpal::default_host();
    let devices = host.output_devices().map_err(|e| Error::DeviceBind {
        device: name.to_string(),
        reason: format!("Failed to list devices: {e}"),
    })?;

    for device in devices {
        if device.name().is_ok_and(|n| n == name) {
            return Ok(device);
        }
    }
    Err(Error::DeviceBind {
        device: name.to_string(),
        reason: "No such output device".to_string(),
    })
}

/// List available output device names.
pub fn list_output_devices() -> Result<Vec<String>> {
    let host = cpal::default_host();
    let devices: Vec<String> = host
        .output_devices()
        .map_err(|e| Error::AudioOutput(format!("Failed to list devices: {e}")))?
        .filter_map(|d| d.name().ok())
        .collect();
    Ok(devices)
}

/// Name of the system default output device.
pub fn default_device_name() -> Option<String> {
    cpal::default_host()
        .default_output_device()
        .and_then(|d| d.name().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_list_devices_does_not_panic() {
        // May return an empty list on machines without audio hardware.
        let _ = list_output_devices();
        let _ = default_device_name();
    }

    #[test]
    fn test_node_controls_round_trip() {
        let buffer = Arc::new(DecodedBuffer::new(vec![0.0; 96], 48_000, 2));
        let controls = NodeControls::new(&NodeSpec {
            buffer,
            offset_secs: 0.0,
            rate: 1.5,
            looping: true,
            main_gain: 0.8,
            aux_gain: 0.25,
        });

        assert!((controls.rate() - 1.5).abs() < 1e-9);
        assert_eq!(controls.gains(), (0.8, 0.25));
        assert!(controls.looping.load(Ordering::Relaxed));
        assert!(!controls.stopped.load(Ordering::Relaxed));
    }

    #[test]
    fn test_render_main_advances_cursor_and_mirrors_aux() {
        let samples: Vec<f32> = (0..8).map(|i| i as f32 / 8.0).collect();
        let source = Arc::new(DecodedBuffer::new(samples, 8, 1));
        let controls = Arc::new(NodeControls::new(&NodeSpec {
            buffer: Arc::clone(&source),
            offset_secs: 0.0,
            rate: 1.0,
            looping: false,
            main_gain: 1.0,
            aux_gain: 0.5,
        }));
        let active: SharedClip = Arc::new(Mutex::new(Some(ActiveClip::new(
            Arc::clone(&source),
            source,
            Arc::clone(&controls),
        ))));
        let ring = shared_ring(64);

        let mut out = vec![0.0f32; 8];
        render_main(&mut out, 2, &active, &ring);

        // 4 stereo frames rendered from a mono source.
        assert!((out[0] - 0.0).abs() < 1e-6);
        assert!((out[2] - 0.125).abs() < 1e-6);
        assert_eq!(out[2], out[3]);

        // Aux ring carries the same frames at half gain.
        let mut aux = vec![0.0f32; 8];
        assert_eq!(ring.read(&mut aux), 8);
        assert!((aux[2] - 0.0625).abs() < 1e-6);

        let cursor = active.lock().as_ref().map(|c| c.cursor);
        assert_eq!(cursor, Some(4.0));
    }

    #[test]
    fn test_render_main_stops_at_end_when_not_looping() {
        let source = Arc::new(DecodedBuffer::new(vec![0.5; 4], 8, 1));
        let controls = Arc::new(NodeControls::new(&NodeSpec {
            buffer: Arc::clone(&source),
            offset_secs: 0.0,
            rate: 1.0,
            looping: false,
            main_gain: 1.0,
            aux_gain: 0.0,
        }));
        let active: SharedClip = Arc::new(Mutex::new(Some(ActiveClip::new(
            Arc::clone(&source),
            source,
            Arc::clone(&controls),
        ))));
        let ring = shared_ring(64);

        // 8 mono frames requested from a 4 frame clip.
        let mut out = vec![1.0f32; 8];
        render_main(&mut out, 1, &active, &ring);

        assert!((out[3] - 0.5).abs() < 1e-6);
        assert!(out[4].abs() < 1e-6);
        assert!(controls.stopped.load(Ordering::Relaxed));
    }

    #[test]
    fn test_render_main_wraps_when_looping() {
        let source = Arc::new(DecodedBuffer::new(vec![0.25; 4], 8, 1));
        let controls = Arc::new(NodeControls::new(&NodeSpec {
            buffer: Arc::clone(&source),
            offset_secs: 0.0,
            rate: 1.0,
            looping: true,
            main_gain: 1.0,
            aux_gain: 0.0,
        }));
        let active: SharedClip = Arc::new(Mutex::new(Some(ActiveClip::new(
            Arc::clone(&source),
            source,
            Arc::clone(&controls),
        ))));
        let ring = shared_ring(64);

        let mut out = vec![0.0f32; 8];
        render_main(&mut out, 1, &active, &ring);

        // All 8 frames rendered; the cursor wrapped past the clip end.
        assert!(out.iter().all(|s| (s - 0.25).abs() < 1e-6));
        assert!(!controls.stopped.load(Ordering::Relaxed));
    }

    #[test]
    fn test_device_swap_hands_over_single_renderer() {
        let source = Arc::new(DecodedBuffer::new(vec![0.5; 32], 8, 1));
        let controls = Arc::new(NodeControls::new(&NodeSpec {
            buffer: Arc::clone(&source),
            offset_secs: 0.0,
            rate: 1.0,
            looping: false,
            main_gain: 1.0,
            aux_gain: 0.5,
        }));
        let active: SharedClip = Arc::new(Mutex::new(Some(ActiveClip::new(
            Arc::clone(&source),
            source,
            Arc::clone(&controls),
        ))));
        let ring = shared_ring(64);

        // One 8-frame quantum rendered by the outgoing stream's callback.
        let mut out = vec![0.0f32; 8];
        render_main(&mut out, 1, &active, &ring);
        let cursor = active.lock().as_ref().map(|c| c.cursor);
        assert_eq!(cursor, Some(8.0));

        // Rebind sequence: the old stream is dropped, then the ring reset,
        // then the replacement attaches. Exactly one callback owns each
        // quantum, so the cursor advances once per quantum and the ring
        // holds only the new stream's mirror frames.
        ring.clear();
        render_main(&mut out, 1, &active, &ring);

        let cursor = active.lock().as_ref().map(|c| c.cursor);
        assert_eq!(cursor, Some(16.0));
        assert_eq!(ring.available(), 16);
    }

    #[test]
    fn test_render_aux_underrun_fills_silence() {
        let ring = shared_ring(64);
        ring.write(&[0.5, 0.5]);

        let mut out = vec![1.0f32; 8];
        render_aux(&mut out, 2, &ring);
        assert!((out[0] - 0.5).abs() < 1e-6);
        assert!(out[2].abs() < 1e-6);
    }
}
