//! Offline resampling of decoded clips using rubato.
//!
//! Clips are decoded fully before playback, so rate conversion to the output
//! device's sample rate happens once, at node creation, instead of streaming.

use clipdeck_core::{DecodedBuffer, Error, Result};
use rubato::{FftFixedIn, Resampler};
use tracing::debug;

const CHUNK_FRAMES: usize = 1024;

/// Resample a decoded clip to `target_rate`.
///
/// Returns a clone of the input when the rates already match.
pub fn resample_buffer(buffer: &DecodedBuffer, target_rate: u32) -> Result<DecodedBuffer> {
    if buffer.sample_rate() == target_rate || buffer.frames() == 0 {
        return Ok(buffer.clone());
    }

    let channels = usize::from(buffer.channels()).max(1);
    let mut resampler = FftFixedIn::<f32>::new(
        buffer.sample_rate() as usize,
        target_rate as usize,
        CHUNK_FRAMES,
        2,
        channels,
    )
    .map_err(|e| Error::AudioOutput(format!("Failed to create resampler: {e}")))?;

    // Deinterleave into per-channel planes, padded to a whole chunk.
    let frames = buffer.frames();
    let padded = frames.div_ceil(CHUNK_FRAMES) * CHUNK_FRAMES;
    let mut planes: Vec<Vec<f32>> = vec![vec![0.0; padded]; channels];
    for (frame, chunk) in buffer.samples().chunks_exact(channels).enumerate() {
        for (ch, &sample) in chunk.iter().enumerate() {
            planes[ch][frame] = sample;
        }
    }

    let mut out_planes: Vec<Vec<f32>> = vec![Vec::new(); channels];
    for start in (0..padded).step_by(CHUNK_FRAMES) {
        let chunk: Vec<&[f32]> = planes
            .iter()
            .map(|ch| &ch[start..start + CHUNK_FRAMES])
            .collect();
        let processed = resampler
            .process(&chunk, None)
            .map_err(|e| Error::AudioOutput(format!("Resample failed: {e}")))?;
        for (ch, data) in processed.into_iter().enumerate() {
            out_planes[ch].extend(data);
        }
    }

    // Trim the padding tail to the expected output length.
    let expected_frames =
        (frames as f64 * f64::from(target_rate) / f64::from(buffer.sample_rate())).round() as usize;
    let out_frames = expected_frames.min(out_planes[0].len());

    let mut samples = Vec::with_capacity(out_frames * channels);
    for frame in 0..out_frames {
        for plane in &out_planes {
            samples.push(plane[frame]);
        }
    }

    debug!(
        "Resampled {}Hz -> {}Hz ({} -> {} frames)",
        buffer.sample_rate(),
        target_rate,
        frames,
        out_frames
    );

    Ok(DecodedBuffer::new(samples, target_rate, channels as u16))
}
