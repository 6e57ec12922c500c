//! Audio decoding using symphonia.
//!
//! Soundboard clips are short, so the whole clip is decoded up front into an
//! immutable [`DecodedBuffer`]; seeks and loops then become pure cursor
//! arithmetic with no decoder state to rewind.

use std::io::Cursor;

use clipdeck_core::{DecodedBuffer, Error, Result};
use symphonia::core::{
    audio::{AudioBufferRef, Signal},
    codecs::{DecoderOptions, CODEC_TYPE_NULL},
    formats::FormatOptions,
    io::{MediaSourceStream, MediaSourceStreamOptions},
    meta::MetadataOptions,
    probe::Hint,
};
use tracing::{debug, warn};

/// Decode an entire encoded clip into interleaved f32 PCM.
///
/// `ext_hint` is an optional file-extension hint (e.g. `"wav"`, `"mp3"`)
/// passed to the format probe; decoding works without it for most formats.
pub fn decode_bytes(data: &[u8], ext_hint: Option<&str>) -> Result<DecodedBuffer> {
    let cursor = Cursor::new(data.to_vec());
    let mss = MediaSourceStream::new(Box::new(cursor), MediaSourceStreamOptions::default());

    let mut hint = Hint::new();
    if let Some(ext) = ext_hint {
        hint.with_extension(ext);
    }

    let format_opts = FormatOptions {
        enable_gapless: true,
        ..Default::default()
    };
    let metadata_opts = MetadataOptions::default();

    let probed = symphonia::default::get_probe()
        .format(&hint, mss, &format_opts, &metadata_opts)
        .map_err(|e| Error::Decode(format!("Failed to probe format: {e}")))?;

    let mut format = probed.format;

    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or_else(|| Error::Decode("No audio tracks found".to_string()))?;

    let track_id = track.id;
    let sample_rate = track.codec_params.sample_rate.unwrap_or(48000);
    let channels = track.codec_params.channels.map_or(2, |c| c.count() as u16);

    debug!(
        "Decoding track: id={}, sample_rate={}, channels={}",
        track_id, sample_rate, channels
    );

    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(|e| Error::Decode(format!("Failed to create decoder: {e}")))?;

    let mut samples: Vec<f32> = Vec::new();

    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(symphonia::core::errors::Error::IoError(e))
                if e.kind() == std::io::ErrorKind::UnexpectedEof =>
            {
                break; // End of stream
            }
            Err(e) => {
                return Err(Error::Decode(format!("Failed to read packet: {e}")));
            }
        };

        if packet.track_id() != track_id {
            continue;
        }

        match decoder.decode(&packet) {
            Ok(decoded) => append_interleaved(&mut samples, &decoded),
            Err(symphonia::core::errors::Error::DecodeError(e)) => {
                // Skip corrupt frames rather than failing the whole clip.
                warn!("Decode error (skipping frame): {e}");
            }
            Err(e) => {
                return Err(Error::Decode(format!("Decode failed: {e}")));
            }
        }
    }

    if samples.is_empty() {
        return Err(Error::Decode("Clip decoded to zero samples".to_string()));
    }

    let buffer = DecodedBuffer::new(samples, sample_rate, channels);
    debug!(
        "Decoded {} frames ({:.3}s)",
        buffer.frames(),
        buffer.duration_secs()
    );
    Ok(buffer)
}

/// Append one decoded packet's samples as interleaved f32.
fn append_interleaved(dst: &mut Vec<f32>, decoded: &AudioBufferRef<'_>) {
    match decoded {
        AudioBufferRef::F32(buf) => interleave(dst, buf.planes().planes(), |s| s),
        AudioBufferRef::F64(buf) => {
            interleave(dst, buf.planes().planes(), |s| s as f32);
        }
        AudioBufferRef::S32(buf) => {
            interleave(dst, buf.planes().planes(), |s| s as f32 / i32::MAX as f32);
        }
        AudioBufferRef::S16(buf) => {
            interleave(dst, buf.planes().planes(), |s| {
                f32::from(s) / f32::from(i16::MAX)
            });
        }
        AudioBufferRef::U8(buf) => {
            interleave(dst, buf.planes().planes(), |s| {
                (f32::from(s) - 128.0) / 128.0
            });
        }
        _ => warn!("Unhandled sample format, dropping packet"),
    }
}

fn interleave<T: Copy>(dst: &mut Vec<f32>, planes: &[&[T]], convert: impl Fn(T) -> f32) {
    let Some(first) = planes.first() else {
        return;
    };
    let frames = first.len();
    dst.reserve(frames * planes.len());
    for frame in 0..frames {
        for plane in planes {
            dst.push(convert(plane[frame]));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::testutil::wav_bytes;

    #[test]
    fn test_decode_wav() {
        let bytes = wav_bytes(1.0, 8000);
        let buffer = decode_bytes(&bytes, Some("wav")).expect("decode wav");
        assert_eq!(buffer.sample_rate(), 8000);
        assert_eq!(buffer.channels(), 1);
        assert!((buffer.duration_secs() - 1.0).abs() < 0.01);
    }

    #[test]
    fn test_decode_without_hint() {
        let bytes = wav_bytes(0.25, 8000);
        let buffer = decode_bytes(&bytes, None).expect("decode wav without hint");
        assert!(buffer.frames() > 0);
    }

    #[test]
    fn test_decode_garbage_fails() {
        let err = decode_bytes(&[0u8; 64], None).expect_err("garbage must not decode");
        assert!(matches!(err, Error::Decode(_)));
    }
}
