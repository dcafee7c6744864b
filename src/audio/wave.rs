//! Waveform loading and quantization
//!
//! Recordings are mono 16 kHz. The native format is `.kbd`: headerless
//! little-endian f32 PCM. WAV input is also accepted and is mixed down and
//! resampled as needed.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use rubato::{FftFixedIn, Resampler};
use tracing::{debug, info};

use crate::error::{PipelineError, Result};

/// Fixed sample rate of the pipeline (Hz)
pub const SAMPLE_RATE: u32 = 16000;

/// Load a recording as float samples at [`SAMPLE_RATE`].
///
/// `.wav` files are decoded with hound; anything else is treated as a raw
/// `.kbd` float dump.
pub fn load_recording<P: AsRef<Path>>(path: P) -> Result<Vec<f32>> {
    let path = path.as_ref();
    let is_wav = path
        .extension()
        .map(|e| e.eq_ignore_ascii_case("wav"))
        .unwrap_or(false);

    let samples = if is_wav {
        load_wav(path)?
    } else {
        load_kbd(path)?
    };

    info!(
        "Loaded {} samples ({:.2}s) from {}",
        samples.len(),
        samples.len() as f32 / SAMPLE_RATE as f32,
        path.display()
    );

    Ok(samples)
}

/// Load a raw `.kbd` file: headerless little-endian f32, mono, 16 kHz
pub fn load_kbd<P: AsRef<Path>>(path: P) -> Result<Vec<f32>> {
    let path = path.as_ref();
    let mut reader = BufReader::new(File::open(path)?);

    let mut bytes = Vec::new();
    reader.read_to_end(&mut bytes)?;

    if bytes.len() % 4 != 0 {
        return Err(PipelineError::BadFormat(format!(
            "{}: size {} is not a multiple of 4 bytes",
            path.display(),
            bytes.len()
        )));
    }

    let samples = bytes
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect();

    Ok(samples)
}

/// Load a WAV file, mix to mono, and resample to [`SAMPLE_RATE`] if needed
pub fn load_wav<P: AsRef<Path>>(path: P) -> Result<Vec<f32>> {
    let mut reader = hound::WavReader::open(path.as_ref())
        .map_err(|e| PipelineError::BadFormat(e.to_string()))?;

    let spec = reader.spec();
    debug!(
        "WAV format: {} channels, {} Hz, {} bits",
        spec.channels, spec.sample_rate, spec.bits_per_sample
    );

    let samples: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader.samples::<f32>().filter_map(|s| s.ok()).collect(),
        hound::SampleFormat::Int => {
            let max_val = (1i64 << (spec.bits_per_sample - 1)) as f32;
            reader
                .samples::<i32>()
                .filter_map(|s| s.ok())
                .map(|s| s as f32 / max_val)
                .collect()
        }
    };

    let mono: Vec<f32> = if spec.channels > 1 {
        samples
            .chunks(spec.channels as usize)
            .map(|chunk| chunk.iter().sum::<f32>() / spec.channels as f32)
            .collect()
    } else {
        samples
    };

    if spec.sample_rate == SAMPLE_RATE {
        Ok(mono)
    } else {
        resample(&mono, spec.sample_rate, SAMPLE_RATE)
    }
}

/// Resample mono audio between sample rates
fn resample(samples: &[f32], from_rate: u32, to_rate: u32) -> Result<Vec<f32>> {
    debug!("Resampling: {} Hz -> {} Hz", from_rate, to_rate);

    let mut resampler = FftFixedIn::<f32>::new(
        from_rate as usize,
        to_rate as usize,
        1024, // chunk size
        1,    // sub-chunks
        1,    // channels
    )
    .map_err(|e| PipelineError::BadFormat(format!("resampler init: {e}")))?;

    let chunk_size = resampler.input_frames_next();
    let mut output = Vec::with_capacity(samples.len() * to_rate as usize / from_rate as usize);
    let mut remaining = samples;

    while remaining.len() >= chunk_size {
        let (chunk, rest) = remaining.split_at(chunk_size);
        remaining = rest;

        let result = resampler
            .process(&[chunk.to_vec()], None)
            .map_err(|e| PipelineError::BadFormat(format!("resampling: {e}")))?;
        if let Some(resampled) = result.into_iter().next() {
            output.extend(resampled);
        }
    }

    if !remaining.is_empty() {
        let mut padded = remaining.to_vec();
        padded.resize(chunk_size, 0.0);

        let result = resampler
            .process(&[padded], None)
            .map_err(|e| PipelineError::BadFormat(format!("resampling: {e}")))?;
        if let Some(resampled) = result.into_iter().next() {
            let ratio = remaining.len() as f32 / chunk_size as f32;
            let take = (resampled.len() as f32 * ratio) as usize;
            output.extend(&resampled[..take.min(resampled.len())]);
        }
    }

    Ok(output)
}

/// Quantize a float waveform to i16.
///
/// The waveform is peak-normalized first so downstream thresholds are
/// insensitive to recording gain. Silence quantizes to silence.
pub fn quantize(samples: &[f32]) -> Vec<i16> {
    let peak = samples.iter().map(|s| s.abs()).fold(0.0f32, f32::max);
    if peak < 1e-9 {
        return vec![0; samples.len()];
    }

    let scale = 0.95 / peak * i16::MAX as f32;
    samples
        .iter()
        .map(|s| (s * scale).clamp(i16::MIN as f32, i16::MAX as f32) as i16)
        .collect()
}
