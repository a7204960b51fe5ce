//! Audio Test File Generation Utilities
//!
//! Deterministic stereo WAV files for exercising the symphonia decoding path.

use hound::{WavSpec, WavWriter};
use std::f32::consts::PI;
use std::path::Path;

/// Generate a stereo 16-bit sine WAV
///
/// # Arguments
/// * `path` - Output file path
/// * `sample_rate` - Sample rate in Hz
/// * `duration_ms` - Duration in milliseconds
/// * `frequency_hz` - Sine frequency
/// * `amplitude` - Peak amplitude 0.0-1.0
pub fn generate_sine_wav<P: AsRef<Path>>(
    path: P,
    sample_rate: u32,
    duration_ms: u64,
    frequency_hz: f32,
    amplitude: f32,
) -> Result<(), hound::Error> {
    let spec = WavSpec {
        channels: 2,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = WavWriter::create(path, spec)?;

    let total_frames = (sample_rate as u64 * duration_ms) / 1000;
    for n in 0..total_frames {
        let t = n as f32 / sample_rate as f32;
        let value = (amplitude * (2.0 * PI * frequency_hz * t).sin() * i16::MAX as f32) as i16;
        writer.write_sample(value)?;
        writer.write_sample(value)?;
    }

    writer.finalize()?;
    Ok(())
}

/// Generate a silent stereo 16-bit WAV
pub fn generate_silent_wav<P: AsRef<Path>>(path: P, sample_rate: u32, duration_ms: u64) -> Result<(), hound::Error> {
    generate_sine_wav(path, sample_rate, duration_ms, 0.0, 0.0)
}
