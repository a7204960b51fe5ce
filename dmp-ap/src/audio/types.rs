//! Core audio data types
//!
//! Streams produce interleaved stereo `f32` in [-1.0, 1.0]. Byte quantities (device
//! buffer size, silence drain) are expressed in the device's negotiated bit depth, so
//! conversion between samples and bytes lives here alongside the device sample encoders.

use serde::{Deserialize, Serialize};

/// Channel count of every stream in the pipeline
pub const STEREO: usize = 2;

/// Device sample depth
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum BitDepth {
    #[serde(rename = "16")]
    Bits16,
    #[default]
    #[serde(rename = "24")]
    Bits24,
}

impl BitDepth {
    /// Bytes one sample occupies on the device (24-bit is packed)
    pub fn bytes_per_sample(self) -> usize {
        match self {
            BitDepth::Bits16 => 2,
            BitDepth::Bits24 => 3,
        }
    }

    pub fn bits(self) -> u16 {
        match self {
            BitDepth::Bits16 => 16,
            BitDepth::Bits24 => 24,
        }
    }

    /// Parse from a bit count (16 or 24)
    pub fn from_bits(bits: u16) -> Option<Self> {
        match bits {
            16 => Some(BitDepth::Bits16),
            24 => Some(BitDepth::Bits24),
            _ => None,
        }
    }
}

impl std::fmt::Display for BitDepth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-bit", self.bits())
    }
}

/// Format negotiated with (or requested from) an output device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PcmFormat {
    pub sample_rate: u32,
    pub channels: u16,
    pub bit_depth: BitDepth,
}

impl PcmFormat {
    pub fn stereo(sample_rate: u32, bit_depth: BitDepth) -> Self {
        Self {
            sample_rate,
            channels: STEREO as u16,
            bit_depth,
        }
    }

    /// Bytes per interleaved frame
    pub fn bytes_per_frame(&self) -> usize {
        self.channels as usize * self.bit_depth.bytes_per_sample()
    }

    /// Device byte count of `samples` interleaved samples
    pub fn bytes_for_samples(&self, samples: usize) -> usize {
        samples * self.bit_depth.bytes_per_sample()
    }

    /// Interleaved sample count covering `bytes`, rounded up to whole frames
    pub fn samples_for_bytes(&self, bytes: usize) -> usize {
        let frame_bytes = self.bytes_per_frame();
        let frames = bytes.div_ceil(frame_bytes);
        frames * self.channels as usize
    }

    /// Wall time of `frames` frames at this rate
    pub fn frames_to_duration(&self, frames: u64) -> std::time::Duration {
        if self.sample_rate == 0 {
            return std::time::Duration::ZERO;
        }
        std::time::Duration::from_secs_f64(frames as f64 / self.sample_rate as f64)
    }
}

/// Convert one float sample to a signed 16-bit device sample
#[inline]
pub fn f32_to_i16(sample: f32) -> i16 {
    (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16
}

/// Convert one float sample to a 24-bit value left-justified in an `i32`
///
/// The low byte is zero, which is what 32-bit-container drivers expect for 24-bit data.
#[inline]
pub fn f32_to_i24_left_justified(sample: f32) -> i32 {
    const MAX_24: f32 = 8_388_607.0;
    let value = (sample.clamp(-1.0, 1.0) * MAX_24) as i32;
    value << 8
}

/// Convert a whole buffer to 16-bit
pub fn convert_to_i16(input: &[f32], output: &mut [i16]) {
    for (out, &sample) in output.iter_mut().zip(input) {
        *out = f32_to_i16(sample);
    }
}

/// Convert a whole buffer to left-justified 24-bit
pub fn convert_to_i24(input: &[f32], output: &mut [i32]) {
    for (out, &sample) in output.iter_mut().zip(input) {
        *out = f32_to_i24_left_justified(sample);
    }
}
