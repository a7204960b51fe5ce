//! Spectrum feed for visualization
//!
//! The render path copies the most recent frames of every pulled buffer into a
//! de-interleaved left/right capture ring (try-lock only, no allocation). The UI asks for
//! a [`SpectrumData`] snapshot once per refresh tick; the FFT runs on the caller's thread.

use parking_lot::Mutex;
use rustfft::{num_complex::Complex, Fft, FftPlanner};
use serde::Serialize;
use std::sync::Arc;
use tracing::debug;

/// Magnitude spectrum of both channels
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SpectrumData {
    pub sample_rate: u32,
    /// Width of one bin in Hz
    pub bin_hz: f32,
    /// Linear magnitudes, `size / 2` bins from DC upwards
    pub left: Vec<f32>,
    pub right: Vec<f32>,
}

impl SpectrumData {
    pub fn is_silent(&self) -> bool {
        self.left.iter().chain(self.right.iter()).all(|&m| m == 0.0)
    }

    /// Peak magnitude of each channel (VU-style)
    pub fn peak(&self) -> (f32, f32) {
        let max = |v: &[f32]| v.iter().copied().fold(0.0f32, f32::max);
        (max(&self.left), max(&self.right))
    }
}

struct Capture {
    left: Vec<f32>,
    right: Vec<f32>,
    write: usize,
    sample_rate: u32,
    has_data: bool,
}

pub struct SpectrumAnalyzer {
    size: usize,
    capture: Mutex<Capture>,
    fft: Arc<dyn Fft<f32>>,
    window: Vec<f32>,
}

impl SpectrumAnalyzer {
    /// Analyzer over the last `size` frames (rounded up to a power of two)
    pub fn new(size: usize, sample_rate: u32) -> Self {
        let size = size.max(16).next_power_of_two();
        let mut planner = FftPlanner::new();
        let fft = planner.plan_fft_forward(size);
        let window = (0..size)
            .map(|i| 0.5 - 0.5 * (2.0 * std::f32::consts::PI * i as f32 / size as f32).cos())
            .collect();

        Self {
            size,
            capture: Mutex::new(Capture {
                left: vec![0.0; size],
                right: vec![0.0; size],
                write: 0,
                sample_rate,
                has_data: false,
            }),
            fft,
            window,
        }
    }

    /// Frames per analysis window
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn sample_rate(&self) -> u32 {
        self.capture.lock().sample_rate
    }

    /// Record the tail of a pulled interleaved stereo buffer. Render-path safe.
    pub fn capture(&self, interleaved: &[f32]) {
        let Some(mut capture) = self.capture.try_lock() else {
            return;
        };
        let frames = interleaved.len() / 2;
        let skip = frames.saturating_sub(self.size);
        for frame in interleaved.chunks_exact(2).skip(skip) {
            let pos = capture.write;
            capture.left[pos] = frame[0];
            capture.right[pos] = frame[1];
            capture.write = (pos + 1) % self.size;
        }
        if frames > 0 {
            capture.has_data = true;
        }
    }

    /// Zero the capture so snapshots report silence. Render-path safe.
    pub fn clear(&self) {
        let Some(mut capture) = self.capture.try_lock() else {
            return;
        };
        if capture.has_data {
            capture.left.fill(0.0);
            capture.right.fill(0.0);
            capture.write = 0;
            capture.has_data = false;
        }
    }

    /// Re-target the analyzer at a new sample rate, discarding captured audio
    pub fn rebuild(&self, sample_rate: u32) {
        let mut capture = self.capture.lock();
        capture.left.fill(0.0);
        capture.right.fill(0.0);
        capture.write = 0;
        capture.has_data = false;
        capture.sample_rate = sample_rate;
        debug!("Spectrum analyzer rebuilt for {} Hz ({} frames)", sample_rate, self.size);
    }

    /// Compute the spectrum of the captured window
    pub fn snapshot(&self) -> SpectrumData {
        let (left, right, sample_rate, has_data) = {
            let capture = self.capture.lock();
            let mut left = Vec::with_capacity(self.size);
            let mut right = Vec::with_capacity(self.size);
            // Oldest sample first
            left.extend_from_slice(&capture.left[capture.write..]);
            left.extend_from_slice(&capture.left[..capture.write]);
            right.extend_from_slice(&capture.right[capture.write..]);
            right.extend_from_slice(&capture.right[..capture.write]);
            (left, right, capture.sample_rate, capture.has_data)
        };

        let bins = self.size / 2;
        let bin_hz = sample_rate as f32 / self.size as f32;
        if !has_data {
            return SpectrumData {
                sample_rate,
                bin_hz,
                left: vec![0.0; bins],
                right: vec![0.0; bins],
            };
        }

        SpectrumData {
            sample_rate,
            bin_hz,
            left: self.magnitudes(&left),
            right: self.magnitudes(&right),
        }
    }

    fn magnitudes(&self, samples: &[f32]) -> Vec<f32> {
        let mut buffer: Vec<Complex<f32>> = samples
            .iter()
            .zip(&self.window)
            .map(|(&s, &w)| Complex::new(s * w, 0.0))
            .collect();
        self.fft.process(&mut buffer);

        let scale = 2.0 / self.size as f32;
        buffer[..self.size / 2].iter().map(|c| c.norm() * scale).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stereo_sine(frames: usize, freq: f32, rate: u32) -> Vec<f32> {
        (0..frames)
            .flat_map(|n| {
                let v = (2.0 * std::f32::consts::PI * freq * n as f32 / rate as f32).sin();
                [v, v * 0.5]
            })
            .collect()
    }

    #[test]
    fn test_empty_analyzer_is_silent() {
        let analyzer = SpectrumAnalyzer::new(1024, 44100);
        let data = analyzer.snapshot();
        assert_eq!(data.left.len(), 512);
        assert!(data.is_silent());
    }

    #[test]
    fn test_sine_peaks_at_its_bin() {
        let analyzer = SpectrumAnalyzer::new(1024, 44100);
        // 43 bins * 43.07 Hz ~= 1852 Hz
        let freq = 43.0 * 44100.0 / 1024.0;
        analyzer.capture(&stereo_sine(2048, freq, 44100));
        let data = analyzer.snapshot();

        let peak_bin = data
            .left
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(i, _)| i)
            .unwrap();
        assert_eq!(peak_bin, 43);
        let (left, right) = data.peak();
        assert!(left > right);
    }

    #[test]
    fn test_clear_zeroes_spectrum() {
        let analyzer = SpectrumAnalyzer::new(256, 48000);
        analyzer.capture(&stereo_sine(512, 1000.0, 48000));
        assert!(!analyzer.snapshot().is_silent());
        analyzer.clear();
        assert!(analyzer.snapshot().is_silent());
    }

    #[test]
    fn test_rebuild_changes_rate() {
        let analyzer = SpectrumAnalyzer::new(1000, 44100);
        assert_eq!(analyzer.size(), 1024);
        analyzer.capture(&stereo_sine(1024, 440.0, 44100));
        analyzer.rebuild(48000);
        let data = analyzer.snapshot();
        assert_eq!(data.sample_rate, 48000);
        assert!(data.is_silent());
        assert!((data.bin_hz - 48000.0 / 1024.0).abs() < 1e-3);
    }
}
