//! Named equalizer presets
//!
//! Presets are authored for the 10-band layout; the 31-band layout is derived by
//! interpolating on log-frequency between the neighbouring octave bands.

use super::iir::{BandCount, BANDS_10, BANDS_31};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EqualizerPreset {
    Flat,
    Rock,
    Pop,
    Jazz,
    Classical,
    BassBoost,
    Vocal,
    Electronic,
}

impl EqualizerPreset {
    pub const ALL: [EqualizerPreset; 8] = [
        EqualizerPreset::Flat,
        EqualizerPreset::Rock,
        EqualizerPreset::Pop,
        EqualizerPreset::Jazz,
        EqualizerPreset::Classical,
        EqualizerPreset::BassBoost,
        EqualizerPreset::Vocal,
        EqualizerPreset::Electronic,
    ];

    pub fn name(self) -> &'static str {
        match self {
            EqualizerPreset::Flat => "flat",
            EqualizerPreset::Rock => "rock",
            EqualizerPreset::Pop => "pop",
            EqualizerPreset::Jazz => "jazz",
            EqualizerPreset::Classical => "classical",
            EqualizerPreset::BassBoost => "bass_boost",
            EqualizerPreset::Vocal => "vocal",
            EqualizerPreset::Electronic => "electronic",
        }
    }

    fn octave_values(self) -> [f32; 10] {
        match self {
            EqualizerPreset::Flat => [0.0; 10],
            EqualizerPreset::Rock => [4.5, 3.5, 2.0, -0.5, -1.5, 0.5, 2.5, 3.5, 4.5, 5.0],
            EqualizerPreset::Pop => [-1.5, 1.5, 3.5, 4.5, 3.5, 1.5, -0.5, -1.0, -1.5, -1.5],
            EqualizerPreset::Jazz => [3.0, 2.0, 0.5, 1.5, -1.5, -1.5, 0.0, 1.5, 3.0, 3.5],
            EqualizerPreset::Classical => [4.0, 3.0, 2.0, 1.0, -1.0, -1.5, 0.0, 1.5, 3.0, 3.5],
            EqualizerPreset::BassBoost => [7.0, 5.5, 3.5, 1.5, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0],
            EqualizerPreset::Vocal => [-2.5, -1.5, 0.0, 2.5, 4.5, 4.5, 3.0, 1.0, -0.5, -1.5],
            EqualizerPreset::Electronic => [5.0, 4.0, 1.0, -0.5, -2.0, 1.5, 0.5, 2.5, 4.5, 4.0],
        }
    }

    /// Band values (dB) for a layout
    pub fn values(self, bands: BandCount) -> Vec<f32> {
        let octave = self.octave_values();
        match bands {
            BandCount::Ten => octave.to_vec(),
            BandCount::ThirtyOne => BANDS_31
                .iter()
                .map(|&freq| interpolate_log(&octave, freq))
                .collect(),
        }
    }
}

impl FromStr for EqualizerPreset {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EqualizerPreset::ALL
            .iter()
            .copied()
            .find(|p| p.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown equalizer preset '{}'", s))
    }
}

fn interpolate_log(octave: &[f32; 10], freq: f64) -> f32 {
    let first = BANDS_10[0];
    let last = BANDS_10[BANDS_10.len() - 1];
    if freq <= first {
        return octave[0];
    }
    if freq >= last {
        return octave[octave.len() - 1];
    }
    let upper = BANDS_10
        .iter()
        .position(|&f| f >= freq)
        .unwrap_or(BANDS_10.len() - 1);
    if BANDS_10[upper] == freq {
        return octave[upper];
    }
    let lower = upper.saturating_sub(1);
    let (f_lo, f_hi) = (BANDS_10[lower].log2(), BANDS_10[upper].log2());
    if f_hi <= f_lo {
        return octave[upper];
    }
    let t = ((freq.log2() - f_lo) / (f_hi - f_lo)) as f32;
    octave[lower] + (octave[upper] - octave[lower]) * t
}
