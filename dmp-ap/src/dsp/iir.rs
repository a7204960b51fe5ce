//! Band-pass coefficient tables for the graphic equalizer
//!
//! Each band is a second-order peaking section described by three coefficients
//! (`alpha`, `beta`, `gamma`). Tables exist for two band layouts (10 octave bands,
//! 31 third-octave bands) and two sample-rate classes (44.1 kHz and 48 kHz). They are
//! designed once from the band-edge formula and cached for the life of the process.

use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use std::sync::OnceLock;

/// Largest band count any engine holds
pub const MAX_BANDS: usize = 31;

/// Centre frequencies of the 10-band (octave) layout, Hz
pub const BANDS_10: [f64; 10] = [
    31.0, 62.0, 125.0, 250.0, 500.0, 1000.0, 2000.0, 4000.0, 8000.0, 16000.0,
];

/// Centre frequencies of the 31-band (third-octave) layout, Hz
pub const BANDS_31: [f64; 31] = [
    20.0, 25.0, 31.5, 40.0, 50.0, 63.0, 80.0, 100.0, 125.0, 160.0, 200.0, 250.0, 315.0,
    400.0, 500.0, 630.0, 800.0, 1000.0, 1250.0, 1600.0, 2000.0, 2500.0, 3150.0, 4000.0,
    5000.0, 6300.0, 8000.0, 10000.0, 12500.0, 16000.0, 20000.0,
];

/// Rates below this use the 44.1 kHz tables, at or above it the 48 kHz tables
const RATE_CLASS_THRESHOLD: u32 = 46000;
/// Outside [MIN, MAX] the equalizer passes audio through untouched
const MIN_EQ_RATE: u32 = 40000;
const MAX_EQ_RATE: u32 = 50000;

/// Coefficients of one band-pass section
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct IirCoefficients {
    pub alpha: f32,
    pub beta: f32,
    pub gamma: f32,
}

/// Equalizer band layout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(try_from = "u8", into = "u8")]
pub enum BandCount {
    #[default]
    Ten,
    ThirtyOne,
}

impl BandCount {
    /// Physical band count of the engine
    pub fn count(self) -> usize {
        match self {
            BandCount::Ten => 10,
            BandCount::ThirtyOne => 31,
        }
    }

    pub fn frequencies(self) -> &'static [f64] {
        match self {
            BandCount::Ten => &BANDS_10,
            BandCount::ThirtyOne => &BANDS_31,
        }
    }

    /// Band width in octaves
    fn octave(self) -> f64 {
        match self {
            BandCount::Ten => 1.0,
            BandCount::ThirtyOne => 1.0 / 3.0,
        }
    }

    pub fn from_count(count: usize) -> Option<Self> {
        match count {
            10 => Some(BandCount::Ten),
            31 => Some(BandCount::ThirtyOne),
            _ => None,
        }
    }
}

impl TryFrom<u8> for BandCount {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        BandCount::from_count(value as usize)
            .ok_or_else(|| format!("equalizer band count must be 10 or 31, got {}", value))
    }
}

impl From<BandCount> for u8 {
    fn from(value: BandCount) -> Self {
        value.count() as u8
    }
}

/// Sample-rate tuning class of a coefficient table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RateClass {
    Hz44100,
    Hz48000,
}

impl RateClass {
    /// Table class for `sample_rate`, or `None` when the rate is outside the supported window
    pub fn for_rate(sample_rate: u32) -> Option<Self> {
        if !(MIN_EQ_RATE..=MAX_EQ_RATE).contains(&sample_rate) {
            return None;
        }
        if sample_rate < RATE_CLASS_THRESHOLD {
            Some(RateClass::Hz44100)
        } else {
            Some(RateClass::Hz48000)
        }
    }

    fn design_rate(self) -> f64 {
        match self {
            RateClass::Hz44100 => 44100.0,
            RateClass::Hz48000 => 48000.0,
        }
    }
}

/// Cached coefficient table for a layout and rate class
pub fn coefficients(bands: BandCount, class: RateClass) -> &'static [IirCoefficients] {
    static TEN_44: OnceLock<Vec<IirCoefficients>> = OnceLock::new();
    static TEN_48: OnceLock<Vec<IirCoefficients>> = OnceLock::new();
    static THIRTY_ONE_44: OnceLock<Vec<IirCoefficients>> = OnceLock::new();
    static THIRTY_ONE_48: OnceLock<Vec<IirCoefficients>> = OnceLock::new();

    let cell = match (bands, class) {
        (BandCount::Ten, RateClass::Hz44100) => &TEN_44,
        (BandCount::Ten, RateClass::Hz48000) => &TEN_48,
        (BandCount::ThirtyOne, RateClass::Hz44100) => &THIRTY_ONE_44,
        (BandCount::ThirtyOne, RateClass::Hz48000) => &THIRTY_ONE_48,
    };
    cell.get_or_init(|| design_table(bands, class.design_rate()))
}

fn design_table(bands: BandCount, sample_rate: f64) -> Vec<IirCoefficients> {
    bands
        .frequencies()
        .iter()
        .map(|&centre| design_band(centre, bands.octave(), sample_rate))
        .collect()
}

/// Design one section from its centre frequency and band width.
///
/// The lower band edge sits `octave / 2` below the centre; the section is solved for a
/// -3 dB response at that edge. A band whose quadratic has no real root yields zero
/// coefficients (the section then contributes nothing).
fn design_band(centre: f64, octave: f64, sample_rate: f64) -> IirCoefficients {
    let g0 = 1.0_f64;
    let g1 = std::f64::consts::FRAC_1_SQRT_2;
    let (g0sq, g1sq) = (g0 * g0, g1 * g1);

    let edge = centre / 2f64.powf(octave / 2.0);
    let t0 = 2.0 * PI * centre / sample_rate;
    let t = 2.0 * PI * edge / sample_rate;
    let (cos_t0, cos_t, sin_t) = (t0.cos(), t.cos(), t.sin());

    let a = g1sq * cos_t0 * cos_t0 - 2.0 * g1sq * cos_t * cos_t0 + g1sq - g0sq * sin_t * sin_t;
    let b = 2.0 * g1sq * cos_t * cos_t + g1sq * cos_t0 * cos_t0 - 2.0 * g1sq * cos_t * cos_t0
        - g1sq
        + g0sq * sin_t * sin_t;
    let c = 0.25 * g1sq * cos_t0 * cos_t0 - 0.5 * g1sq * cos_t * cos_t0 + 0.25 * g1sq
        - 0.25 * g0sq * sin_t * sin_t;

    match smaller_root(a, b, c) {
        Some(root) => IirCoefficients {
            alpha: (0.5 - root) as f32,
            beta: (2.0 * root) as f32,
            gamma: (2.0 * (0.5 + root) * cos_t0) as f32,
        },
        None => IirCoefficients::default(),
    }
}

fn smaller_root(a: f64, b: f64, c: f64) -> Option<f64> {
    let k = c - (b * b) / (4.0 * a);
    let h = -(b / (2.0 * a));
    let disc = -(k / a);
    if !disc.is_finite() || disc < 0.0 {
        return None;
    }
    let r = disc.sqrt();
    Some((h - r).min(h + r))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_class_selection() {
        assert_eq!(RateClass::for_rate(44100), Some(RateClass::Hz44100));
        assert_eq!(RateClass::for_rate(45999), Some(RateClass::Hz44100));
        assert_eq!(RateClass::for_rate(46000), Some(RateClass::Hz48000));
        assert_eq!(RateClass::for_rate(48000), Some(RateClass::Hz48000));
        assert_eq!(RateClass::for_rate(32000), None);
        assert_eq!(RateClass::for_rate(96000), None);
    }

    #[test]
    fn test_known_low_band_coefficients() {
        let table = coefficients(BandCount::Ten, RateClass::Hz44100);
        let c = table[0];
        assert!((c.alpha - 0.001_559_12).abs() < 1e-6);
        assert!((c.beta - 0.996_881_76).abs() < 1e-6);
        assert!((c.gamma - 1.996_862_28).abs() < 1e-6);
    }

    #[test]
    fn test_tables_have_one_entry_per_band_and_are_finite() {
        for bands in [BandCount::Ten, BandCount::ThirtyOne] {
            for class in [RateClass::Hz44100, RateClass::Hz48000] {
                let table = coefficients(bands, class);
                assert_eq!(table.len(), bands.count());
                for c in table {
                    assert!(c.alpha.is_finite() && c.beta.is_finite() && c.gamma.is_finite());
                    assert!(c.alpha > 0.0, "band section should be active: {:?}", c);
                }
            }
        }
    }

    #[test]
    fn test_tables_are_cached() {
        let a = coefficients(BandCount::ThirtyOne, RateClass::Hz48000);
        let b = coefficients(BandCount::ThirtyOne, RateClass::Hz48000);
        assert!(std::ptr::eq(a, b));
    }

    #[test]
    fn test_band_count_serde() {
        let parsed: BandCount = serde_json::from_str("31").unwrap();
        assert_eq!(parsed, BandCount::ThirtyOne);
        assert!(serde_json::from_str::<BandCount>("12").is_err());
        assert_eq!(serde_json::to_string(&BandCount::Ten).unwrap(), "10");
    }
}
