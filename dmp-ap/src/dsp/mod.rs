//! Signal processing: graphic equalizer and spectrum analysis

pub mod equalizer;
pub mod iir;
pub mod presets;
pub mod spectrum;

pub use equalizer::{Equalizer, EqualizerEngine, EqualizerProcessor};
pub use iir::BandCount;
pub use presets::EqualizerPreset;
pub use spectrum::{SpectrumAnalyzer, SpectrumData};
