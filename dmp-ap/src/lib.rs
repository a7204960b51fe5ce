//! # DMP Audio Player Library (dmp-ap)
//!
//! Real-time audio playback pipeline: decoded PCM streams (local files, internet radio,
//! silence), a hot-swappable IIR graphic equalizer, a pull-driven output device and the
//! [`Player`] that routes streams to the device with preload and rate-change draining.
//!
//! **Architecture:** symphonia decoding into per-stream ring buffers, cpal output driven
//! by the device callback, control work on a dedicated worker thread.

pub mod audio;
pub mod config;
pub mod dsp;
pub mod error;
pub mod playback;
pub mod stream;
pub mod track;

pub use config::PlayerConfig;
pub use error::{Error, Result};
pub use playback::{Player, TrackProvider};
pub use track::{Station, Track};
