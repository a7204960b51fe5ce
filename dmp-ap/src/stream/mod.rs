//! PCM streams
//!
//! Every playable source (file, radio station, silence) is a [`PcmStream`]: the render
//! path pulls interleaved stereo `f32` from it at the stream's native sample rate. A
//! stream's rate never changes; playing at another rate means building another stream.

mod core;
pub mod file;
pub mod metadata;
pub mod null;
pub mod radio;
#[cfg(test)]
pub(crate) mod scripted;
pub mod transport;

use crate::config::PlayerConfig;
use crate::dsp::equalizer::Equalizer;
use crate::dsp::iir::BandCount;
use crate::error::Result;
use std::path::PathBuf;
use std::time::Duration;

pub use self::core::db_to_linear;
pub use file::FileStream;
pub use metadata::{MetadataChange, MetadataTracker, StationMetadata};
pub use null::{null_stream, NullStream};
pub use radio::RadioStream;
pub use transport::{HttpConnector, Negotiation, RadioConnection, RadioTransport, TransportConnector};

/// What a stream plays
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamSource {
    Null,
    File(PathBuf),
    Radio(String),
}

/// A source of interleaved stereo PCM
pub trait PcmStream: Send + Sync {
    /// Process-unique identity
    fn id(&self) -> u64;

    fn source(&self) -> StreamSource;

    /// Fill `out` completely, padding with silence when data is short.
    ///
    /// Returns `out.len()` while data flows. A shorter count means the stream ended
    /// inside this buffer after that many samples; 0 means it had already ended. Called
    /// from the device thread: never blocks on I/O.
    fn read(&self, out: &mut [f32]) -> usize;

    /// Native sample rate; 0 for a stream that adapts to any rate
    fn sample_rate(&self) -> u32;

    fn elapsed(&self) -> Duration;

    /// Seek. Positions beyond the end clamp to the duration; returns the position reached.
    fn set_elapsed(&self, position: Duration) -> Result<Duration>;

    fn duration(&self) -> Option<Duration>;

    fn bitrate_kbps(&self) -> Option<u32>;

    /// Total decoder gain in dB; applies from the next processed buffer
    fn set_gain_db(&self, db: f32);

    fn gain_db(&self) -> f32;

    fn equalizer(&self) -> Option<&Equalizer>;

    /// Smoothed fraction of recent output samples beyond full scale
    fn clipping_rate(&self) -> f32;

    /// Reads that came up short of decoded data
    fn underruns(&self) -> u64;

    /// Release decoder and network resources. Safe to repeat, and safe while a read is
    /// in flight on another thread.
    fn close(&self);

    fn is_closed(&self) -> bool;
}

/// Per-stream construction settings
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StreamOptions {
    /// Decode-ahead, milliseconds
    pub buffer_ms: u64,
    pub equalizer_bands: BandCount,
}

impl Default for StreamOptions {
    fn default() -> Self {
        Self {
            buffer_ms: 2000,
            equalizer_bands: BandCount::Ten,
        }
    }
}

impl From<&PlayerConfig> for StreamOptions {
    fn from(config: &PlayerConfig) -> Self {
        Self {
            buffer_ms: config.stream_buffer_ms,
            equalizer_bands: config.equalizer_bands,
        }
    }
}
