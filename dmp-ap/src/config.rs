//! Configuration for dmp-ap
//!
//! Bootstrap TOML with built-in defaults for every field.
//!
//! # Settings Sources Priority
//!
//! 1. Command-line arguments (`--device`, `--bit-depth`, ...)
//! 2. `--config <file>` or the `DMP_CONFIG` environment variable
//! 3. `<config_dir>/dmp/config.toml`
//! 4. Built-in defaults (code constants)

use crate::audio::cpal_backend::HostKind;
use crate::audio::types::BitDepth;
use crate::dsp::iir::BandCount;
use crate::error::{Error, Result};
use crate::track::ReplayGainMode;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use tracing::info;

/// Player configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PlayerConfig {
    /// Output device name (None = backend default)
    pub device: Option<String>,

    /// Audio host: `shared` (mixer) or `pro_audio` (JACK/ASIO)
    pub backend: HostKind,

    /// Bit depth tried first; 24 falls back to 16 when the device refuses
    #[serde(deserialize_with = "deserialize_bit_depth")]
    pub preferred_bit_depth: BitDepth,

    /// Fixed device callback size in frames (None = driver default)
    pub buffer_frames: Option<u32>,

    /// Equalizer layout: 10 or 31 bands
    pub equalizer_bands: BandCount,

    /// Decode-ahead per stream, milliseconds
    pub stream_buffer_ms: u64,

    /// Spectrum analysis window, frames
    pub spectrum_size: usize,

    /// Delay before announcing a naturally advanced track
    pub track_start_delay_ms: u64,

    /// Time given to in-flight device callbacks before a stopped stream is closed
    pub stop_settle_ms: u64,

    /// Delay between the end of a silence drain and the device rate change
    pub rate_change_delay_ms: u64,

    /// Accepted release years; tag years outside are clamped
    pub release_year_bounds: (i32, i32),

    pub replay_gain: ReplayGainMode,

    /// Limit replay gain so peaks stay below full scale
    pub replay_gain_prevent_clipping: bool,

    pub radio: RadioConfig,

    pub logging: LoggingConfig,
}

/// Internet radio settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RadioConfig {
    /// Connection attempts per negotiation before giving up
    pub max_retries: u32,
    pub retry_backoff_ms: u64,
    pub connect_timeout_ms: u64,
    /// Longest wait for the pre-buffer to fill
    pub prebuffer_timeout_ms: u64,
    pub prebuffer_poll_ms: u64,
    /// Fill level (percent) that ends pre-buffering
    pub prebuffer_threshold_percent: u8,
    pub metadata_poll_ms: u64,
    pub user_agent: String,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level or filter directive (trace, debug, info, warn, error)
    pub level: String,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            device: None,
            backend: HostKind::Shared,
            preferred_bit_depth: BitDepth::Bits24,
            buffer_frames: None,
            equalizer_bands: BandCount::Ten,
            stream_buffer_ms: 2000,
            spectrum_size: 1024,
            track_start_delay_ms: 200,
            stop_settle_ms: 50,
            rate_change_delay_ms: 20,
            release_year_bounds: (1900, 2100),
            replay_gain: ReplayGainMode::Off,
            replay_gain_prevent_clipping: true,
            radio: RadioConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for RadioConfig {
    fn default() -> Self {
        Self {
            max_retries: 4,
            retry_backoff_ms: 1000,
            connect_timeout_ms: 10_000,
            prebuffer_timeout_ms: 5000,
            prebuffer_poll_ms: 100,
            prebuffer_threshold_percent: 75,
            metadata_poll_ms: 1000,
            user_agent: format!("dmp-ap/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

fn deserialize_bit_depth<'de, D>(deserializer: D) -> std::result::Result<BitDepth, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let bits = u16::deserialize(deserializer)?;
    BitDepth::from_bits(bits)
        .ok_or_else(|| serde::de::Error::custom(format!("bit depth must be 16 or 24, got {}", bits)))
}

impl PlayerConfig {
    /// Resolve and load the config file, falling back to defaults when none exists
    pub fn load(cli_path: Option<&Path>) -> Result<Self> {
        let path = dmp_common::config::resolve_config_path(cli_path, dmp_common::config::CONFIG_ENV_VAR)?;
        let config = match path {
            Some(path) => {
                info!("Loading configuration from {}", path.display());
                dmp_common::config::load_toml::<PlayerConfig>(&path)?
            }
            None => {
                info!("No configuration file found, using built-in defaults");
                PlayerConfig::default()
            }
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let (lo, hi) = self.release_year_bounds;
        if lo > hi {
            return Err(Error::Config(format!(
                "release_year_bounds lower bound {} exceeds upper bound {}",
                lo, hi
            )));
        }
        if self.radio.prebuffer_threshold_percent > 100 {
            return Err(Error::Config(
                "radio.prebuffer_threshold_percent must be at most 100".to_string(),
            ));
        }
        if self.radio.prebuffer_poll_ms == 0 {
            return Err(Error::Config("radio.prebuffer_poll_ms must be positive".to_string()));
        }
        if self.spectrum_size < 16 {
            return Err(Error::Config("spectrum_size must be at least 16".to_string()));
        }
        if self.stream_buffer_ms < 100 {
            return Err(Error::Config("stream_buffer_ms must be at least 100".to_string()));
        }
        Ok(())
    }

    pub fn track_start_delay(&self) -> Duration {
        Duration::from_millis(self.track_start_delay_ms)
    }

    pub fn stop_settle(&self) -> Duration {
        Duration::from_millis(self.stop_settle_ms)
    }

    pub fn rate_change_delay(&self) -> Duration {
        Duration::from_millis(self.rate_change_delay_ms)
    }
}
