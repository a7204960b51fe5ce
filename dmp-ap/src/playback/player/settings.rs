//! Gain, equalizer, mute and output device settings
//!
//! Settings live on the player and are pushed to both the current and the preloaded
//! stream whenever they change, so a promoted preload already sounds right.

use super::Player;
use crate::dsp::equalizer::Equalizer;
use crate::dsp::iir::BandCount;
use crate::dsp::presets::EqualizerPreset;
use crate::error::{Error, Result};
use crate::stream::PcmStream;
use crate::track::ReplayGainMode;
use dmp_common::PlayerEvent;
use serde::Serialize;
use tracing::{debug, info, warn};

/// Player-wide equalizer settings, applied to every stream it plays
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EqualizerState {
    pub enabled: bool,
    pub bands: BandCount,
    /// UI band values in dB (10, 30 or 31 entries)
    pub values: Vec<f32>,
    pub preamp_db: f32,
}

impl EqualizerState {
    /// Disabled, all bands at 0 dB
    pub fn flat(bands: BandCount) -> Self {
        Self {
            enabled: false,
            bands,
            values: vec![0.0; bands.count()],
            preamp_db: 0.0,
        }
    }

    /// Bring a stream's equalizer in line with these settings
    pub fn apply_to(&self, equalizer: &Equalizer) {
        if equalizer.band_count() != self.bands {
            equalizer.reconfigure(self.bands, equalizer.sample_rate());
        }
        if let Err(e) = equalizer.apply_band_gains(&self.values) {
            warn!("Equalizer values rejected: {}", e);
        }
        equalizer.set_preamp_db(self.preamp_db);
        equalizer.set_enabled(self.enabled);
    }
}

fn check_band_values(bands: BandCount, values: &[f32]) -> Result<()> {
    let expected = bands.count();
    let accepted = values.len() == expected || (bands == BandCount::ThirtyOne && values.len() == expected - 1);
    if !accepted {
        return Err(Error::InvalidInput(format!(
            "{} band values given for a {}-band equalizer",
            values.len(),
            expected
        )));
    }
    Ok(())
}

impl Player {
    /// User volume in dB
    pub fn set_volume_db(&self, db: f32) {
        self.settings.lock().volume_db = db;
        self.push_gain();
    }

    /// Album/replay gain offset in dB, independent of the volume
    pub fn set_gain_db(&self, db: f32) {
        self.settings.lock().gain_db = db;
        self.push_gain();
    }

    pub fn set_replay_gain_mode(&self, mode: ReplayGainMode, prevent_clipping: bool) {
        {
            let mut settings = self.settings.lock();
            settings.replay_gain = mode;
            settings.prevent_clipping = prevent_clipping;
        }
        info!("Replay gain {:?} (prevent clipping: {})", mode, prevent_clipping);
        self.push_gain();
    }

    pub fn replay_gain_mode(&self) -> ReplayGainMode {
        self.settings.lock().replay_gain
    }

    /// Recompute the effective gain of the current and preloaded streams
    fn push_gain(&self) {
        let control = self.control.lock();
        let preload = self.preload.lock();
        let settings = self.settings.lock();

        let current = settings.stream_gain_db(control.playing_track.as_ref());
        control.current.set_gain_db(current);
        if let Some(entry) = preload.as_ref() {
            entry.stream.set_gain_db(settings.stream_gain_db(Some(&entry.track)));
        }
        debug!("Stream gain now {:.2} dB", current);
    }

    pub fn set_equalizer_enabled(&self, enabled: bool) {
        self.settings.lock().equalizer.enabled = enabled;
        self.push_equalizer();
    }

    /// Set UI band values in dB; the count must match the configured layout
    pub fn set_equalizer_values(&self, values: &[f32]) -> Result<()> {
        {
            let mut settings = self.settings.lock();
            check_band_values(settings.equalizer.bands, values)?;
            settings.equalizer.values = values.to_vec();
        }
        self.push_equalizer();
        Ok(())
    }

    pub fn set_equalizer_preamp_db(&self, db: f32) {
        self.settings.lock().equalizer.preamp_db = db;
        self.push_equalizer();
    }

    /// Switch between the 10- and 31-band layouts. Band values reset to flat.
    pub fn set_equalizer_bands(&self, bands: BandCount) {
        {
            let mut settings = self.settings.lock();
            if settings.equalizer.bands == bands {
                return;
            }
            settings.equalizer.bands = bands;
            settings.equalizer.values = vec![0.0; bands.count()];
        }
        info!("Equalizer layout now {} bands", bands.count());
        self.push_equalizer();
    }

    /// Load a named preset into the current layout and enable the equalizer
    pub fn apply_preset(&self, preset: EqualizerPreset) {
        {
            let mut settings = self.settings.lock();
            let bands = settings.equalizer.bands;
            settings.equalizer.values = preset.values(bands);
            settings.equalizer.enabled = true;
        }
        info!("Equalizer preset '{}'", preset.name());
        self.push_equalizer();
    }

    pub fn equalizer(&self) -> EqualizerState {
        self.settings.lock().equalizer.clone()
    }

    fn push_equalizer(&self) {
        let control = self.control.lock();
        let preload = self.preload.lock();
        let settings = self.settings.lock();

        if let Some(equalizer) = control.current.equalizer() {
            settings.equalizer.apply_to(equalizer);
        }
        if let Some(equalizer) = preload.as_ref().and_then(|entry| entry.stream.equalizer()) {
            settings.equalizer.apply_to(equalizer);
        }
    }

    /// Mute substitutes silence at the device; streams keep advancing
    pub fn set_muted(&self, muted: bool) {
        let mut settings = self.settings.lock();
        settings.muted = muted;
        if let Some(output) = self.output.lock().as_ref() {
            output.set_muted(muted);
        }
    }

    pub fn is_muted(&self) -> bool {
        self.settings.lock().muted
    }

    /// Output devices of the configured backend
    pub fn list_devices(&self) -> Result<Vec<String>> {
        self.backend.list_devices()
    }

    /// Move output to `device` (`None` for the backend default).
    ///
    /// The new device is running before the old one closes. With no output open yet the
    /// choice is stored for the next one.
    pub fn switch_device(&self, device: Option<String>) -> Result<()> {
        let name = {
            let mut settings = self.settings.lock();
            let output = self.output.lock();
            let name = match output.as_ref() {
                Some(output) if output.is_running() => {
                    output.switch_device(device.clone())?;
                    output.device_name()
                }
                _ => None,
            };
            settings.device = device.clone();
            name.or(device).unwrap_or_else(|| "default".to_string())
        };

        info!("Output device now '{}'", name);
        self.events.emit_lossy(PlayerEvent::OutputDeviceChanged {
            device: name,
            timestamp: chrono::Utc::now(),
        });
        Ok(())
    }
}
