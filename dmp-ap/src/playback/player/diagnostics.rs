//! Player getters and diagnostics

use super::Player;
use crate::audio::types::PcmFormat;
use crate::dsp::spectrum::SpectrumData;
use crate::track::{Station, Track};
use dmp_common::PlayMode;
use serde::Serialize;
use std::time::Duration;

/// Clipping rate above which the current stream is reported as clipping
const CLIPPING_THRESHOLD: f32 = 0.001;

/// Point-in-time health report
#[derive(Debug, Clone, Serialize)]
pub struct Diagnostics {
    pub mode: PlayMode,
    pub backend: String,
    pub device: Option<String>,
    pub format: Option<PcmFormat>,
    pub buffer_size_bytes: usize,
    /// Read shortfalls of the current stream plus pulls that met a locked stream slot
    pub underruns: u64,
    pub clipping_rate: f32,
    pub rate_change_pending: bool,
    pub drain_samples_remaining: usize,
    pub drained_samples_total: u64,
    /// A preloaded stream is armed to take over gaplessly when the current one ends
    pub gapless_armed: bool,
    pub output_error: bool,
}

impl Player {
    pub fn mode(&self) -> PlayMode {
        self.control.lock().mode
    }

    pub fn playing_track(&self) -> Option<Track> {
        self.control.lock().playing_track.clone()
    }

    pub fn playing_station(&self) -> Option<Station> {
        self.control.lock().playing_station.clone()
    }

    /// Tagged release year of the playing track, clamped to the configured bounds
    pub fn release_year(&self) -> Option<i32> {
        let control = self.control.lock();
        control
            .playing_track
            .as_ref()
            .and_then(|track| track.metadata.release_year(self.config.release_year_bounds))
    }

    pub fn next_track(&self) -> Option<Track> {
        self.control.lock().next_track.clone()
    }

    /// Position in the current stream
    pub fn elapsed(&self) -> Duration {
        self.control.lock().current.elapsed()
    }

    /// Total length of the current stream; `None` for radio or when stopped
    pub fn duration(&self) -> Option<Duration> {
        self.control.lock().current.duration()
    }

    pub fn bitrate_kbps(&self) -> Option<u32> {
        self.control.lock().current.bitrate_kbps()
    }

    /// Smoothed fraction of clipped samples in the current stream
    pub fn clipping_rate(&self) -> f32 {
        self.control.lock().current.clipping_rate()
    }

    pub fn is_clipping(&self) -> bool {
        self.clipping_rate() > CLIPPING_THRESHOLD
    }

    /// Spectrum of the most recent audible device buffer; zeroed while not playing
    pub fn spectrum(&self) -> SpectrumData {
        self.render.spectrum().snapshot()
    }

    /// Tracks in the order they started playing
    pub fn played_tracks(&self) -> Vec<Track> {
        self.control.lock().played.clone()
    }

    /// The track played before the current one
    pub fn previous_track(&self) -> Option<Track> {
        let control = self.control.lock();
        let played = &control.played;
        let skip = if control.playing_track.is_some() { 2 } else { 1 };
        played.len().checked_sub(skip).map(|i| played[i].clone())
    }

    pub fn volume_db(&self) -> f32 {
        self.settings.lock().volume_db
    }

    pub fn gain_db(&self) -> f32 {
        self.settings.lock().gain_db
    }

    /// Negotiated format of the running output
    pub fn output_format(&self) -> Option<PcmFormat> {
        self.output.lock().as_ref().and_then(|o| o.format())
    }

    pub fn output_device(&self) -> Option<String> {
        self.output.lock().as_ref().and_then(|o| o.device_name())
    }

    pub fn diagnostics(&self) -> Diagnostics {
        let (mode, underruns, clipping_rate) = {
            let control = self.control.lock();
            (control.mode, control.current.underruns(), control.current.clipping_rate())
        };
        let (device, format, buffer_size_bytes, output_error) = match self.output.lock().as_ref() {
            Some(output) => (
                output.device_name(),
                output.format(),
                output.buffer_size_bytes(),
                output.has_error(),
            ),
            None => (None, None, 0, false),
        };

        Diagnostics {
            mode,
            backend: self.backend.name().to_string(),
            device,
            format,
            buffer_size_bytes,
            underruns: underruns + self.render.contention(),
            clipping_rate,
            rate_change_pending: self.render.is_rate_pending(),
            drain_samples_remaining: self.render.drain_remaining(),
            drained_samples_total: self.render.drained_total(),
            gapless_armed: self.render.next_id().is_some(),
            output_error,
        }
    }
}
