//! Playable items: file tracks and radio stations
//!
//! Tracks carry tag metadata and replay-gain values read with lofty. Reading tags is
//! best-effort: an untagged or unreadable file is still playable.

use lofty::prelude::*;
use lofty::probe::Probe;
use lofty::tag::{ItemKey, Tag};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// Replay gain normalisation mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ReplayGainMode {
    #[default]
    Off,
    Track,
    Album,
}

/// Replay gain values read from tags
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct ReplayGainInfo {
    pub track_gain_db: Option<f32>,
    /// Linear peak (1.0 = full scale)
    pub track_peak: Option<f32>,
    pub album_gain_db: Option<f32>,
    pub album_peak: Option<f32>,
}

impl ReplayGainInfo {
    /// Adjustment in dB for `mode`.
    ///
    /// Album mode falls back to track values when album tags are missing. With
    /// `prevent_clipping` the gain is limited so `gain * peak <= 1.0`.
    pub fn adjustment_db(&self, mode: ReplayGainMode, prevent_clipping: bool) -> f32 {
        let (gain, peak) = match mode {
            ReplayGainMode::Off => return 0.0,
            ReplayGainMode::Track => (self.track_gain_db, self.track_peak),
            ReplayGainMode::Album => (
                self.album_gain_db.or(self.track_gain_db),
                self.album_peak.or(self.track_peak),
            ),
        };

        let Some(mut db) = gain else {
            return 0.0;
        };

        if prevent_clipping {
            if let Some(peak) = peak.filter(|p| *p > 0.0) {
                let max_db = -20.0 * peak.log10();
                db = db.min(max_db);
            }
        }
        db
    }
}

/// Tag metadata of a file track
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TrackMetadata {
    pub title: Option<String>,
    pub artist: Option<String>,
    pub album: Option<String>,
    pub genre: Option<String>,
    pub year: Option<u32>,
    pub duration: Option<Duration>,
    pub sample_rate: Option<u32>,
    pub bitrate_kbps: Option<u32>,
}

impl TrackMetadata {
    /// Release year clamped to `bounds` (inclusive)
    pub fn release_year(&self, bounds: (i32, i32)) -> Option<i32> {
        let (lo, hi) = bounds;
        self.year.map(|y| (y as i32).clamp(lo, hi))
    }

    /// "Artist - Title" when both are known, otherwise whichever is
    pub fn display_title(&self) -> Option<String> {
        match (&self.artist, &self.title) {
            (Some(a), Some(t)) => Some(format!("{} - {}", a, t)),
            (None, Some(t)) => Some(t.clone()),
            (Some(a), None) => Some(a.clone()),
            (None, None) => None,
        }
    }
}

/// A local file to play
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Track {
    pub path: PathBuf,
    pub metadata: TrackMetadata,
    pub replay_gain: ReplayGainInfo,
}

impl Track {
    /// Track without reading tags
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            metadata: TrackMetadata::default(),
            replay_gain: ReplayGainInfo::default(),
        }
    }

    /// Track with tags read from the file (missing or unreadable tags leave defaults)
    pub fn from_file(path: impl Into<PathBuf>) -> Self {
        let mut track = Self::new(path);
        match read_tags(&track.path) {
            Ok((metadata, replay_gain)) => {
                track.metadata = metadata;
                track.replay_gain = replay_gain;
            }
            Err(e) => debug!("No tags for {}: {}", track.path.display(), e),
        }
        track
    }

    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    /// Same underlying file
    pub fn same_source(&self, other: &Track) -> bool {
        self.path == other.path
    }
}

/// An internet radio station
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Station {
    pub url: String,
    pub name: Option<String>,
}

impl Station {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            name: None,
        }
    }
}

fn read_tags(path: &Path) -> std::result::Result<(TrackMetadata, ReplayGainInfo), String> {
    let tagged = Probe::open(path)
        .map_err(|e| e.to_string())?
        .read()
        .map_err(|e| e.to_string())?;

    let properties = tagged.properties();
    let mut metadata = TrackMetadata {
        duration: Some(properties.duration()),
        sample_rate: properties.sample_rate(),
        bitrate_kbps: properties.audio_bitrate(),
        ..Default::default()
    };

    let Some(tag) = tagged.primary_tag().or_else(|| tagged.first_tag()) else {
        return Ok((metadata, ReplayGainInfo::default()));
    };

    metadata.title = tag.title().map(|s| s.to_string());
    metadata.artist = tag.artist().map(|s| s.to_string());
    metadata.album = tag.album().map(|s| s.to_string());
    metadata.genre = tag.genre().map(|s| s.to_string());
    metadata.year = tag.year();

    let replay_gain = ReplayGainInfo {
        track_gain_db: find_value(tag, ItemKey::ReplayGainTrackGain, "REPLAYGAIN_TRACK_GAIN")
            .and_then(|v| parse_gain(&v))
            .or_else(|| find_unknown(tag, "R128_TRACK_GAIN").and_then(|v| parse_r128(&v))),
        track_peak: find_value(tag, ItemKey::ReplayGainTrackPeak, "REPLAYGAIN_TRACK_PEAK")
            .and_then(|v| v.trim().parse().ok()),
        album_gain_db: find_value(tag, ItemKey::ReplayGainAlbumGain, "REPLAYGAIN_ALBUM_GAIN")
            .and_then(|v| parse_gain(&v))
            .or_else(|| find_unknown(tag, "R128_ALBUM_GAIN").and_then(|v| parse_r128(&v))),
        album_peak: find_value(tag, ItemKey::ReplayGainAlbumPeak, "REPLAYGAIN_ALBUM_PEAK")
            .and_then(|v| v.trim().parse().ok()),
    };

    Ok((metadata, replay_gain))
}

fn find_value(tag: &Tag, key: ItemKey, raw: &str) -> Option<String> {
    tag.get_string(&key)
        .map(|s| s.to_string())
        .or_else(|| find_unknown(tag, raw))
}

fn find_unknown(tag: &Tag, raw: &str) -> Option<String> {
    [raw.to_string(), raw.to_ascii_lowercase()]
        .into_iter()
        .find_map(|k| tag.get_string(&ItemKey::Unknown(k)).map(|s| s.to_string()))
}

/// "-7.5 dB" -> -7.5
fn parse_gain(value: &str) -> Option<f32> {
    let trimmed = value.trim();
    let number = trimmed
        .strip_suffix("dB")
        .or_else(|| trimmed.strip_suffix("db"))
        .unwrap_or(trimmed);
    number.trim().parse().ok()
}

/// Opus R128 gain: Q7.8 fixed point relative to -23 LUFS, shifted to the -18 LUFS
/// replay gain reference
fn parse_r128(value: &str) -> Option<f32> {
    let q78: i32 = value.trim().parse().ok()?;
    Some(q78 as f32 / 256.0 + 5.0)
}
