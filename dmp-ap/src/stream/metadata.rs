//! Live station metadata and change detection

use dmp_common::PlayerEvent;
use serde::Serialize;

/// What a station currently publishes about itself
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StationMetadata {
    pub name: Option<String>,
    pub genre: Option<String>,
    pub bitrate_kbps: Option<u32>,
    /// Current stream title, usually "Artist - Title"
    pub title: Option<String>,
}

/// A single field that changed since the last poll
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MetadataChange {
    Station(String),
    Genre(String),
    Title(String),
    Bitrate(u32),
}

impl MetadataChange {
    pub fn into_event(self) -> PlayerEvent {
        let timestamp = chrono::Utc::now();
        match self {
            MetadataChange::Station(name) => PlayerEvent::StationChanged { name, timestamp },
            MetadataChange::Genre(genre) => PlayerEvent::GenreChanged { genre, timestamp },
            MetadataChange::Title(title) => PlayerEvent::StreamTitleChanged { title, timestamp },
            MetadataChange::Bitrate(kbps) => PlayerEvent::BitrateChanged { kbps, timestamp },
        }
    }
}

/// Remembers the last published values so repeats are not re-announced
#[derive(Debug, Default)]
pub struct MetadataTracker {
    last: StationMetadata,
}

impl MetadataTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Compare against the last values; returns only fields that are present and new
    pub fn update(&mut self, current: &StationMetadata) -> Vec<MetadataChange> {
        let mut changes = Vec::new();

        if let Some(name) = changed(&self.last.name, &current.name) {
            changes.push(MetadataChange::Station(name));
        }
        if let Some(genre) = changed(&self.last.genre, &current.genre) {
            changes.push(MetadataChange::Genre(genre));
        }
        if let Some(title) = changed(&self.last.title, &current.title) {
            changes.push(MetadataChange::Title(title));
        }
        if let Some(kbps) = current.bitrate_kbps.filter(|k| Some(*k) != self.last.bitrate_kbps) {
            changes.push(MetadataChange::Bitrate(kbps));
        }

        // Keep old values for fields the station stopped sending
        let previous = std::mem::take(&mut self.last);
        self.last = StationMetadata {
            name: current.name.clone().or(previous.name),
            genre: current.genre.clone().or(previous.genre),
            bitrate_kbps: current.bitrate_kbps.or(previous.bitrate_kbps),
            title: current.title.clone().or(previous.title),
        };
        changes
    }

    pub fn last(&self) -> &StationMetadata {
        &self.last
    }
}

fn changed(last: &Option<String>, current: &Option<String>) -> Option<String> {
    match current {
        Some(value) if !value.trim().is_empty() && last.as_ref() != Some(value) => Some(value.clone()),
        _ => None,
    }
}
