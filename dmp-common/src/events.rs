//! Event types for the DMP event system
//!
//! Provides the player event vocabulary and the EventBus every consumer subscribes to.
//!
//! Events never originate on the device's real-time thread. The render path hands its
//! observations to the player's control worker, which converts them into `PlayerEvent`s
//! and publishes them here.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::sync::broadcast;
use tracing::{trace, warn};

/// Player mode
///
/// File playback (`Playing`/`Paused`) and radio playback (`Radio`/`RadioPaused`) are
/// mutually exclusive tracks of the same state machine; both return to `Stopped`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum PlayMode {
    #[default]
    Stopped,
    Playing,
    Paused,
    Radio,
    RadioPaused,
}

impl PlayMode {
    /// True when audio from a stream is reaching the device
    pub fn is_audible(self) -> bool {
        matches!(self, PlayMode::Playing | PlayMode::Radio)
    }

    /// True for either paused mode
    pub fn is_paused(self) -> bool {
        matches!(self, PlayMode::Paused | PlayMode::RadioPaused)
    }

    /// True for the radio track of the state machine
    pub fn is_radio(self) -> bool {
        matches!(self, PlayMode::Radio | PlayMode::RadioPaused)
    }

    /// Mode after a pause request (no-op for modes that cannot pause)
    pub fn paused(self) -> PlayMode {
        match self {
            PlayMode::Playing => PlayMode::Paused,
            PlayMode::Radio => PlayMode::RadioPaused,
            other => other,
        }
    }

    /// Mode after a resume request (no-op for modes that are not paused)
    pub fn resumed(self) -> PlayMode {
        match self {
            PlayMode::Paused => PlayMode::Playing,
            PlayMode::RadioPaused => PlayMode::Radio,
            other => other,
        }
    }
}

impl std::fmt::Display for PlayMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PlayMode::Stopped => write!(f, "Stopped"),
            PlayMode::Playing => write!(f, "Playing"),
            PlayMode::Paused => write!(f, "Paused"),
            PlayMode::Radio => write!(f, "Radio"),
            PlayMode::RadioPaused => write!(f, "RadioPaused"),
        }
    }
}

/// Player event types
///
/// Events are broadcast via EventBus and can be serialized as JSON lines.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum PlayerEvent {
    /// Play mode changed
    PlayModeChanged {
        old_mode: PlayMode,
        new_mode: PlayMode,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A track began playing
    ///
    /// `user_skip` is true when the start follows an explicit `play` while another track
    /// was playing; natural advances are reported after a short delay.
    TrackStarted {
        path: PathBuf,
        user_skip: bool,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// The current track reached its end or was superseded
    TrackEnded {
        path: PathBuf,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// No further track was supplied after the last one ended
    AllTracksEnded {
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A track could not be opened
    TrackFailed {
        path: PathBuf,
        reason: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A radio station could not be reached after all retries
    RadioFailed {
        url: String,
        reason: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Radio stream connected and is pre-buffering
    RadioStarted {
        url: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Radio pre-buffer progress (0-100)
    RadioBuffering {
        url: String,
        percent: u8,
    },

    /// Station name published by the stream changed
    StationChanged {
        name: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Station genre changed
    GenreChanged {
        genre: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Current stream title (artist - title) changed
    StreamTitleChanged {
        title: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Stream bitrate changed (kbit/s)
    BitrateChanged {
        kbps: u32,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Output device switched
    OutputDeviceChanged {
        device: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },
}

impl PlayerEvent {
    /// Short event name for logging
    pub fn event_type(&self) -> &'static str {
        match self {
            PlayerEvent::PlayModeChanged { .. } => "PlayModeChanged",
            PlayerEvent::TrackStarted { .. } => "TrackStarted",
            PlayerEvent::TrackEnded { .. } => "TrackEnded",
            PlayerEvent::AllTracksEnded { .. } => "AllTracksEnded",
            PlayerEvent::TrackFailed { .. } => "TrackFailed",
            PlayerEvent::RadioFailed { .. } => "RadioFailed",
            PlayerEvent::RadioStarted { .. } => "RadioStarted",
            PlayerEvent::RadioBuffering { .. } => "RadioBuffering",
            PlayerEvent::StationChanged { .. } => "StationChanged",
            PlayerEvent::GenreChanged { .. } => "GenreChanged",
            PlayerEvent::StreamTitleChanged { .. } => "StreamTitleChanged",
            PlayerEvent::BitrateChanged { .. } => "BitrateChanged",
            PlayerEvent::OutputDeviceChanged { .. } => "OutputDeviceChanged",
        }
    }
}

// ========================================
// EventBus Implementation
// ========================================

/// Central event distribution bus
///
/// Uses tokio::broadcast internally:
/// - Non-blocking publish (slow subscribers don't block producers)
/// - Multiple concurrent subscribers
/// - Lagged message detection for slow subscribers
///
/// Receivers work from both async code (`recv().await`) and plain threads
/// (`blocking_recv()` / `try_recv()`).
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<PlayerEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with specified channel capacity
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<PlayerEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Ok(subscriber_count)` if at least one subscriber exists.
    #[allow(clippy::result_large_err)]
    pub fn emit(
        &self,
        event: PlayerEvent,
    ) -> Result<usize, broadcast::error::SendError<PlayerEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: PlayerEvent) {
        let name = event.event_type();
        match self.tx.send(event) {
            Ok(count) => trace!("Event {} delivered to {} subscribers", name, count),
            Err(_) => {
                if matches!(name, "TrackFailed" | "RadioFailed") {
                    warn!("No subscribers for {} event", name);
                }
            }
        }
    }

    /// Number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Channel capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
