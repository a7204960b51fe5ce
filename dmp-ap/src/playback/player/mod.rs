//! Player: the playback orchestrator
//!
//! **Module Structure:**
//! - `mod.rs`: state, construction, stream building and routing
//! - `control.rs`: play/stop/pause/resume/seek, preload and track advance
//! - `radio.rs`: station playback
//! - `settings.rs`: gain, equalizer, mute and output device
//! - `diagnostics.rs`: getters, spectrum and diagnostics
//!
//! Lock order is `control` → `preload` → `settings` → `output`, with the render path's
//! stream slots innermost. Events are collected while locks are held and published after
//! they are released.

mod control;
mod diagnostics;
mod radio;
mod settings;

pub use diagnostics::Diagnostics;
pub use settings::EqualizerState;

use super::render::{RenderState, WorkerMessage};
use super::worker;
use crate::audio::backend::{AudioBackend, RenderSource};
use crate::audio::cpal_backend::CpalBackend;
use crate::audio::decoder::{DecoderFactory, SymphoniaDecoderFactory};
use crate::audio::output::{AudioOutput, OutputSettings};
use crate::config::PlayerConfig;
use crate::dsp::spectrum::SpectrumAnalyzer;
use crate::error::Result;
use crate::stream::{null_stream, FileStream, HttpConnector, PcmStream, RadioStream, StreamOptions, TransportConnector};
use crate::track::{ReplayGainMode, Station, Track};
use crossbeam_channel::{bounded, Sender};
use dmp_common::{EventBus, PlayMode, PlayerEvent};
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Render-to-worker notification queue depth
const WORKER_QUEUE: usize = 64;

/// Supplies the track to play after the current one (playlist logic)
///
/// Called from the player's control context with internal locks held; implementations
/// must not call back into the player.
pub trait TrackProvider: Send + Sync {
    fn next_track(&self, finished: Option<&Track>) -> Option<Track>;
}

/// A stream taken off the device, closed once in-flight pulls have settled
pub(crate) struct Retired {
    pub(crate) since: Instant,
    pub(crate) stream: Arc<dyn PcmStream>,
}

/// Close settled streams, dropping those nothing else holds.
///
/// # Returns
/// The streams still referenced elsewhere (a device pull in flight). They go back on
/// the retired list so their last reference is never released on the device thread.
pub(crate) fn close_settled(settled: Vec<Retired>) -> Vec<Retired> {
    let mut shared = Vec::new();
    for retired in settled {
        retired.stream.close();
        if Arc::strong_count(&retired.stream) > 1 {
            shared.push(retired);
        }
    }
    shared
}

/// A natural-advance start announcement waiting for its delay
pub(crate) struct PendingStart {
    pub(crate) due: Instant,
    pub(crate) path: PathBuf,
}

pub(crate) struct ControlState {
    pub(crate) mode: PlayMode,
    pub(crate) playing_track: Option<Track>,
    pub(crate) playing_station: Option<Station>,
    pub(crate) current: Arc<dyn PcmStream>,
    pub(crate) current_radio: Option<Arc<RadioStream>>,
    pub(crate) next_track: Option<Track>,
    pub(crate) stop_after_current: bool,
    pub(crate) played: Vec<Track>,
    pub(crate) retired: Vec<Retired>,
    pub(crate) pending_start: Option<PendingStart>,
    pub(crate) pending_rate: Option<u32>,
    /// Cancellation flag of an in-flight station connection
    pub(crate) connecting: Option<Arc<AtomicBool>>,
    pub(crate) last_metadata_poll: Instant,
}

pub(crate) struct Preloaded {
    pub(crate) track: Track,
    pub(crate) stream: Arc<FileStream>,
}

pub(crate) struct SoundSettings {
    pub(crate) volume_db: f32,
    pub(crate) gain_db: f32,
    pub(crate) replay_gain: ReplayGainMode,
    pub(crate) prevent_clipping: bool,
    pub(crate) equalizer: EqualizerState,
    pub(crate) muted: bool,
    pub(crate) device: Option<String>,
}

impl SoundSettings {
    /// Decoder gain for a stream playing `track`
    pub(crate) fn stream_gain_db(&self, track: Option<&Track>) -> f32 {
        let replay = track
            .map(|t| t.replay_gain.adjustment_db(self.replay_gain, self.prevent_clipping))
            .unwrap_or(0.0);
        replay + self.volume_db + self.gain_db
    }
}

/// The playback orchestrator
///
/// Created with [`Player::new`] as an `Arc`; a control worker thread holds a weak
/// reference and exits once the player is dropped.
pub struct Player {
    pub(crate) config: PlayerConfig,
    pub(crate) backend: Arc<dyn AudioBackend>,
    pub(crate) factory: Arc<dyn DecoderFactory>,
    pub(crate) connector: Arc<dyn TransportConnector>,
    pub(crate) events: EventBus,
    pub(crate) render: Arc<RenderState>,
    pub(crate) output: Mutex<Option<AudioOutput>>,
    pub(crate) control: Mutex<ControlState>,
    pub(crate) preload: Mutex<Option<Preloaded>>,
    pub(crate) settings: Mutex<SoundSettings>,
    pub(crate) provider: Mutex<Option<Arc<dyn TrackProvider>>>,
    pub(crate) worker_tx: Sender<WorkerMessage>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Player {
    /// Build a player over explicit collaborators.
    ///
    /// # Arguments
    /// * `backend` - Device driver capability
    /// * `factory` - Decoder capability
    /// * `connector` - Radio transport capability
    pub fn new(
        config: PlayerConfig,
        backend: Arc<dyn AudioBackend>,
        factory: Arc<dyn DecoderFactory>,
        connector: Arc<dyn TransportConnector>,
    ) -> Result<Arc<Self>> {
        config.validate()?;

        let (worker_tx, worker_rx) = bounded(WORKER_QUEUE);
        let render = Arc::new(RenderState::new(
            SpectrumAnalyzer::new(config.spectrum_size, 44100),
            worker_tx.clone(),
        ));

        let settings = SoundSettings {
            volume_db: 0.0,
            gain_db: 0.0,
            replay_gain: config.replay_gain,
            prevent_clipping: config.replay_gain_prevent_clipping,
            equalizer: EqualizerState::flat(config.equalizer_bands),
            muted: false,
            device: config.device.clone(),
        };

        let player = Arc::new(Self {
            backend,
            factory,
            connector,
            events: EventBus::default(),
            render,
            output: Mutex::new(None),
            control: Mutex::new(ControlState {
                mode: PlayMode::Stopped,
                playing_track: None,
                playing_station: None,
                current: null_stream(),
                current_radio: None,
                next_track: None,
                stop_after_current: false,
                played: Vec::new(),
                retired: Vec::new(),
                pending_start: None,
                pending_rate: None,
                connecting: None,
                last_metadata_poll: Instant::now(),
            }),
            preload: Mutex::new(None),
            settings: Mutex::new(settings),
            provider: Mutex::new(None),
            worker_tx,
            worker: Mutex::new(None),
            config,
        });

        let handle = worker::spawn(Arc::downgrade(&player), worker_rx)?;
        *player.worker.lock() = Some(handle);

        info!("Player ready (backend '{}')", player.backend.name());
        Ok(player)
    }

    /// Player on the cpal backend, symphonia decoding and HTTP radio
    pub fn from_config(config: PlayerConfig) -> Result<Arc<Self>> {
        let backend = Arc::new(CpalBackend::new(config.backend));
        Self::new(
            config,
            backend,
            Arc::new(SymphoniaDecoderFactory),
            Arc::new(HttpConnector),
        )
    }

    pub fn config(&self) -> &PlayerConfig {
        &self.config
    }

    /// Subscribe to player events
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<PlayerEvent> {
        self.events.subscribe()
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Install the playlist hook consulted when a track ends with nothing queued
    pub fn set_track_provider(&self, provider: Option<Arc<dyn TrackProvider>>) {
        *self.provider.lock() = provider;
    }

    /// Stop playback and the control worker
    pub fn shutdown(&self) {
        self.stop();
        let _ = self.worker_tx.send(WorkerMessage::Shutdown);
        if let Some(handle) = self.worker.lock().take() {
            if handle.thread().id() != std::thread::current().id() && handle.join().is_err() {
                warn!("Player worker panicked");
            }
        }
        if let Some(output) = self.output.lock().take() {
            output.kill();
        }
        info!("Player shut down");
    }

    pub(crate) fn stream_options(&self) -> StreamOptions {
        StreamOptions {
            buffer_ms: self.config.stream_buffer_ms,
            equalizer_bands: self.settings.lock().equalizer.bands,
        }
    }

    /// Apply gain and equalizer settings to a new stream
    pub(crate) fn configure_stream(&self, stream: &dyn PcmStream, track: Option<&Track>) {
        let settings = self.settings.lock();
        stream.set_gain_db(settings.stream_gain_db(track));
        if let Some(equalizer) = stream.equalizer() {
            settings.equalizer.apply_to(equalizer);
        }
    }

    /// Open a file stream for `track`, configured for playback
    pub(crate) fn open_file_stream(&self, track: &Track) -> Result<Arc<FileStream>> {
        let stream = FileStream::open(&track.path, self.factory.as_ref(), self.stream_options())?;
        self.configure_stream(&stream, Some(track));
        Ok(Arc::new(stream))
    }

    /// Take the preloaded stream when it matches `track`, otherwise open a fresh one
    pub(crate) fn stream_for(&self, track: &Track) -> Result<Arc<FileStream>> {
        {
            let mut preload = self.preload.lock();
            match preload.take() {
                Some(entry) if entry.track.same_source(track) && !entry.stream.is_closed() => {
                    debug!("Preload hit for {}", track.path.display());
                    return Ok(entry.stream);
                }
                other => *preload = other,
            }
        }
        let stream = self.open_file_stream(track)?;
        stream.wait_ready(self.config.track_start_delay());
        Ok(stream)
    }

    /// Make sure an output device is running; a new one opens at `sample_rate`
    fn ensure_output(&self, sample_rate: u32) -> Result<()> {
        let settings = self.settings.lock();
        let mut output = self.output.lock();
        if output.as_ref().map(|o| o.is_running()).unwrap_or(false) {
            return Ok(());
        }
        let source: Arc<dyn RenderSource> = self.render.clone();
        let opened = AudioOutput::open(
            Arc::clone(&self.backend),
            source,
            OutputSettings {
                device: settings.device.clone(),
                preferred_bit_depth: self.config.preferred_bit_depth,
                buffer_frames: self.config.buffer_frames,
            },
            sample_rate,
        )?;
        opened.set_muted(settings.muted);
        self.render.spectrum().rebuild(sample_rate);
        *output = Some(opened);
        Ok(())
    }

    /// Route `stream` to the device, draining first when the rates differ
    pub(crate) fn install_stream(&self, control: &mut ControlState, stream: Arc<dyn PcmStream>) -> Result<()> {
        let rate = stream.sample_rate();
        self.ensure_output(rate)?;

        {
            let output = self.output.lock();
            if let Some(output) = output.as_ref() {
                let device_rate = output.frequency();
                if rate != 0 && device_rate == rate && control.pending_rate.take().is_some() {
                    // Back at the device rate before an earlier drain completed
                    self.render.end_drain();
                } else if rate != 0 && device_rate != rate {
                    let drain_bytes = output.buffer_size_bytes() * 3 / 2;
                    let drain_samples = output
                        .format()
                        .map(|f| f.samples_for_bytes(drain_bytes))
                        .unwrap_or(0);
                    info!(
                        "Rate change {} -> {} Hz: draining {} bytes of silence",
                        device_rate, rate, drain_bytes
                    );
                    self.render.begin_drain(drain_samples);
                    control.pending_rate = Some(rate);
                }
            }
        }

        let old = self.render.install(Arc::clone(&stream));
        let previous = std::mem::replace(&mut control.current, stream);
        control.current_radio = None;
        if previous.id() != old.id() {
            self.retire(control, previous);
        }
        self.retire(control, old);
        Ok(())
    }

    /// Take the current stream off the device
    pub(crate) fn uninstall_stream(&self, control: &mut ControlState) -> Arc<dyn PcmStream> {
        let old = self.render.install(null_stream());
        let previous = std::mem::replace(&mut control.current, null_stream());
        control.current_radio = None;
        if previous.id() != old.id() {
            self.retire(control, previous);
        }
        old
    }

    pub(crate) fn retire(&self, control: &mut ControlState, stream: Arc<dyn PcmStream>) {
        if crate::stream::null::is_null(&stream) {
            return;
        }
        control.retired.push(Retired {
            since: Instant::now(),
            stream,
        });
    }

    pub(crate) fn resume_output(&self) -> Result<()> {
        if let Some(output) = self.output.lock().as_ref() {
            output.resume()?;
        }
        Ok(())
    }

    pub(crate) fn emit_all(&self, events: Vec<PlayerEvent>) {
        for event in events {
            debug!("Event: {}", event.event_type());
            self.events.emit_lossy(event);
        }
    }

    pub(crate) fn mode_change(old: PlayMode, new: PlayMode) -> Option<PlayerEvent> {
        (old != new).then(|| PlayerEvent::PlayModeChanged {
            old_mode: old,
            new_mode: new,
            timestamp: chrono::Utc::now(),
        })
    }
}

impl Drop for Player {
    fn drop(&mut self) {
        let _ = self.worker_tx.try_send(WorkerMessage::Shutdown);
        if let Some(output) = self.output.get_mut().take() {
            output.kill();
        }
        let control = self.control.get_mut();
        control.current.close();
        for retired in control.retired.drain(..) {
            retired.stream.close();
        }
        if let Some(preloaded) = self.preload.get_mut().take() {
            preloaded.stream.close();
        }
    }
}
