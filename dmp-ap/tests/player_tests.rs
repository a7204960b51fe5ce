//! Player integration tests
//!
//! The loopback backend stands in for the device driver: each `pull_buffer` is one
//! driver callback, so every scenario runs deterministically without hardware.

mod helpers;

use dmp_ap::audio::loopback::LoopbackBackend;
use dmp_ap::dsp::{BandCount, EqualizerPreset};
use dmp_ap::stream::TransportConnector;
use dmp_ap::{Player, PlayerConfig, Track, TrackProvider};
use dmp_common::{PlayMode, PlayerEvent};
use helpers::fakes::{FakeDecoderFactory, ScriptedConnector, TONE_AMPLITUDE};
use helpers::{drain_events, fast_config, take_events, wait_for_event, wait_until};
use parking_lot::Mutex;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

const WAIT: Duration = Duration::from_secs(3);

struct Rig {
    player: Arc<Player>,
    backend: LoopbackBackend,
    factory: Arc<FakeDecoderFactory>,
    dir: TempDir,
}

impl Rig {
    fn new(config: PlayerConfig, duration: Duration) -> Self {
        Self::with_backend(config, duration, LoopbackBackend::new().with_buffer_frames(512))
    }

    fn with_backend(config: PlayerConfig, duration: Duration, backend: LoopbackBackend) -> Self {
        let factory = Arc::new(FakeDecoderFactory::new(44100, duration));
        let connector: Arc<dyn TransportConnector> = Arc::new(ScriptedConnector::unreachable());
        let player = Player::new(config, Arc::new(backend.clone()), factory.clone(), connector).unwrap();
        Self {
            player,
            backend,
            factory,
            dir: TempDir::new().unwrap(),
        }
    }

    /// A track backed by an (empty) file the fake decoder will accept
    fn track(&self, name: &str) -> Track {
        let path = self.dir.path().join(name);
        std::fs::write(&path, b"").unwrap();
        Track::new(path)
    }

    fn pull(&self) -> Vec<f32> {
        self.backend.pull_buffer()
    }

    /// Pull until `check` sees the condition, sleeping briefly between callbacks
    fn pull_until<F: FnMut(&[f32]) -> bool>(&self, timeout: Duration, mut check: F) -> bool {
        let deadline = std::time::Instant::now() + timeout;
        while std::time::Instant::now() < deadline {
            let buffer = self.pull();
            if check(&buffer) {
                return true;
            }
            std::thread::sleep(Duration::from_millis(1));
        }
        false
    }
}

fn is_silent(buffer: &[f32]) -> bool {
    buffer.iter().all(|&s| s == 0.0)
}

fn peak(buffer: &[f32]) -> f32 {
    buffer.iter().fold(0.0f32, |m, &s| m.max(s.abs()))
}

fn started(event: &PlayerEvent, path: &Path) -> bool {
    matches!(event, PlayerEvent::TrackStarted { path: p, .. } if p == path)
}

/// Provider serving a fixed list
struct ListProvider(Mutex<Vec<Track>>);

impl TrackProvider for ListProvider {
    fn next_track(&self, _finished: Option<&Track>) -> Option<Track> {
        let mut list = self.0.lock();
        if list.is_empty() {
            None
        } else {
            Some(list.remove(0))
        }
    }
}

// ========================================
// Play / stop / pause
// ========================================

#[test]
fn test_play_from_stopped_reaches_playing_and_time_advances() {
    let rig = Rig::new(fast_config(), Duration::from_secs(2));
    let mut events = rig.player.subscribe();
    let a = rig.track("a.flac");

    assert_eq!(rig.player.mode(), PlayMode::Stopped);
    rig.player.play(a.clone()).unwrap();

    assert_eq!(rig.player.mode(), PlayMode::Playing);
    assert_eq!(rig.player.playing_track(), Some(a.clone()));
    assert_eq!(rig.player.elapsed(), Duration::ZERO);
    assert!(wait_for_event(&mut events, WAIT, |e| started(e, &a.path)).is_some());

    let first = rig.pull();
    assert!((first[0] - TONE_AMPLITUDE).abs() < 1e-4, "first sample {}", first[0]);

    let mut last = rig.player.elapsed();
    for _ in 0..20 {
        rig.pull();
        let now = rig.player.elapsed();
        assert!(now >= last);
        last = now;
    }
    assert!(last > Duration::ZERO);
    assert_eq!(rig.backend.active_format().map(|f| f.sample_rate), Some(44100));
}

#[test]
fn test_stop_clears_track_and_device_pulls_silence() {
    let rig = Rig::new(fast_config(), Duration::from_secs(2));
    let mut events = rig.player.subscribe();
    let a = rig.track("a.flac");

    rig.player.play(a).unwrap();
    assert!(!is_silent(&rig.pull()));

    rig.player.stop();
    assert_eq!(rig.player.mode(), PlayMode::Stopped);
    assert!(rig.player.playing_track().is_none());
    for _ in 0..5 {
        assert!(is_silent(&rig.pull()));
    }
    assert!(rig.player.spectrum().is_silent());

    let stopped = wait_for_event(&mut events, WAIT, |e| {
        matches!(
            e,
            PlayerEvent::PlayModeChanged {
                new_mode: PlayMode::Stopped,
                ..
            }
        )
    });
    assert!(stopped.is_some());
}

#[test]
fn test_stop_when_stopped_is_quiet() {
    let rig = Rig::new(fast_config(), Duration::from_secs(1));
    let mut events = rig.player.subscribe();
    rig.player.stop();
    assert!(drain_events(&mut events, Duration::from_millis(50)).is_empty());
}

#[test]
fn test_pause_and_resume_are_idempotent() {
    let rig = Rig::new(fast_config(), Duration::from_secs(2));
    let mut events = rig.player.subscribe();
    rig.player.play(rig.track("a.flac")).unwrap();
    rig.pull();

    rig.player.pause().unwrap();
    rig.player.pause().unwrap();
    assert_eq!(rig.player.mode(), PlayMode::Paused);
    assert!(!rig.backend.is_playing());
    assert!(rig.player.spectrum().is_silent());

    rig.player.resume().unwrap();
    rig.player.resume().unwrap();
    assert_eq!(rig.player.mode(), PlayMode::Playing);
    assert!(rig.backend.is_playing());

    let changes: Vec<_> = drain_events(&mut events, Duration::from_millis(100))
        .into_iter()
        .filter(|e| matches!(e, PlayerEvent::PlayModeChanged { .. }))
        .collect();
    // Stopped->Playing, Playing->Paused, Paused->Playing
    assert_eq!(changes.len(), 3);
}

#[test]
fn test_pause_when_stopped_is_noop() {
    let rig = Rig::new(fast_config(), Duration::from_secs(1));
    rig.player.pause().unwrap();
    rig.player.resume().unwrap();
    assert_eq!(rig.player.mode(), PlayMode::Stopped);
}

#[test]
fn test_mute_substitutes_silence_while_time_advances() {
    let rig = Rig::new(fast_config(), Duration::from_secs(2));
    rig.player.play(rig.track("a.flac")).unwrap();
    assert!(!is_silent(&rig.pull()));

    rig.player.set_muted(true);
    assert!(rig.player.is_muted());
    let before = rig.player.elapsed();
    for _ in 0..10 {
        assert!(is_silent(&rig.pull()));
    }
    assert!(rig.player.elapsed() > before);

    rig.player.set_muted(false);
    assert!(rig.pull_until(WAIT, |b| !is_silent(b)));
}

// ========================================
// Failures
// ========================================

#[test]
fn test_missing_file_reports_track_failed() {
    let rig = Rig::new(fast_config(), Duration::from_secs(1));
    let mut events = rig.player.subscribe();
    let missing = Track::new(rig.dir.path().join("missing.flac"));

    assert!(rig.player.play(missing.clone()).is_err());
    assert_eq!(rig.player.mode(), PlayMode::Stopped);
    let failed = wait_for_event(&mut events, WAIT, |e| matches!(e, PlayerEvent::TrackFailed { .. }));
    match failed {
        Some(PlayerEvent::TrackFailed { path, .. }) => assert_eq!(path, missing.path),
        other => panic!("expected TrackFailed, got {:?}", other),
    }
}

#[test]
fn test_decoder_rejection_while_playing_falls_back_to_stopped() {
    let rig = Rig::new(fast_config(), Duration::from_secs(2));
    let mut events = rig.player.subscribe();
    rig.player.play(rig.track("a.flac")).unwrap();

    assert!(rig.player.play(rig.track("b.bad")).is_err());
    assert_eq!(rig.player.mode(), PlayMode::Stopped);
    assert!(rig.player.playing_track().is_none());
    assert!(wait_for_event(&mut events, WAIT, |e| matches!(e, PlayerEvent::TrackFailed { .. })).is_some());
    assert!(is_silent(&rig.pull()));
}

// ========================================
// Preload and advance
// ========================================

#[test]
fn test_preload_then_play_reuses_stream() {
    let rig = Rig::new(fast_config(), Duration::from_secs(2));
    let b = rig.track("b.flac");

    rig.player.preload_next_track(&b).unwrap();
    assert_eq!(rig.factory.opens_of(&b.path), 1);

    rig.player.play(b.clone()).unwrap();
    assert_eq!(rig.factory.opens_of(&b.path), 1);
    assert_eq!(rig.player.playing_track(), Some(b));
}

#[test]
fn test_play_other_track_than_preloaded_opens_fresh() {
    let rig = Rig::new(fast_config(), Duration::from_secs(2));
    let b = rig.track("b.flac");
    let c = rig.track("c.flac");

    rig.player.preload_next_track(&b).unwrap();
    rig.player.play(c.clone()).unwrap();
    assert_eq!(rig.factory.opens_of(&c.path), 1);
    assert_eq!(rig.factory.opens_of(&b.path), 1);
}

#[test]
fn test_preload_is_noop_for_missing_file_and_repeat() {
    let rig = Rig::new(fast_config(), Duration::from_secs(1));
    let missing = Track::new(rig.dir.path().join("nothing.flac"));
    rig.player.preload_next_track(&missing).unwrap();
    assert_eq!(rig.factory.file_opens(), 0);

    let b = rig.track("b.flac");
    rig.player.preload_next_track(&b).unwrap();
    rig.player.preload_next_track(&b).unwrap();
    assert_eq!(rig.factory.opens_of(&b.path), 1);
}

#[test]
fn test_user_skip_starts_next_track_immediately() {
    let rig = Rig::new(fast_config(), Duration::from_secs(2));
    let mut events = rig.player.subscribe();
    let a = rig.track("a.flac");
    let b = rig.track("b.flac");

    rig.player.play(a.clone()).unwrap();
    rig.player.preload_next_track(&b).unwrap();
    rig.player.play(b.clone()).unwrap();

    assert_eq!(rig.factory.opens_of(&b.path), 1);
    assert_eq!(rig.player.playing_track(), Some(b.clone()));

    let seen = drain_events(&mut events, Duration::from_millis(100));
    let ended = seen
        .iter()
        .position(|e| matches!(e, PlayerEvent::TrackEnded { path, .. } if *path == a.path));
    let skip = seen
        .iter()
        .position(|e| matches!(e, PlayerEvent::TrackStarted { path, user_skip: true, .. } if *path == b.path));
    assert!(ended.is_some() && skip.is_some());
    assert!(ended < skip);

    assert_eq!(rig.player.played_tracks(), vec![a.clone(), b]);
    assert_eq!(rig.player.previous_track(), Some(a));
}

#[test]
fn test_natural_advance_uses_provider_then_ends() {
    let rig = Rig::new(fast_config(), Duration::from_millis(100));
    let mut events = rig.player.subscribe();
    let a = rig.track("a.flac");
    let b = rig.track("b.flac");
    rig.player
        .set_track_provider(Some(Arc::new(ListProvider(Mutex::new(vec![b.clone()])))));

    rig.player.play(a.clone()).unwrap();

    let mut seen = Vec::new();
    let finished = rig.pull_until(Duration::from_secs(5), |_| {
        seen.extend(take_events(&mut events));
        seen.iter().any(|e| matches!(e, PlayerEvent::AllTracksEnded { .. }))
    });
    assert!(finished, "events: {:?}", seen);

    let position = |pred: &dyn Fn(&PlayerEvent) -> bool| seen.iter().position(|e| pred(e));
    let a_ended = position(&|e| matches!(e, PlayerEvent::TrackEnded { path, .. } if *path == a.path));
    let b_started = position(&|e| matches!(e, PlayerEvent::TrackStarted { path, user_skip: false, .. } if *path == b.path));
    let b_ended = position(&|e| matches!(e, PlayerEvent::TrackEnded { path, .. } if *path == b.path));
    assert!(a_ended.is_some() && b_started.is_some() && b_ended.is_some());
    assert!(a_ended < b_started && b_started < b_ended);

    assert!(wait_until(WAIT, || rig.player.mode() == PlayMode::Stopped));
    assert!(rig.player.playing_track().is_none());
}

#[test]
fn test_queued_next_track_wins_over_provider() {
    let rig = Rig::new(fast_config(), Duration::from_millis(100));
    let mut events = rig.player.subscribe();
    let a = rig.track("a.flac");
    let queued = rig.track("queued.flac");
    let provided = rig.track("provided.flac");
    rig.player
        .set_track_provider(Some(Arc::new(ListProvider(Mutex::new(vec![provided.clone()])))));

    rig.player.play(a).unwrap();
    rig.player.set_next_track(Some(queued.clone()));

    let mut seen = Vec::new();
    assert!(rig.pull_until(Duration::from_secs(5), |_| {
        seen.extend(take_events(&mut events));
        seen.iter().any(|e| started(e, &queued.path))
    }));
    assert_eq!(rig.factory.opens_of(&provided.path), 0);
}

#[test]
fn test_stop_after_current_stops_without_all_tracks_ended() {
    let rig = Rig::new(fast_config(), Duration::from_millis(100));
    let mut events = rig.player.subscribe();
    let a = rig.track("a.flac");
    let b = rig.track("b.flac");
    rig.player
        .set_track_provider(Some(Arc::new(ListProvider(Mutex::new(vec![b.clone()])))));

    rig.player.play(a).unwrap();
    rig.player.set_stop_after_current(true);
    assert!(rig.player.stop_after_current());

    assert!(rig.pull_until(Duration::from_secs(5), |_| rig.player.mode() == PlayMode::Stopped));
    let seen = drain_events(&mut events, Duration::from_millis(100));
    assert!(seen.iter().any(|e| matches!(e, PlayerEvent::TrackEnded { .. })));
    assert!(!seen.iter().any(|e| matches!(e, PlayerEvent::AllTracksEnded { .. })));
    assert_eq!(rig.factory.opens_of(&b.path), 0);
    assert!(!rig.player.stop_after_current());
}

/// Longest run of exact zeros between the first and last audible sample
fn longest_gap(samples: &[f32]) -> usize {
    let Some(first) = samples.iter().position(|&s| s != 0.0) else {
        return 0;
    };
    let last = samples.iter().rposition(|&s| s != 0.0).unwrap_or(first);
    let mut longest = 0;
    let mut run = 0;
    for &sample in &samples[first..=last] {
        run = if sample == 0.0 { run + 1 } else { 0 };
        longest = longest.max(run);
    }
    longest
}

#[test]
fn test_natural_advance_to_queued_preload_is_gapless() {
    let rig = Rig::new(fast_config(), Duration::from_millis(100));
    let mut events = rig.player.subscribe();
    let a = rig.track("a.flac");
    let b = rig.track("b.flac");

    rig.player.play(a.clone()).unwrap();
    rig.player.set_next_track(Some(b.clone()));
    rig.player.preload_next_track(&b).unwrap();
    assert!(rig.player.diagnostics().gapless_armed);
    // Both tracks fit their rings; let the decoders fill them
    std::thread::sleep(Duration::from_millis(100));

    // The tone never crosses exactly zero, so any 0.0 inside the audio is a gap
    let mut samples = Vec::new();
    let mut seen = Vec::new();
    for _ in 0..30 {
        samples.extend(rig.pull());
        seen.extend(take_events(&mut events));
        // Paced past the track start delay so the second track gets announced
        std::thread::sleep(Duration::from_millis(5));
    }
    let gap = longest_gap(&samples);
    assert_eq!(gap, 0, "{} silent samples between tracks", gap);
    let audible = samples.iter().filter(|&&s| s != 0.0).count();
    assert!(audible >= 2 * 2 * 4400, "only {} audible samples", audible);

    assert!(wait_until(WAIT, || rig.player.mode() == PlayMode::Stopped));
    seen.extend(drain_events(&mut events, Duration::from_millis(50)));
    let position = |pred: &dyn Fn(&PlayerEvent) -> bool| seen.iter().position(|e| pred(e));
    let a_ended = position(&|e| matches!(e, PlayerEvent::TrackEnded { path, .. } if *path == a.path));
    let b_started = position(&|e| matches!(e, PlayerEvent::TrackStarted { path, user_skip: false, .. } if *path == b.path));
    let all_ended = position(&|e| matches!(e, PlayerEvent::AllTracksEnded { .. }));
    assert!(a_ended.is_some() && b_started.is_some() && all_ended.is_some(), "events: {:?}", seen);
    assert!(a_ended < b_started && b_started < all_ended);

    assert_eq!(rig.factory.opens_of(&b.path), 1);
    assert_eq!(rig.player.played_tracks(), vec![a, b]);
}

#[test]
fn test_stop_after_current_overrides_queued_preload() {
    let rig = Rig::new(fast_config(), Duration::from_millis(100));
    let mut events = rig.player.subscribe();
    let a = rig.track("a.flac");
    let b = rig.track("b.flac");

    rig.player.play(a).unwrap();
    rig.player.set_next_track(Some(b.clone()));
    rig.player.preload_next_track(&b).unwrap();
    assert!(rig.player.diagnostics().gapless_armed);
    rig.player.set_stop_after_current(true);
    assert!(!rig.player.diagnostics().gapless_armed);

    assert!(rig.pull_until(Duration::from_secs(5), |_| rig.player.mode() == PlayMode::Stopped));
    let seen = drain_events(&mut events, Duration::from_millis(50));
    assert!(!seen.iter().any(|e| started(e, &b.path)));
    assert!(rig.player.playing_track().is_none());
}

// ========================================
// Rate change drain
// ========================================

#[test]
fn test_rate_change_serves_drain_before_new_rate_audio() {
    let rig = Rig::new(fast_config(), Duration::from_secs(2));
    let a = rig.track("a.flac");
    let b = rig.track("b.flac");
    rig.factory.set_rate(&b.path, 48000);

    rig.player.play(a).unwrap();
    assert!(!is_silent(&rig.pull()));

    let format = rig.player.output_format().unwrap();
    let buffer_bytes = rig.player.diagnostics().buffer_size_bytes;
    assert_eq!(buffer_bytes, 512 * format.bytes_per_frame());
    let required_samples = format.samples_for_bytes(buffer_bytes * 3 / 2);

    rig.player.play(b).unwrap();

    let mut silent_samples = 0usize;
    let reached = rig.pull_until(WAIT, |buffer| {
        match buffer.iter().position(|&s| s != 0.0) {
            Some(first) => {
                silent_samples += first;
                true
            }
            None => {
                silent_samples += buffer.len();
                false
            }
        }
    });
    assert!(reached, "new stream never became audible");
    assert!(
        silent_samples >= required_samples,
        "{} silent samples, {} required",
        silent_samples,
        required_samples
    );
    assert_eq!(rig.backend.active_format().map(|f| f.sample_rate), Some(48000));
    assert_eq!(rig.player.spectrum().sample_rate, 48000);

    let diagnostics = rig.player.diagnostics();
    assert!(diagnostics.drained_samples_total >= required_samples as u64);
    assert!(!diagnostics.rate_change_pending);
}

#[test]
fn test_same_rate_switch_has_no_drain() {
    let rig = Rig::new(fast_config(), Duration::from_secs(2));
    rig.player.play(rig.track("a.flac")).unwrap();
    rig.pull();
    rig.player.play(rig.track("b.flac")).unwrap();

    assert!(!is_silent(&rig.pull()));
    assert_eq!(rig.player.diagnostics().drained_samples_total, 0);
    assert_eq!(rig.backend.opened().len(), 1);
}

// ========================================
// Seek, gain, equalizer, device
// ========================================

#[test]
fn test_seek_by_percent() {
    let rig = Rig::new(fast_config(), Duration::from_secs(2));
    rig.player.play(rig.track("a.flac")).unwrap();

    let reached = rig.player.seek(50.0).unwrap();
    assert!((reached.as_secs_f64() - 1.0).abs() < 0.01);
    assert!((rig.player.elapsed().as_secs_f64() - 1.0).abs() < 0.05);

    let clamped = rig.player.seek(250.0).unwrap();
    assert!((clamped.as_secs_f64() - 2.0).abs() < 0.01);
}

#[test]
fn test_seek_without_track_is_rejected() {
    let rig = Rig::new(fast_config(), Duration::from_secs(1));
    assert!(rig.player.seek(10.0).is_err());
}

#[test]
fn test_volume_applies_to_playing_stream() {
    let rig = Rig::new(fast_config(), Duration::from_secs(2));
    rig.player.play(rig.track("a.flac")).unwrap();
    assert!(rig.pull_until(WAIT, |b| (peak(b) - TONE_AMPLITUDE).abs() < 0.01));

    rig.player.set_volume_db(-6.0);
    assert_eq!(rig.player.volume_db(), -6.0);
    let expected = TONE_AMPLITUDE * 10f32.powf(-6.0 / 20.0);
    assert!(rig.pull_until(WAIT, |b| (peak(b) - expected).abs() < 0.01));
}

#[test]
fn test_volume_reaches_preloaded_stream() {
    let rig = Rig::new(fast_config(), Duration::from_secs(2));
    let b = rig.track("b.flac");
    rig.player.preload_next_track(&b).unwrap();
    rig.player.set_volume_db(-6.0);

    rig.player.play(b.clone()).unwrap();
    assert_eq!(rig.factory.opens_of(&b.path), 1);

    let expected = TONE_AMPLITUDE * 10f32.powf(-6.0 / 20.0);
    let mut loud = false;
    assert!(rig.pull_until(WAIT, |buffer| {
        loud |= peak(buffer) > expected + 0.05;
        (peak(buffer) - expected).abs() < 0.01
    }));
    assert!(!loud, "preloaded stream played at full volume");
}

#[test]
fn test_release_year_clamped_to_configured_bounds() {
    let mut config = fast_config();
    config.release_year_bounds = (1950, 2000);
    let rig = Rig::new(config, Duration::from_secs(2));
    assert_eq!(rig.player.release_year(), None);

    let mut a = rig.track("a.flac");
    a.metadata.year = Some(2024);
    rig.player.play(a).unwrap();
    assert_eq!(rig.player.release_year(), Some(2000));

    let mut b = rig.track("b.flac");
    b.metadata.year = Some(1977);
    rig.player.play(b).unwrap();
    assert_eq!(rig.player.release_year(), Some(1977));

    rig.player.play(rig.track("untagged.flac")).unwrap();
    assert_eq!(rig.player.release_year(), None);
}

#[test]
fn test_equalizer_settings() {
    let rig = Rig::new(fast_config(), Duration::from_secs(1));
    assert!(rig.player.set_equalizer_values(&[0.0; 31]).is_err());
    rig.player.set_equalizer_values(&[3.0; 10]).unwrap();
    rig.player.set_equalizer_enabled(true);
    rig.player.set_equalizer_preamp_db(-2.0);

    let state = rig.player.equalizer();
    assert!(state.enabled);
    assert_eq!(state.values, vec![3.0; 10]);
    assert_eq!(state.preamp_db, -2.0);

    rig.player.set_equalizer_bands(BandCount::ThirtyOne);
    let state = rig.player.equalizer();
    assert_eq!(state.bands, BandCount::ThirtyOne);
    assert_eq!(state.values, vec![0.0; 31]);
    rig.player.set_equalizer_values(&[1.0; 30]).unwrap();

    rig.player.apply_preset(EqualizerPreset::Rock);
    assert_eq!(rig.player.equalizer().values.len(), 31);
}

#[test]
fn test_device_switch_keeps_playing() {
    let backend = LoopbackBackend::with_devices(vec!["first".into(), "second".into()]).with_buffer_frames(256);
    let rig = Rig::with_backend(fast_config(), Duration::from_secs(2), backend);
    let mut events = rig.player.subscribe();

    assert_eq!(rig.player.list_devices().unwrap(), vec!["first".to_string(), "second".to_string()]);
    rig.player.play(rig.track("a.flac")).unwrap();
    assert_eq!(rig.player.output_device().as_deref(), Some("first"));

    rig.player.switch_device(Some("second".into())).unwrap();
    assert_eq!(rig.backend.active_device().as_deref(), Some("second"));
    assert!(rig.pull_until(WAIT, |b| !is_silent(b)));

    let changed = wait_for_event(&mut events, WAIT, |e| matches!(e, PlayerEvent::OutputDeviceChanged { .. }));
    match changed {
        Some(PlayerEvent::OutputDeviceChanged { device, .. }) => assert_eq!(device, "second"),
        other => panic!("expected OutputDeviceChanged, got {:?}", other),
    }

    assert!(rig.player.switch_device(Some("missing".into())).is_err());
    assert_eq!(rig.backend.active_device().as_deref(), Some("second"));
}

#[test]
fn test_diagnostics_serialize() {
    let rig = Rig::new(fast_config(), Duration::from_secs(1));
    rig.player.play(rig.track("a.flac")).unwrap();
    rig.pull();

    let diagnostics = rig.player.diagnostics();
    assert_eq!(diagnostics.mode, PlayMode::Playing);
    assert_eq!(diagnostics.backend, "loopback");
    let json = serde_json::to_value(&diagnostics).unwrap();
    assert_eq!(json["mode"], "playing");
    assert_eq!(json["format"]["sample_rate"], 44100);
}

#[test]
fn test_spectrum_follows_playback() {
    let rig = Rig::new(fast_config(), Duration::from_secs(2));
    rig.player.play(rig.track("a.flac")).unwrap();
    for _ in 0..4 {
        rig.pull();
    }
    let spectrum = rig.player.spectrum();
    assert!(!spectrum.is_silent());
    assert_eq!(spectrum.sample_rate, 44100);

    rig.player.stop();
    assert!(rig.player.spectrum().is_silent());
}
