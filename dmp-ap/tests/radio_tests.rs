//! Radio playback through the player and the radio stream

mod helpers;

use dmp_ap::audio::loopback::LoopbackBackend;
use dmp_ap::stream::transport::Negotiation;
use dmp_ap::stream::{PcmStream, RadioStream, StationMetadata, StreamOptions, TransportConnector};
use dmp_ap::{Player, PlayerConfig, Station};
use dmp_common::{PlayMode, PlayerEvent};
use helpers::fakes::{FakeDecoderFactory, ScriptedConnector};
use helpers::{drain_events, fast_config, wait_for_event, wait_until};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

const URL: &str = "http://radio.invalid/stream";
const WAIT: Duration = Duration::from_secs(3);

fn player_with(config: PlayerConfig, connector: Arc<ScriptedConnector>) -> (Arc<Player>, LoopbackBackend) {
    let backend = LoopbackBackend::new().with_buffer_frames(512);
    let connector: Arc<dyn TransportConnector> = connector;
    let player = Player::new(
        config,
        Arc::new(backend.clone()),
        Arc::new(FakeDecoderFactory::new(44100, Duration::from_secs(1))),
        connector,
    )
    .unwrap();
    (player, backend)
}

// ========================================
// Connection
// ========================================

#[test]
fn test_unreachable_station_fails_once_after_retries() {
    let connector = Arc::new(ScriptedConnector::unreachable());
    let (player, _backend) = player_with(fast_config(), Arc::clone(&connector));
    let mut events = player.subscribe();

    player.play_station(Station::new(URL)).unwrap();

    let failed = wait_for_event(&mut events, WAIT, |e| matches!(e, PlayerEvent::RadioFailed { .. }));
    match failed {
        Some(PlayerEvent::RadioFailed { url, reason, .. }) => {
            assert_eq!(url, URL);
            assert!(reason.contains("4 attempts"), "reason: {}", reason);
        }
        other => panic!("expected RadioFailed, got {:?}", other),
    }
    let more = drain_events(&mut events, Duration::from_millis(200));
    assert!(!more.iter().any(|e| matches!(e, PlayerEvent::RadioFailed { .. })));

    assert!(player.playing_station().is_none());
    assert_eq!(player.mode(), PlayMode::Stopped);
    // Four attempts, each trying both negotiations
    assert_eq!(connector.attempts(), 8);
}

#[test]
fn test_station_connects_after_failures_and_buffers() {
    let connector = Arc::new(ScriptedConnector::failing(3));
    *connector.transport().fill_percent.lock() = 80;
    let (player, backend) = player_with(fast_config(), Arc::clone(&connector));
    let mut events = player.subscribe();
    let station = Station::new(URL);

    player.play_station(station.clone()).unwrap();

    assert!(wait_for_event(&mut events, WAIT, |e| matches!(e, PlayerEvent::RadioStarted { .. })).is_some());
    let buffering = wait_for_event(&mut events, WAIT, |e| matches!(e, PlayerEvent::RadioBuffering { .. }));
    match buffering {
        Some(PlayerEvent::RadioBuffering { percent, .. }) => assert_eq!(percent, 80),
        other => panic!("expected RadioBuffering, got {:?}", other),
    }

    assert_eq!(player.mode(), PlayMode::Radio);
    assert_eq!(player.playing_station(), Some(station));
    assert!(player.playing_track().is_none());
    assert_eq!(
        connector.negotiations(),
        vec![Negotiation::Icy, Negotiation::Plain, Negotiation::Icy, Negotiation::Plain]
    );

    let audible = wait_until(WAIT, || backend.pull_buffer().iter().any(|&s| s != 0.0));
    assert!(audible);
    assert!(player.duration().is_none());
}

#[test]
fn test_station_metadata_changes_are_published_once() {
    let connector = Arc::new(ScriptedConnector::failing(0));
    let transport = connector.transport();
    *transport.fill_percent.lock() = 100;
    *transport.metadata.lock() = StationMetadata {
        name: Some("Jazz FM".into()),
        genre: Some("Jazz".into()),
        bitrate_kbps: Some(128),
        title: Some("Band - Song".into()),
    };
    let (player, _backend) = player_with(fast_config(), connector);
    let mut events = player.subscribe();

    player.play_station(Station::new(URL)).unwrap();
    assert!(wait_for_event(&mut events, WAIT, |e| matches!(e, PlayerEvent::StreamTitleChanged { .. })).is_some());

    let seen = drain_events(&mut events, Duration::from_millis(200));
    assert!(!seen
        .iter()
        .any(|e| matches!(e, PlayerEvent::StreamTitleChanged { .. })));

    transport.metadata.lock().title = Some("Other - Tune".into());
    let changed = wait_for_event(&mut events, WAIT, |e| matches!(e, PlayerEvent::StreamTitleChanged { .. }));
    match changed {
        Some(PlayerEvent::StreamTitleChanged { title, .. }) => assert_eq!(title, "Other - Tune"),
        other => panic!("expected StreamTitleChanged, got {:?}", other),
    }
    assert_eq!(player.bitrate_kbps(), Some(128));
}

#[test]
fn test_stop_during_connect_suppresses_failure() {
    let connector = Arc::new(ScriptedConnector::unreachable());
    let mut config = fast_config();
    config.radio.retry_backoff_ms = 200;
    let (player, _backend) = player_with(config, Arc::clone(&connector));
    let mut events = player.subscribe();

    player.play_station(Station::new(URL)).unwrap();
    std::thread::sleep(Duration::from_millis(30));
    player.stop();

    let seen = drain_events(&mut events, Duration::from_millis(500));
    assert!(!seen.iter().any(|e| matches!(e, PlayerEvent::RadioFailed { .. })));
    assert!(connector.attempts() < 8);
    assert!(player.playing_station().is_none());
}

#[test]
fn test_radio_pause_and_resume() {
    let connector = Arc::new(ScriptedConnector::failing(0));
    *connector.transport().fill_percent.lock() = 100;
    let (player, _backend) = player_with(fast_config(), connector);
    let mut events = player.subscribe();

    player.play_station(Station::new(URL)).unwrap();
    assert!(wait_for_event(&mut events, WAIT, |e| matches!(e, PlayerEvent::RadioStarted { .. })).is_some());

    player.pause().unwrap();
    assert_eq!(player.mode(), PlayMode::RadioPaused);
    player.resume().unwrap();
    assert_eq!(player.mode(), PlayMode::Radio);
    assert!(player.seek(10.0).is_err());
}

#[test]
fn test_stop_closes_station_transport() {
    let connector = Arc::new(ScriptedConnector::failing(0));
    let transport = connector.transport();
    *transport.fill_percent.lock() = 100;
    let (player, _backend) = player_with(fast_config(), connector);
    let mut events = player.subscribe();

    player.play_station(Station::new(URL)).unwrap();
    assert!(wait_for_event(&mut events, WAIT, |e| matches!(e, PlayerEvent::RadioStarted { .. })).is_some());

    player.stop();
    assert!(player.playing_station().is_none());
    assert!(transport.closed.load(std::sync::atomic::Ordering::SeqCst));
}

// ========================================
// RadioStream directly
// ========================================

#[test]
fn test_radio_stream_is_silent_until_buffered() {
    let connector = ScriptedConnector::failing(1);
    let transport = connector.transport();
    *transport.fill_percent.lock() = 20;
    let factory = FakeDecoderFactory::new(48000, Duration::from_secs(1));
    let config = fast_config();
    let closing = AtomicBool::new(false);

    let stream = RadioStream::connect(
        URL,
        &connector,
        &factory,
        &config.radio,
        StreamOptions::default(),
        &closing,
    )
    .unwrap();
    assert_eq!(stream.negotiation(), Negotiation::Plain);
    assert_eq!(stream.sample_rate(), 48000);
    assert!(!stream.is_buffered());

    let mut out = vec![1.0f32; 256];
    assert_eq!(stream.read(&mut out), 256);
    assert!(out.iter().all(|&s| s == 0.0));
    assert!(stream.set_elapsed(Duration::from_secs(1)).is_err());

    let mut reported = Vec::new();
    let filler = Arc::clone(&transport);
    let handle = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(30));
        *filler.fill_percent.lock() = 90;
    });
    let reached = stream.prebuffer(&config.radio, |p| reported.push(p));
    handle.join().unwrap();

    assert_eq!(reached, 90);
    assert_eq!(reported.first(), Some(&20));
    assert_eq!(reported.last(), Some(&90));
    assert!(stream.is_buffered());

    assert!(wait_until(WAIT, || {
        let mut out = vec![0.0f32; 256];
        stream.read(&mut out);
        out.iter().any(|&s| s != 0.0)
    }));

    stream.close();
    stream.close();
    assert!(stream.is_closed());
    assert!(transport.closed.load(std::sync::atomic::Ordering::SeqCst));
}

#[test]
fn test_prebuffer_gives_up_after_timeout() {
    let connector = ScriptedConnector::failing(0);
    *connector.transport().fill_percent.lock() = 10;
    let factory = FakeDecoderFactory::new(44100, Duration::from_secs(1));
    let mut config = fast_config();
    config.radio.prebuffer_timeout_ms = 50;
    let closing = AtomicBool::new(false);

    let stream = RadioStream::connect(URL, &connector, &factory, &config.radio, StreamOptions::default(), &closing).unwrap();
    let started = std::time::Instant::now();
    assert_eq!(stream.prebuffer(&config.radio, |_| {}), 10);
    assert!(started.elapsed() >= Duration::from_millis(50));
    assert!(stream.is_buffered());
}

#[test]
fn test_closing_flag_cancels_connect() {
    let connector = ScriptedConnector::unreachable();
    let factory = FakeDecoderFactory::new(44100, Duration::from_secs(1));
    let config = fast_config();
    let closing = AtomicBool::new(true);

    let result = RadioStream::connect(URL, &connector, &factory, &config.radio, StreamOptions::default(), &closing);
    assert!(result.is_err());
    assert_eq!(connector.attempts(), 0);
}
