//! Shared test helpers
//!
//! - `audio_generator`: deterministic WAV files written with hound
//! - `fakes`: synthetic decoder factory and scripted radio connector
//! - event waiting on the player's broadcast receiver

#![allow(dead_code)]

pub mod audio_generator;
pub mod fakes;

use dmp_ap::config::PlayerConfig;
use dmp_common::PlayerEvent;
use std::time::{Duration, Instant};
use tokio::sync::broadcast::error::TryRecvError;
use tokio::sync::broadcast::Receiver;

/// Config with short delays so control-path tests run quickly
pub fn fast_config() -> PlayerConfig {
    let mut config = PlayerConfig::default();
    config.track_start_delay_ms = 20;
    config.stop_settle_ms = 5;
    config.rate_change_delay_ms = 1;
    config.radio.retry_backoff_ms = 5;
    config.radio.prebuffer_poll_ms = 5;
    config.radio.prebuffer_timeout_ms = 500;
    config.radio.metadata_poll_ms = 10;
    config
}

/// Wait for the first event matching `pred`, collecting everything seen on the way
pub fn wait_for_event<F>(rx: &mut Receiver<PlayerEvent>, timeout: Duration, pred: F) -> Option<PlayerEvent>
where
    F: Fn(&PlayerEvent) -> bool,
{
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        match rx.try_recv() {
            Ok(event) if pred(&event) => return Some(event),
            Ok(_) => {}
            Err(TryRecvError::Empty) => std::thread::sleep(Duration::from_millis(2)),
            Err(TryRecvError::Lagged(_)) => {}
            Err(TryRecvError::Closed) => return None,
        }
    }
    None
}

/// Every event received within `window`
pub fn drain_events(rx: &mut Receiver<PlayerEvent>, window: Duration) -> Vec<PlayerEvent> {
    let deadline = Instant::now() + window;
    let mut events = Vec::new();
    while Instant::now() < deadline {
        match rx.try_recv() {
            Ok(event) => events.push(event),
            Err(TryRecvError::Empty) => std::thread::sleep(Duration::from_millis(2)),
            Err(TryRecvError::Lagged(_)) => {}
            Err(TryRecvError::Closed) => break,
        }
    }
    events
}

/// Events already queued, without waiting
pub fn take_events(rx: &mut Receiver<PlayerEvent>) -> Vec<PlayerEvent> {
    let mut events = Vec::new();
    loop {
        match rx.try_recv() {
            Ok(event) => events.push(event),
            Err(TryRecvError::Lagged(_)) => {}
            Err(_) => break,
        }
    }
    events
}

/// Poll `check` until it holds or `timeout` passes
pub fn wait_until<F: Fn() -> bool>(timeout: Duration, check: F) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if check() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
    check()
}
