//! Station playback
//!
//! Connecting happens on a short-lived `radio-connect` thread so retries and backoff
//! never block the caller. Each attempt carries its own closing flag: `stop` or a newer
//! station raises it, which aborts the retry loop and discards a late connection.

use super::Player;
use crate::error::Result;
use crate::stream::{PcmStream, RadioStream};
use crate::track::Station;
use dmp_common::{PlayMode, PlayerEvent};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread;
use tracing::{debug, info, warn};

impl Player {
    /// Play an internet radio station.
    ///
    /// Stops current playback and connects in the background. Success publishes
    /// `RadioStarted` followed by `RadioBuffering` progress; exhausting the retries
    /// publishes a single `RadioFailed`.
    pub fn play_station(self: &Arc<Self>, station: Station) -> Result<()> {
        let closing = Arc::new(AtomicBool::new(false));
        let mut events = Vec::new();
        {
            let mut control = self.control.lock();
            let old = self.stop_locked(&mut control, &mut events);
            self.retire(&mut control, old);
            control.connecting = Some(Arc::clone(&closing));
        }
        self.emit_all(events);

        let weak = Arc::downgrade(self);
        let connector = Arc::clone(&self.connector);
        let factory = Arc::clone(&self.factory);
        let radio_config = self.config.radio.clone();
        let options = self.stream_options();

        info!("Connecting to station {}", station.url);
        thread::Builder::new()
            .name("radio-connect".to_string())
            .spawn(move || {
                let result = RadioStream::connect(
                    &station.url,
                    connector.as_ref(),
                    factory.as_ref(),
                    &radio_config,
                    options,
                    &closing,
                );
                finish_connect(weak, station, closing, result);
            })?;
        Ok(())
    }

    /// Install a freshly connected station unless the attempt was superseded
    fn start_station(&self, station: &Station, closing: &Arc<AtomicBool>, stream: Arc<RadioStream>) -> bool {
        let mut events = Vec::new();
        let started = {
            let mut control = self.control.lock();
            let current_attempt = control
                .connecting
                .as_ref()
                .map(|flag| Arc::ptr_eq(flag, closing))
                .unwrap_or(false);
            if !current_attempt || closing.load(Ordering::Acquire) {
                false
            } else {
                control.connecting = None;
                self.configure_stream(stream.as_ref(), None);
                match self.install_stream(&mut control, stream.clone()) {
                    Ok(()) => {
                        if let Err(e) = self.resume_output() {
                            warn!("Output resume failed: {}", e);
                        }
                        control.current_radio = Some(Arc::clone(&stream));
                        control.playing_station = Some(station.clone());
                        control.playing_track = None;
                        self.set_mode_locked(&mut control, PlayMode::Radio, &mut events);
                        events.push(PlayerEvent::RadioStarted {
                            url: station.url.clone(),
                            timestamp: chrono::Utc::now(),
                        });
                        true
                    }
                    Err(e) => {
                        warn!("Station {} could not reach the output: {}", station.url, e);
                        events.push(PlayerEvent::RadioFailed {
                            url: station.url.clone(),
                            reason: e.to_string(),
                            timestamp: chrono::Utc::now(),
                        });
                        false
                    }
                }
            }
        };
        self.emit_all(events);
        started
    }

    fn fail_station(&self, station: &Station, closing: &Arc<AtomicBool>, reason: String) {
        {
            let mut control = self.control.lock();
            let current_attempt = control
                .connecting
                .as_ref()
                .map(|flag| Arc::ptr_eq(flag, closing))
                .unwrap_or(false);
            if !current_attempt || closing.load(Ordering::Acquire) {
                debug!("Connection to {} abandoned", station.url);
                return;
            }
            control.connecting = None;
        }
        warn!("Station {} failed: {}", station.url, reason);
        self.events.emit_lossy(PlayerEvent::RadioFailed {
            url: station.url.clone(),
            reason,
            timestamp: chrono::Utc::now(),
        });
    }
}

fn finish_connect(weak: Weak<Player>, station: Station, closing: Arc<AtomicBool>, result: Result<RadioStream>) {
    let Some(player) = weak.upgrade() else {
        return;
    };
    match result {
        Err(e) => player.fail_station(&station, &closing, e.to_string()),
        Ok(stream) => {
            let stream = Arc::new(stream);
            if !player.start_station(&station, &closing, Arc::clone(&stream)) {
                stream.close();
                return;
            }
            let url = station.url.clone();
            let percent = stream.prebuffer(&player.config.radio, |percent| {
                player.events.emit_lossy(PlayerEvent::RadioBuffering {
                    url: url.clone(),
                    percent,
                });
            });
            info!("Station {} playing ({}% buffered)", station.url, percent);
        }
    }
}
