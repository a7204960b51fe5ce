//! Transport control: play, stop, pause, resume, seek, preload and track advance

use super::{close_settled, ControlState, PendingStart, Player, Preloaded, Retired};
use crate::error::{Error, Result};
use crate::stream::PcmStream;
use crate::track::Track;
use dmp_common::{PlayMode, PlayerEvent};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

impl Player {
    /// Play a track.
    ///
    /// While a track is playing or paused this is an explicit skip: `track` becomes the
    /// next track and is switched to immediately. From stopped (or radio) the stream is
    /// opened here, reusing the preloaded stream when it matches.
    ///
    /// # Returns
    /// The open error after a `TrackFailed` event has been published.
    pub fn play(&self, track: Track) -> Result<()> {
        let mut events = Vec::new();
        let result = {
            let mut control = self.control.lock();
            self.settle_promotion(&mut control, &mut events);
            if control.mode.is_radio() || control.connecting.is_some() {
                let old = self.stop_locked(&mut control, &mut events);
                self.retire(&mut control, old);
            }
            let result = match control.mode {
                PlayMode::Playing | PlayMode::Paused => {
                    control.next_track = Some(track);
                    self.advance_locked(&mut control, true, &mut events)
                }
                _ => self.start_locked(&mut control, track, &mut events),
            };
            self.rearm_next(&control);
            result
        };
        self.emit_all(events);
        result
    }

    fn start_locked(&self, control: &mut ControlState, track: Track, events: &mut Vec<PlayerEvent>) -> Result<()> {
        let stream = match self.stream_for(&track) {
            Ok(stream) => stream,
            Err(e) => return Err(self.fail_track(control, &track, e, events)),
        };
        if let Err(e) = self.install_stream(control, stream) {
            return Err(self.fail_track(control, &track, e, events));
        }
        self.resume_output()?;

        let old_mode = control.mode;
        self.set_mode_locked(control, PlayMode::Playing, events);
        self.record_playing(control, track.clone());
        info!("Playing {} (from {})", track.path.display(), old_mode);
        events.push(PlayerEvent::TrackStarted {
            path: track.path,
            user_skip: false,
            timestamp: chrono::Utc::now(),
        });
        Ok(())
    }

    /// Move past the current track.
    ///
    /// A user skip plays the queued next track and announces it at once. A natural
    /// advance honours stop-after-current, then the queued track, then the track
    /// provider; its start is announced after the track start delay.
    pub(crate) fn advance_locked(
        &self,
        control: &mut ControlState,
        user_skip: bool,
        events: &mut Vec<PlayerEvent>,
    ) -> Result<()> {
        let finished = control.playing_track.clone();
        if let Some(track) = finished.as_ref() {
            events.push(PlayerEvent::TrackEnded {
                path: track.path.clone(),
                timestamp: chrono::Utc::now(),
            });
        }

        let mut stop_requested = false;
        let next = if user_skip {
            control.next_track.take()
        } else if control.stop_after_current {
            stop_requested = true;
            None
        } else {
            control.next_track.take().or_else(|| {
                let provider = self.provider.lock().clone();
                provider.and_then(|p| p.next_track(finished.as_ref()))
            })
        };

        let Some(track) = next else {
            let old = self.stop_locked(control, events);
            self.retire(control, old);
            if !stop_requested {
                info!("All tracks ended");
                events.push(PlayerEvent::AllTracksEnded {
                    timestamp: chrono::Utc::now(),
                });
            }
            return Ok(());
        };

        let stream = match self.stream_for(&track) {
            Ok(stream) => stream,
            Err(e) => return Err(self.fail_track(control, &track, e, events)),
        };
        if let Err(e) = self.install_stream(control, stream) {
            return Err(self.fail_track(control, &track, e, events));
        }
        self.record_playing(control, track.clone());

        if user_skip {
            self.resume_output()?;
            self.set_mode_locked(control, PlayMode::Playing, events);
            control.pending_start = None;
            info!("Skipped to {}", track.path.display());
            events.push(PlayerEvent::TrackStarted {
                path: track.path,
                user_skip: true,
                timestamp: chrono::Utc::now(),
            });
        } else {
            debug!("Advanced to {}", track.path.display());
            control.pending_start = Some(PendingStart {
                due: Instant::now() + self.config.track_start_delay(),
                path: track.path,
            });
        }
        Ok(())
    }

    /// Report a track that could not be opened and fall back to stopped
    fn fail_track(&self, control: &mut ControlState, track: &Track, error: Error, events: &mut Vec<PlayerEvent>) -> Error {
        warn!("Track {} failed: {}", track.path.display(), error);
        events.push(PlayerEvent::TrackFailed {
            path: track.path.clone(),
            reason: error.to_string(),
            timestamp: chrono::Utc::now(),
        });
        let old = self.stop_locked(control, events);
        self.retire(control, old);
        error
    }

    fn record_playing(&self, control: &mut ControlState, track: Track) {
        let changed = control
            .played
            .last()
            .map(|last| !last.same_source(&track))
            .unwrap_or(true);
        if changed {
            control.played.push(track.clone());
        }
        control.playing_track = Some(track);
        control.playing_station = None;
    }

    /// Disarm the render path's next stream and adopt it if it was already promoted.
    ///
    /// Control operations that touch the current or preloaded stream start here and end
    /// with [`rearm_next`](Self::rearm_next), so the render path never promotes a stream
    /// the control side is changing.
    fn settle_promotion(&self, control: &mut ControlState, events: &mut Vec<PlayerEvent>) {
        self.render.set_next(None);
        self.adopt_promoted(control, events);
    }

    /// Catch up with a natural advance the render path made on its own
    fn adopt_promoted(&self, control: &mut ControlState, events: &mut Vec<PlayerEvent>) {
        let playing = self.render.current();
        if playing.id() == control.current.id() {
            return;
        }
        let promoted = {
            let mut preload = self.preload.lock();
            match preload.take() {
                Some(entry) if entry.stream.id() == playing.id() => entry,
                other => {
                    *preload = other;
                    warn!("Render path plays stream {} the player does not know", playing.id());
                    return;
                }
            }
        };

        if let Some(track) = control.playing_track.take() {
            events.push(PlayerEvent::TrackEnded {
                path: track.path,
                timestamp: chrono::Utc::now(),
            });
        }
        if control
            .next_track
            .as_ref()
            .map(|next| next.same_source(&promoted.track))
            .unwrap_or(false)
        {
            control.next_track = None;
        }
        let previous = std::mem::replace(&mut control.current, playing);
        self.retire(control, previous);
        self.record_playing(control, promoted.track.clone());
        debug!("Gapless advance to {}", promoted.track.path.display());
        control.pending_start = Some(PendingStart {
            due: Instant::now() + self.config.track_start_delay(),
            path: promoted.track.path,
        });
    }

    /// Arm the preloaded stream for a gapless natural advance when it is what the advance
    /// would play: the queued next track, at the current stream's rate, with playback
    /// continuing afterwards
    fn rearm_next(&self, control: &ControlState) {
        let preload = self.preload.lock();
        let armed = preload.as_ref().filter(|entry| {
            matches!(control.mode, PlayMode::Playing | PlayMode::Paused)
                && !control.stop_after_current
                && !entry.stream.is_closed()
                && entry.stream.sample_rate() == control.current.sample_rate()
                && control
                    .next_track
                    .as_ref()
                    .map(|next| next.same_source(&entry.track))
                    .unwrap_or(false)
        });
        self.render
            .set_next(armed.map(|entry| Arc::clone(&entry.stream) as Arc<dyn PcmStream>));
    }

    pub(crate) fn set_mode_locked(&self, control: &mut ControlState, mode: PlayMode, events: &mut Vec<PlayerEvent>) {
        let old = control.mode;
        control.mode = mode;
        self.render.set_mode(mode);
        if !mode.is_audible() {
            // A paused device stops pulling, so the render path cannot clear it
            self.render.spectrum().clear();
        }
        events.extend(Self::mode_change(old, mode));
    }

    /// Stop playback: clear the playing track, let in-flight pulls settle, then close
    /// the stream that was playing.
    pub fn stop(&self) {
        let mut events = Vec::new();
        let old = {
            let mut control = self.control.lock();
            self.stop_locked(&mut control, &mut events)
        };
        if !crate::stream::null::is_null(&old) {
            thread::sleep(self.config.stop_settle());
            old.close();
            if Arc::strong_count(&old) > 1 {
                // Still held by a pull in flight; the control worker drops it later
                self.control.lock().retired.push(Retired {
                    since: Instant::now(),
                    stream: old,
                });
            }
        }
        self.emit_all(events);
    }

    /// Reset to stopped; returns the stream taken off the device
    pub(crate) fn stop_locked(&self, control: &mut ControlState, events: &mut Vec<PlayerEvent>) -> Arc<dyn PcmStream> {
        self.settle_promotion(control, events);
        if let Some(closing) = control.connecting.take() {
            closing.store(true, Ordering::Release);
        }
        control.playing_track = None;
        control.playing_station = None;
        control.next_track = None;
        control.pending_start = None;
        control.stop_after_current = false;
        if control.pending_rate.take().is_some() {
            self.render.end_drain();
        }

        let old = self.uninstall_stream(control);
        self.set_mode_locked(control, PlayMode::Stopped, events);
        old
    }

    /// Pause output; no-op unless something is audible
    pub fn pause(&self) -> Result<()> {
        let mut events = Vec::new();
        {
            let mut control = self.control.lock();
            if !control.mode.is_audible() {
                return Ok(());
            }
            if let Some(output) = self.output.lock().as_ref() {
                output.pause()?;
            }
            let paused = control.mode.paused();
            self.set_mode_locked(&mut control, paused, &mut events);
        }
        self.emit_all(events);
        Ok(())
    }

    /// Resume output; no-op unless paused
    pub fn resume(&self) -> Result<()> {
        let mut events = Vec::new();
        {
            let mut control = self.control.lock();
            if !control.mode.is_paused() {
                return Ok(());
            }
            self.resume_output()?;
            let resumed = control.mode.resumed();
            self.set_mode_locked(&mut control, resumed, &mut events);
        }
        self.emit_all(events);
        Ok(())
    }

    /// Seek to a percentage (0-100, clamped) of the current track.
    ///
    /// # Returns
    /// The position reached.
    pub fn seek(&self, percent: f64) -> Result<Duration> {
        let mut events = Vec::new();
        let result = {
            let mut control = self.control.lock();
            self.settle_promotion(&mut control, &mut events);
            let result = self.seek_locked(&control, percent);
            self.rearm_next(&control);
            result
        };
        self.emit_all(events);
        result
    }

    fn seek_locked(&self, control: &ControlState, percent: f64) -> Result<Duration> {
        if control.playing_track.is_none() {
            return Err(Error::InvalidState("Nothing to seek: no track playing".to_string()));
        }
        let duration = control
            .current
            .duration()
            .ok_or_else(|| Error::InvalidState("Current stream has no duration".to_string()))?;

        let fraction = if percent.is_finite() { percent.clamp(0.0, 100.0) / 100.0 } else { 0.0 };
        let reached = control.current.set_elapsed(duration.mul_f64(fraction))?;
        self.render.rearm_end_of_stream();
        debug!("Seeked to {:?} of {:?}", reached, duration);
        Ok(reached)
    }

    /// Open and decode ahead the stream for an upcoming track.
    ///
    /// A later `play` or advance to the same file promotes it with a pointer swap. When
    /// it is also the queued next track, a natural advance to it happens inside the
    /// device buffer where the current track ends. A track whose file does not exist is
    /// ignored.
    pub fn preload_next_track(&self, track: &Track) -> Result<()> {
        if !track.exists() {
            debug!("Not preloading missing file {}", track.path.display());
            return Ok(());
        }
        {
            let preload = self.preload.lock();
            if let Some(entry) = preload.as_ref() {
                if entry.track.same_source(track) && !entry.stream.is_closed() {
                    return Ok(());
                }
            }
        }

        let stream = self.open_file_stream(track)?;
        let mut events = Vec::new();
        let replaced = {
            let mut control = self.control.lock();
            self.settle_promotion(&mut control, &mut events);
            let replaced = self.preload.lock().replace(Preloaded {
                track: track.clone(),
                stream,
            });
            self.rearm_next(&control);
            replaced
        };
        if let Some(old) = replaced {
            old.stream.close();
        }
        debug!("Preloaded {}", track.path.display());
        self.emit_all(events);
        Ok(())
    }

    /// Queue the track to switch to when the current one ends
    pub fn set_next_track(&self, track: Option<Track>) {
        self.with_advance_plan(|control| control.next_track = track);
    }

    /// Stop instead of advancing when the current track ends
    pub fn set_stop_after_current(&self, stop: bool) {
        self.with_advance_plan(|control| control.stop_after_current = stop);
    }

    fn with_advance_plan<F: FnOnce(&mut ControlState)>(&self, change: F) {
        let mut events = Vec::new();
        {
            let mut control = self.control.lock();
            self.settle_promotion(&mut control, &mut events);
            change(&mut *control);
            self.rearm_next(&control);
        }
        self.emit_all(events);
    }

    pub fn stop_after_current(&self) -> bool {
        self.control.lock().stop_after_current
    }

    // ========================================
    // Control worker callbacks
    // ========================================

    /// The render path reached end of data on stream `id`
    pub(crate) fn handle_end_of_stream(&self, id: u64) {
        let mut events = Vec::new();
        {
            let mut control = self.control.lock();
            self.settle_promotion(&mut control, &mut events);
            if control.current.id() != id {
                debug!("Ignoring end of superseded stream {}", id);
            } else {
                match control.mode {
                    PlayMode::Radio | PlayMode::RadioPaused => {
                        let url = control
                            .playing_station
                            .as_ref()
                            .map(|s| s.url.clone())
                            .unwrap_or_default();
                        warn!("Radio stream {} ended", url);
                        events.push(PlayerEvent::RadioFailed {
                            url,
                            reason: "stream ended".to_string(),
                            timestamp: chrono::Utc::now(),
                        });
                        let old = self.stop_locked(&mut control, &mut events);
                        self.retire(&mut control, old);
                    }
                    PlayMode::Playing | PlayMode::Paused => {
                        if let Err(e) = self.advance_locked(&mut control, false, &mut events) {
                            warn!("Advance after end of track failed: {}", e);
                        }
                    }
                    PlayMode::Stopped => {}
                }
            }
            self.rearm_next(&control);
        }
        self.emit_all(events);
    }

    /// The render path promoted the armed stream `started` when `ended` ran out
    pub(crate) fn handle_promoted(&self, ended: u64, started: u64) {
        let mut events = Vec::new();
        {
            let mut control = self.control.lock();
            self.adopt_promoted(&mut control, &mut events);
            if control.current.id() != started {
                debug!("Promotion {} -> {} already superseded", ended, started);
            }
            self.rearm_next(&control);
        }
        self.emit_all(events);
    }

    /// The silence drain has been served: apply the pending rate change
    pub(crate) fn handle_drain_complete(&self) {
        let mut control = self.control.lock();
        if !self.render.is_rate_pending() || self.render.drain_remaining() > 0 {
            return;
        }
        let Some(rate) = control.pending_rate.take() else {
            self.render.end_drain();
            return;
        };
        if let Some(output) = self.output.lock().as_ref() {
            if let Err(e) = output.set_frequency(rate) {
                warn!("Output rate change to {} Hz failed: {}", rate, e);
            }
        }
        self.render.spectrum().rebuild(rate);
        self.render.end_drain();
    }

    /// Periodic housekeeping on the control worker
    pub(crate) fn handle_tick(&self, now: Instant) {
        let mut events = Vec::new();
        let settled = {
            let mut control = self.control.lock();
            self.adopt_promoted(&mut control, &mut events);

            if control.pending_start.as_ref().map(|p| now >= p.due).unwrap_or(false) {
                if let Some(start) = control.pending_start.take() {
                    events.push(PlayerEvent::TrackStarted {
                        path: start.path,
                        user_skip: false,
                        timestamp: chrono::Utc::now(),
                    });
                }
            }

            if let Some(equalizer) = control.current.equalizer() {
                equalizer.collect();
            }

            if let Some(radio) = control.current_radio.clone() {
                let interval = Duration::from_millis(self.config.radio.metadata_poll_ms);
                if now.duration_since(control.last_metadata_poll) >= interval {
                    control.last_metadata_poll = now;
                    events.extend(radio.poll_metadata().into_iter().map(|c| c.into_event()));
                }
            }

            let settle = self.config.stop_settle();
            let (settled, kept): (Vec<_>, Vec<_>) = control
                .retired
                .drain(..)
                .partition(|r| now.saturating_duration_since(r.since) >= settle);
            control.retired = kept;
            settled
        };

        let shared = close_settled(settled);
        if !shared.is_empty() {
            self.control.lock().retired.extend(shared);
        }
        self.emit_all(events);
    }
}
