//! Real-time render path
//!
//! [`RenderState`] is what the output device pulls from. Each pull:
//! - serves silence from the null stream while a rate change is pending, counting down
//!   the drain and notifying the control worker once it has been served
//! - otherwise reads the current stream. When it ends inside the buffer and a next
//!   stream at the same rate is armed, the next stream is promoted in place and fills
//!   the rest of the buffer, so a natural advance has no gap. Without one, the rest is
//!   silence plus one end-of-stream notification to the worker
//! - feeds the spectrum analyzer while audible and clears it otherwise
//!
//! The stream slots sit behind a mutex held only for a pointer clone or swap. The render
//! side only ever `try_lock`s it; contention is met with silence. Streams leave the slots
//! by the control side or by promotion, and the control side always keeps its own
//! reference, so the device thread never drops the last one.

use crate::audio::backend::RenderSource;
use crate::dsp::spectrum::SpectrumAnalyzer;
use crate::stream::{null_stream, PcmStream};
use crossbeam_channel::Sender;
use dmp_common::PlayMode;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;

/// Notifications for the control worker
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum WorkerMessage {
    /// The stream with this id returned end of data
    EndOfStream(u64),
    /// The render path moved from stream `ended` to the armed stream `started`
    Promoted { ended: u64, started: u64 },
    /// The rate-change silence drain has been served
    DrainComplete,
    Shutdown,
}

struct Slots {
    current: Arc<dyn PcmStream>,
    /// Continues `current` when it ends; always at the same sample rate
    next: Option<Arc<dyn PcmStream>>,
}

pub(crate) struct RenderState {
    slots: Mutex<Slots>,
    null: Arc<dyn PcmStream>,
    mode: AtomicU8,
    rate_pending: AtomicBool,
    drain_samples: AtomicUsize,
    drain_notified: AtomicBool,
    drained_total: AtomicU64,
    eof_reported: AtomicU64,
    contention: AtomicU64,
    spectrum: SpectrumAnalyzer,
    notify: Sender<WorkerMessage>,
}

impl RenderState {
    pub(crate) fn new(spectrum: SpectrumAnalyzer, notify: Sender<WorkerMessage>) -> Self {
        Self {
            slots: Mutex::new(Slots {
                current: null_stream(),
                next: None,
            }),
            null: null_stream(),
            mode: AtomicU8::new(encode_mode(PlayMode::Stopped)),
            rate_pending: AtomicBool::new(false),
            drain_samples: AtomicUsize::new(0),
            drain_notified: AtomicBool::new(false),
            drained_total: AtomicU64::new(0),
            eof_reported: AtomicU64::new(0),
            contention: AtomicU64::new(0),
            spectrum,
            notify,
        }
    }

    /// Route `stream` to the device and disarm any next stream; returns the stream it
    /// replaces
    pub(crate) fn install(&self, stream: Arc<dyn PcmStream>) -> Arc<dyn PcmStream> {
        self.eof_reported.store(0, Ordering::Release);
        let mut slots = self.slots.lock();
        slots.next = None;
        std::mem::replace(&mut slots.current, stream)
    }

    pub(crate) fn current(&self) -> Arc<dyn PcmStream> {
        Arc::clone(&self.slots.lock().current)
    }

    /// Arm (or with `None` disarm) the stream that takes over when the current one ends.
    ///
    /// The caller keeps its own reference and guarantees the rates match.
    pub(crate) fn set_next(&self, next: Option<Arc<dyn PcmStream>>) {
        let mut slots = self.slots.lock();
        let current = slots.current.id();
        slots.next = next.filter(|stream| stream.id() != current);
    }

    pub(crate) fn next_id(&self) -> Option<u64> {
        self.slots.lock().next.as_ref().map(|stream| stream.id())
    }

    /// Allow another end-of-data report for the current stream (after a seek)
    pub(crate) fn rearm_end_of_stream(&self) {
        self.eof_reported.store(0, Ordering::Release);
    }

    pub(crate) fn set_mode(&self, mode: PlayMode) {
        self.mode.store(encode_mode(mode), Ordering::Release);
    }

    /// Serve `samples` of silence, then hold silence until [`end_drain`](Self::end_drain)
    pub(crate) fn begin_drain(&self, samples: usize) {
        self.drain_samples.store(samples, Ordering::Release);
        self.drain_notified.store(false, Ordering::Release);
        self.rate_pending.store(true, Ordering::Release);
    }

    pub(crate) fn end_drain(&self) {
        self.rate_pending.store(false, Ordering::Release);
        self.drain_samples.store(0, Ordering::Release);
    }

    pub(crate) fn is_rate_pending(&self) -> bool {
        self.rate_pending.load(Ordering::Acquire)
    }

    pub(crate) fn drain_remaining(&self) -> usize {
        self.drain_samples.load(Ordering::Acquire)
    }

    /// Silence samples served while rate changes were pending
    pub(crate) fn drained_total(&self) -> u64 {
        self.drained_total.load(Ordering::Relaxed)
    }

    /// Pulls that found the stream slot locked
    pub(crate) fn contention(&self) -> u64 {
        self.contention.load(Ordering::Relaxed)
    }

    pub(crate) fn spectrum(&self) -> &SpectrumAnalyzer {
        &self.spectrum
    }

    fn serve_drain(&self, out: &mut [f32]) {
        self.null.read(out);
        let served = out.len();
        let previous = self
            .drain_samples
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |left| Some(left.saturating_sub(served)))
            .unwrap_or(0);
        self.drained_total.fetch_add(served as u64, Ordering::Relaxed);
        if previous <= served && !self.drain_notified.swap(true, Ordering::AcqRel) {
            let _ = self.notify.try_send(WorkerMessage::DrainComplete);
        }
        self.spectrum.clear();
    }

    /// Swap the armed stream in for `ended` if that is still the current stream
    fn promote_next(&self, ended: u64) -> Option<Arc<dyn PcmStream>> {
        let mut slots = self.slots.try_lock()?;
        if slots.current.id() != ended {
            return None;
        }
        let next = slots.next.take()?;
        if next.is_closed() {
            return None;
        }
        slots.current = Arc::clone(&next);
        Some(next)
    }
}

impl RenderSource for RenderState {
    fn render(&self, out: &mut [f32]) {
        if self.rate_pending.load(Ordering::Acquire) {
            self.serve_drain(out);
            return;
        }

        let stream = match self.slots.try_lock() {
            Some(slots) => Arc::clone(&slots.current),
            None => {
                out.fill(0.0);
                self.contention.fetch_add(1, Ordering::Relaxed);
                return;
            }
        };

        let got = stream.read(out);
        if got < out.len() {
            let id = stream.id();
            match self.promote_next(id) {
                Some(next) => {
                    next.read(&mut out[got..]);
                    let _ = self.notify.try_send(WorkerMessage::Promoted {
                        ended: id,
                        started: next.id(),
                    });
                }
                None => {
                    out[got..].fill(0.0);
                    if self.eof_reported.swap(id, Ordering::AcqRel) != id {
                        let _ = self.notify.try_send(WorkerMessage::EndOfStream(id));
                    }
                }
            }
        }

        if decode_mode(self.mode.load(Ordering::Acquire)).is_audible() {
            self.spectrum.capture(out);
        } else {
            self.spectrum.clear();
        }
    }
}

fn encode_mode(mode: PlayMode) -> u8 {
    match mode {
        PlayMode::Stopped => 0,
        PlayMode::Playing => 1,
        PlayMode::Paused => 2,
        PlayMode::Radio => 3,
        PlayMode::RadioPaused => 4,
    }
}

fn decode_mode(value: u8) -> PlayMode {
    match value {
        1 => PlayMode::Playing,
        2 => PlayMode::Paused,
        3 => PlayMode::Radio,
        4 => PlayMode::RadioPaused,
        _ => PlayMode::Stopped,
    }
}
