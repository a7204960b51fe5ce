//! Shared read path of decoded streams
//!
//! A decode thread owns the [`CoreWriter`] and pushes interleaved stereo `f32` into a
//! single-producer single-consumer ring. The device thread calls [`StreamCore::read`],
//! which pops what is available, pads any shortfall with silence, then applies gain and
//! the stream's equalizer. Both sides move whole frames only, so a ring that fills or
//! drains mid-buffer never swaps the channels.
//!
//! The consumer half sits behind a mutex the render path only ever `try_lock`s. The lock
//! is contended only while the decode thread resets the ring for a seek; a read that
//! loses that race returns silence instead of waiting.
//!
//! [`DecoderThread`] runs the decode loop shared by file and radio streams. It sleeps on
//! its command channel whenever the ring is full, and after end of data waits for a seek
//! (which revives it) or for close.

use crate::audio::decoder::PcmDecoder;
use crate::audio::types::STEREO;
use crate::dsp::equalizer::{Equalizer, EqualizerProcessor};
use crate::dsp::iir::BandCount;
use crate::error::{Error, Result};
use crossbeam_channel::{bounded, unbounded, Receiver, RecvTimeoutError, Sender, TryRecvError};
use parking_lot::Mutex;
use ringbuf::{traits::*, HeapCons, HeapProd, HeapRb};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, warn};

/// Smallest ring, in samples
const MIN_RING_SAMPLES: usize = 8192;

/// Weight of the newest buffer in the smoothed clipping rate
const CLIP_SMOOTHING: f32 = 0.1;

/// Wait between attempts while the ring is full or the decoder is idle
const IDLE_WAIT: Duration = Duration::from_millis(5);

const SEEK_TIMEOUT: Duration = Duration::from_secs(5);

static NEXT_STREAM_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique stream identifier
pub(crate) fn next_stream_id() -> u64 {
    NEXT_STREAM_ID.fetch_add(1, Ordering::Relaxed)
}

/// Convert a dB gain to a linear multiplier
pub fn db_to_linear(db: f32) -> f32 {
    10f32.powf(db / 20.0)
}

struct ReaderHalf {
    consumer: HeapCons<f32>,
    equalizer: EqualizerProcessor,
}

/// State shared by a stream's decode thread and its readers
pub(crate) struct StreamCore {
    id: u64,
    sample_rate: u32,
    capacity: usize,
    reader: Mutex<ReaderHalf>,
    equalizer: Equalizer,
    gain_db: AtomicU32,
    gain_linear: AtomicU32,
    frames_read: AtomicU64,
    finished: AtomicBool,
    closed: AtomicBool,
    underruns: AtomicU64,
    clip_rate: AtomicU32,
}

/// Producer half, owned by the decode thread
pub(crate) struct CoreWriter {
    producer: HeapProd<f32>,
    core: Arc<StreamCore>,
}

impl StreamCore {
    /// Create the shared state and its writer.
    ///
    /// # Arguments
    /// * `sample_rate` - Native rate of the source; fixed for the stream's lifetime
    /// * `buffer_ms` - Decode-ahead held in the ring
    /// * `bands` - Equalizer layout
    pub(crate) fn new(sample_rate: u32, buffer_ms: u64, bands: BandCount) -> (Arc<Self>, CoreWriter) {
        let samples = (sample_rate as u64 * 2 * buffer_ms / 1000) as usize;
        let capacity = samples.max(MIN_RING_SAMPLES).next_multiple_of(STEREO);
        let (producer, consumer) = HeapRb::<f32>::new(capacity).split();
        let (equalizer, processor) = Equalizer::new(bands, sample_rate);

        let core = Arc::new(Self {
            id: next_stream_id(),
            sample_rate,
            capacity,
            reader: Mutex::new(ReaderHalf {
                consumer,
                equalizer: processor,
            }),
            equalizer,
            gain_db: AtomicU32::new(0f32.to_bits()),
            gain_linear: AtomicU32::new(1f32.to_bits()),
            frames_read: AtomicU64::new(0),
            finished: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            underruns: AtomicU64::new(0),
            clip_rate: AtomicU32::new(0f32.to_bits()),
        });

        let writer = CoreWriter {
            producer,
            core: Arc::clone(&core),
        };
        (core, writer)
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    pub(crate) fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Fill `out` with the next samples.
    ///
    /// Returns `out.len()` while data flows, padding shortfalls with silence. Once the
    /// writer has finished, the buffer that empties the ring returns the count of real
    /// samples in it (the rest is silence) and every later read returns 0.
    pub(crate) fn read(&self, out: &mut [f32]) -> usize {
        if self.closed.load(Ordering::Acquire) {
            out.fill(0.0);
            return 0;
        }

        let Some(mut reader) = self.reader.try_lock() else {
            out.fill(0.0);
            self.underruns.fetch_add(1, Ordering::Relaxed);
            return out.len();
        };

        // Load before popping: samples pushed after this point cannot be mistaken for end
        let finished = self.finished.load(Ordering::Acquire);
        let whole = out.len().min(reader.consumer.occupied_len());
        let got = reader.consumer.pop_slice(&mut out[..whole - whole % STEREO]);
        if got == 0 && finished {
            out.fill(0.0);
            return 0;
        }
        if got < out.len() {
            out[got..].fill(0.0);
            if !finished {
                self.underruns.fetch_add(1, Ordering::Relaxed);
            }
        }

        let gain = f32::from_bits(self.gain_linear.load(Ordering::Relaxed));
        if gain != 1.0 {
            for sample in out.iter_mut() {
                *sample *= gain;
            }
        }
        reader.equalizer.process(out);

        let clipped = out.iter().filter(|s| s.abs() > 1.0).count();
        let ratio = if out.is_empty() {
            0.0
        } else {
            clipped as f32 / out.len() as f32
        };
        let previous = f32::from_bits(self.clip_rate.load(Ordering::Relaxed));
        let smoothed = previous + CLIP_SMOOTHING * (ratio - previous);
        self.clip_rate.store(smoothed.to_bits(), Ordering::Relaxed);

        self.frames_read.fetch_add((got / STEREO) as u64, Ordering::Relaxed);
        if finished && got < out.len() {
            got
        } else {
            out.len()
        }
    }

    /// Discard buffered audio and restart position accounting at `position`.
    ///
    /// Called from the decode thread after its decoder has been repositioned.
    pub(crate) fn reset(&self, position: Duration) {
        let mut reader = self.reader.lock();
        reader.consumer.clear();
        let frames = (position.as_secs_f64() * self.sample_rate as f64).round() as u64;
        self.frames_read.store(frames, Ordering::Relaxed);
        self.finished.store(false, Ordering::Release);
        debug!("Stream {} reset to {:?}", self.id, position);
    }

    pub(crate) fn elapsed(&self) -> Duration {
        let frames = self.frames_read.load(Ordering::Relaxed);
        Duration::from_secs_f64(frames as f64 / self.sample_rate.max(1) as f64)
    }

    pub(crate) fn set_gain_db(&self, db: f32) {
        self.gain_db.store(db.to_bits(), Ordering::Relaxed);
        self.gain_linear.store(db_to_linear(db).to_bits(), Ordering::Relaxed);
    }

    pub(crate) fn gain_db(&self) -> f32 {
        f32::from_bits(self.gain_db.load(Ordering::Relaxed))
    }

    pub(crate) fn equalizer(&self) -> &Equalizer {
        &self.equalizer
    }

    /// Smoothed fraction of output samples beyond full scale
    pub(crate) fn clipping_rate(&self) -> f32 {
        f32::from_bits(self.clip_rate.load(Ordering::Relaxed))
    }

    pub(crate) fn underruns(&self) -> u64 {
        self.underruns.load(Ordering::Relaxed)
    }

    /// Mark closed; returns false if it already was
    pub(crate) fn close(&self) -> bool {
        !self.closed.swap(true, Ordering::AcqRel)
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub(crate) fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }

    /// Samples currently buffered as a percentage of the ring
    pub(crate) fn fill_percent(&self) -> u8 {
        let buffered = self.capacity.saturating_sub(self.vacant_hint());
        ((buffered * 100) / self.capacity.max(1)) as u8
    }

    fn vacant_hint(&self) -> usize {
        match self.reader.try_lock() {
            Some(reader) => self.capacity - reader.consumer.occupied_len(),
            None => self.capacity,
        }
    }
}

impl CoreWriter {
    /// Push as many whole frames as fit; returns the number of samples pushed
    pub(crate) fn push(&mut self, samples: &[f32]) -> usize {
        let room = samples.len().min(self.producer.vacant_len());
        self.producer.push_slice(&samples[..room - room % STEREO])
    }

    pub(crate) fn vacant(&self) -> usize {
        self.producer.vacant_len()
    }

    /// Signal that no more samples will be written until the next reset
    pub(crate) fn finish(&self) {
        self.core.finished.store(true, Ordering::Release);
    }

    pub(crate) fn core(&self) -> &StreamCore {
        &self.core
    }
}

enum DecodeCommand {
    Seek {
        position: Duration,
        reply: Sender<Result<Duration>>,
    },
    Close,
}

/// Handle of a running decode thread
pub(crate) struct DecoderThread {
    label: String,
    commands: Sender<DecodeCommand>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl DecoderThread {
    /// Start decoding into `writer` on a thread named "decoder"
    pub(crate) fn spawn(decoder: Box<dyn PcmDecoder>, writer: CoreWriter, label: String) -> Result<Self> {
        let (commands, receiver) = unbounded();
        let thread_label = label.clone();
        let handle = thread::Builder::new()
            .name("decoder".into())
            .spawn(move || decode_loop(decoder, writer, receiver, thread_label))?;
        Ok(Self {
            label,
            commands,
            handle: Mutex::new(Some(handle)),
        })
    }

    /// Reposition the decoder and flush the ring; returns the position reached
    pub(crate) fn seek(&self, position: Duration) -> Result<Duration> {
        let (reply, response) = bounded(1);
        self.commands
            .send(DecodeCommand::Seek { position, reply })
            .map_err(|_| Error::InvalidState("Decoder thread has exited".to_string()))?;

        match response.recv_timeout(SEEK_TIMEOUT) {
            Ok(result) => result,
            Err(_) => Err(Error::Decode(format!("Seek in {} timed out", self.label))),
        }
    }

    /// Stop the thread and wait for it
    pub(crate) fn stop(&self) {
        let _ = self.commands.send(DecodeCommand::Close);
        if let Some(handle) = self.handle.lock().take() {
            if handle.join().is_err() {
                warn!("Decoder thread for {} panicked", self.label);
            }
        }
    }
}

fn decode_loop(
    mut decoder: Box<dyn PcmDecoder>,
    mut writer: CoreWriter,
    commands: Receiver<DecodeCommand>,
    label: String,
) {
    let mut pending: Vec<f32> = Vec::new();
    let mut offset = 0;
    let mut ended = false;

    loop {
        let blocked = ended || (offset < pending.len() && writer.vacant() == 0);
        let command = if blocked {
            match commands.recv_timeout(IDLE_WAIT) {
                Ok(command) => Some(command),
                Err(RecvTimeoutError::Timeout) => None,
                Err(RecvTimeoutError::Disconnected) => break,
            }
        } else {
            match commands.try_recv() {
                Ok(command) => Some(command),
                Err(TryRecvError::Empty) => None,
                Err(TryRecvError::Disconnected) => break,
            }
        };

        match command {
            Some(DecodeCommand::Close) => break,
            Some(DecodeCommand::Seek { position, reply }) => {
                let result = decoder.seek(position);
                if let Ok(reached) = result {
                    pending.clear();
                    offset = 0;
                    ended = false;
                    writer.core().reset(reached);
                }
                let _ = reply.send(result);
                continue;
            }
            None => {}
        }

        if writer.core().is_closed() {
            break;
        }
        if ended {
            continue;
        }

        if offset < pending.len() {
            offset += writer.push(&pending[offset..]);
            if offset < pending.len() {
                continue;
            }
        }

        match decoder.next_chunk() {
            Ok(Some(chunk)) => {
                pending = chunk;
                offset = 0;
            }
            Ok(None) => {
                debug!("Decoder reached end of {}", label);
                writer.finish();
                ended = true;
            }
            Err(e) => {
                warn!("Decoding {} stopped: {}", label, e);
                writer.finish();
                ended = true;
            }
        }
    }

    debug!("Decoder thread for {} exiting", label);
}
