//! Graphic equalizer
//!
//! A parallel bank of second-order band-pass sections per channel. Each section's output
//! is weighted by its band gain, the weighted sum gets a fixed 4x makeup and the
//! preamp-scaled dry signal is added back.
//!
//! The control side ([`Equalizer`]) and the render side ([`EqualizerProcessor`]) are
//! split like a ring buffer's producer and consumer:
//! - Band values, preamp and the enable flag live in shared atomics. The processor picks
//!   up a new generation at the top of the next `process` call.
//! - Layout or rate changes build a whole new [`EqualizerEngine`] on the control thread
//!   and stage it through an SPSC ring. The processor swaps it in before touching the
//!   next buffer, so no buffer is processed half-old/half-new.
//! - Replaced engines travel back through a second ring and are dropped on the control
//!   thread, never on the render thread.

use super::iir::{coefficients, BandCount, IirCoefficients, RateClass, MAX_BANDS};
use crate::audio::types::STEREO;
use crate::error::{Error, Result};
use parking_lot::Mutex;
use ringbuf::{traits::*, HeapCons, HeapProd, HeapRb};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// UI range of band and preamp values, dB
pub const MIN_BAND_DB: f32 = -12.0;
pub const MAX_BAND_DB: f32 = 12.0;

const GAIN_K1: f64 = 0.252_202_078_570_614_55;
const GAIN_K2: f64 = 0.080_178_361_802_353_992;
const PREAMP_K1: f64 = 0.999_999_464_972_175_84;
const PREAMP_K2: f64 = 0.069_314_738_656_671_843;
const PREAMP_OFFSET: f64 = 3.711_944_471_677_182_6e-7;

/// Makeup factor applied to the weighted band sum
const MAKEUP: f32 = 4.0;

/// Pending engine slots between control and render side
const STAGE_CAPACITY: usize = 4;

/// Map a band value in dB to the section weight.
///
/// 0 dB maps to a zero weight (the band adds nothing to the dry signal).
pub fn band_gain_to_linear(db: f32) -> f32 {
    let db = db.clamp(MIN_BAND_DB, MAX_BAND_DB) as f64;
    (GAIN_K1 * (GAIN_K2 * db).exp() - GAIN_K1) as f32
}

/// Map a preamp value in dB to a linear multiplier (0 dB is unity)
pub fn preamp_db_to_linear(db: f32) -> f32 {
    let db = db.clamp(MIN_BAND_DB, MAX_BAND_DB) as f64;
    (PREAMP_K1 * (PREAMP_K2 * db).exp() + PREAMP_OFFSET) as f32
}

#[derive(Debug, Clone, Copy, Default)]
struct SectionHistory {
    x: [f32; 3],
    y: [f32; 3],
}

/// One equalizer instance for a fixed (band layout, sample rate) pair
#[derive(Debug, Clone)]
pub struct EqualizerEngine {
    band_count: BandCount,
    sample_rate: u32,
    /// `None` when the rate is outside the supported window (pass-through)
    coeffs: Option<&'static [IirCoefficients]>,
    gains: [[f32; STEREO]; MAX_BANDS],
    preamp: [f32; STEREO],
    history: [[SectionHistory; STEREO]; MAX_BANDS],
    i: usize,
    j: usize,
    k: usize,
}

impl EqualizerEngine {
    pub fn new(band_count: BandCount, sample_rate: u32) -> Self {
        let coeffs = RateClass::for_rate(sample_rate).map(|class| coefficients(band_count, class));
        if coeffs.is_none() {
            debug!("Equalizer pass-through at {} Hz", sample_rate);
        }
        Self {
            band_count,
            sample_rate,
            coeffs,
            gains: [[0.0; STEREO]; MAX_BANDS],
            preamp: [preamp_db_to_linear(0.0); STEREO],
            history: [[SectionHistory::default(); STEREO]; MAX_BANDS],
            i: 0,
            j: 2,
            k: 1,
        }
    }

    pub fn band_count(&self) -> BandCount {
        self.band_count
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn is_passthrough(&self) -> bool {
        self.coeffs.is_none()
    }

    /// Set band weights from physical band values (dB), one per band
    pub fn set_band_gains(&mut self, values_db: &[f32]) {
        for (band, &db) in values_db.iter().take(self.band_count.count()).enumerate() {
            let linear = band_gain_to_linear(db);
            self.gains[band] = [linear; STEREO];
        }
    }

    pub fn set_preamp_db(&mut self, db: f32) {
        self.preamp = [preamp_db_to_linear(db); STEREO];
    }

    /// Current weight of a band (left channel)
    pub fn band_gain(&self, band: usize) -> f32 {
        self.gains[band][0]
    }

    pub fn preamp(&self) -> f32 {
        self.preamp[0]
    }

    /// Zero all section history
    pub fn reset(&mut self) {
        self.history = [[SectionHistory::default(); STEREO]; MAX_BANDS];
    }

    fn load(&mut self, settings: &EqualizerSettings) {
        for band in 0..self.band_count.count() {
            let db = f32::from_bits(settings.band_db[band].load(Ordering::Relaxed));
            self.gains[band] = [band_gain_to_linear(db); STEREO];
        }
        let preamp = f32::from_bits(settings.preamp_db.load(Ordering::Relaxed));
        self.preamp = [preamp_db_to_linear(preamp); STEREO];
    }

    /// Filter interleaved stereo samples in place
    pub fn process(&mut self, samples: &mut [f32]) {
        let Some(coeffs) = self.coeffs else {
            return;
        };
        let bands = self.band_count.count();
        let (mut i, mut j, mut k) = (self.i, self.j, self.k);

        for frame in samples.chunks_exact_mut(STEREO) {
            for (ch, sample) in frame.iter_mut().enumerate() {
                let pcm = *sample * self.preamp[ch];
                let mut sum = 0.0f32;
                for (band, c) in coeffs.iter().enumerate().take(bands) {
                    let h = &mut self.history[band][ch];
                    h.x[i] = pcm;
                    h.y[i] = c.alpha * (h.x[i] - h.x[k]) + c.gamma * h.y[j] - c.beta * h.y[k];
                    sum += h.y[i] * self.gains[band][ch];
                }
                *sample = sum * MAKEUP + pcm;
            }
            i = (i + 1) % 3;
            j = (j + 1) % 3;
            k = (k + 1) % 3;
        }

        self.i = i;
        self.j = j;
        self.k = k;
    }
}

/// Values shared between the control handle and the processor
struct EqualizerSettings {
    enabled: AtomicBool,
    preamp_db: AtomicU32,
    band_db: [AtomicU32; MAX_BANDS],
    generation: AtomicU64,
}

impl EqualizerSettings {
    fn new(enabled: bool) -> Self {
        Self {
            enabled: AtomicBool::new(enabled),
            preamp_db: AtomicU32::new(0f32.to_bits()),
            band_db: std::array::from_fn(|_| AtomicU32::new(0f32.to_bits())),
            generation: AtomicU64::new(0),
        }
    }

    fn bump(&self) {
        self.generation.fetch_add(1, Ordering::Release);
    }
}

struct Staging {
    producer: HeapProd<Box<EqualizerEngine>>,
    retired: HeapCons<Box<EqualizerEngine>>,
    band_count: BandCount,
    sample_rate: u32,
}

/// Control-side handle of a stream's equalizer
pub struct Equalizer {
    settings: Arc<EqualizerSettings>,
    staging: Mutex<Staging>,
}

/// Render-side half; owned by the stream's read path
pub struct EqualizerProcessor {
    engine: Box<EqualizerEngine>,
    settings: Arc<EqualizerSettings>,
    staged: HeapCons<Box<EqualizerEngine>>,
    retire: HeapProd<Box<EqualizerEngine>>,
    applied_generation: u64,
}

impl Equalizer {
    /// Create a linked control handle and processor
    pub fn new(band_count: BandCount, sample_rate: u32) -> (Equalizer, EqualizerProcessor) {
        let settings = Arc::new(EqualizerSettings::new(false));
        let (producer, staged) = HeapRb::<Box<EqualizerEngine>>::new(STAGE_CAPACITY).split();
        let (retire, retired) = HeapRb::<Box<EqualizerEngine>>::new(STAGE_CAPACITY).split();

        let handle = Equalizer {
            settings: Arc::clone(&settings),
            staging: Mutex::new(Staging {
                producer,
                retired,
                band_count,
                sample_rate,
            }),
        };
        let processor = EqualizerProcessor {
            engine: Box::new(EqualizerEngine::new(band_count, sample_rate)),
            settings,
            staged,
            retire,
            applied_generation: u64::MAX,
        };
        (handle, processor)
    }

    pub fn band_count(&self) -> BandCount {
        self.staging.lock().band_count
    }

    pub fn sample_rate(&self) -> u32 {
        self.staging.lock().sample_rate
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.settings.enabled.store(enabled, Ordering::Release);
    }

    pub fn is_enabled(&self) -> bool {
        self.settings.enabled.load(Ordering::Acquire)
    }

    /// Apply UI band values in dB.
    ///
    /// The 10-band layout takes 10 values. The 31-band layout takes 31 values, or 30 UI
    /// values with the last one duplicated into the 31st physical band. Values are
    /// clamped to [-12, +12] dB and take effect on the next processed buffer.
    pub fn apply_band_gains(&self, values_db: &[f32]) -> Result<()> {
        let band_count = self.band_count();
        let physical = expand_band_values(band_count, values_db)?;
        for (slot, db) in self.settings.band_db.iter().zip(physical.iter()) {
            slot.store(db.clamp(MIN_BAND_DB, MAX_BAND_DB).to_bits(), Ordering::Relaxed);
        }
        self.settings.bump();
        Ok(())
    }

    /// Set the preamp in dB (clamped to [-12, +12])
    pub fn set_preamp_db(&self, db: f32) {
        self.settings
            .preamp_db
            .store(db.clamp(MIN_BAND_DB, MAX_BAND_DB).to_bits(), Ordering::Relaxed);
        self.settings.bump();
    }

    pub fn preamp_db(&self) -> f32 {
        f32::from_bits(self.settings.preamp_db.load(Ordering::Relaxed))
    }

    /// Physical band values currently applied, dB
    pub fn band_values(&self) -> Vec<f32> {
        let count = self.band_count().count();
        self.settings.band_db[..count]
            .iter()
            .map(|v| f32::from_bits(v.load(Ordering::Relaxed)))
            .collect()
    }

    /// Build a replacement engine for a new layout or rate and stage it.
    ///
    /// Switching layouts resets band values to flat; the caller re-applies its values for
    /// the new layout afterwards.
    pub fn reconfigure(&self, band_count: BandCount, sample_rate: u32) {
        let mut staging = self.staging.lock();
        Self::collect_retired(&mut staging);

        if staging.band_count == band_count && staging.sample_rate == sample_rate {
            return;
        }
        if staging.band_count != band_count {
            for slot in &self.settings.band_db {
                slot.store(0f32.to_bits(), Ordering::Relaxed);
            }
        }

        let mut engine = Box::new(EqualizerEngine::new(band_count, sample_rate));
        engine.load(&self.settings);
        if let Err(engine) = staging.producer.try_push(engine) {
            // Processor has not drained earlier stages; the current layout stays in place.
            warn!(
                "Equalizer stage queue full, dropping {:?} engine at {} Hz",
                engine.band_count(),
                engine.sample_rate()
            );
            return;
        }
        staging.band_count = band_count;
        staging.sample_rate = sample_rate;
        self.settings.bump();
        debug!("Staged {:?} equalizer engine at {} Hz", band_count, sample_rate);
    }

    /// Drop engines the processor has swapped out
    pub fn collect(&self) {
        let mut staging = self.staging.lock();
        Self::collect_retired(&mut staging);
    }

    fn collect_retired(staging: &mut Staging) {
        while let Some(engine) = staging.retired.try_pop() {
            drop(engine);
        }
    }
}

impl EqualizerProcessor {
    /// Process interleaved stereo samples in place.
    ///
    /// Swaps in a staged engine first, then refreshes gains when the control side has
    /// published new values. Does nothing (beyond the swap) while disabled.
    pub fn process(&mut self, samples: &mut [f32]) {
        while let Some(next) = self.staged.try_pop() {
            let old = std::mem::replace(&mut self.engine, next);
            // Retire ring is drained on every stage; a full ring means the control side
            // stopped collecting and the old engine is dropped here instead.
            let _ = self.retire.try_push(old);
            self.applied_generation = u64::MAX;
        }

        let generation = self.settings.generation.load(Ordering::Acquire);
        if generation != self.applied_generation {
            self.engine.load(&self.settings);
            self.applied_generation = generation;
        }

        if !self.settings.enabled.load(Ordering::Acquire) {
            return;
        }
        self.engine.process(samples);
    }

    /// Engine currently in use
    pub fn engine(&self) -> &EqualizerEngine {
        &self.engine
    }
}

/// Expand UI values to one value per physical band
fn expand_band_values(band_count: BandCount, values: &[f32]) -> Result<[f32; MAX_BANDS]> {
    let mut physical = [0.0f32; MAX_BANDS];
    match (band_count, values.len()) {
        (BandCount::Ten, 10) | (BandCount::ThirtyOne, 31) => {
            physical[..values.len()].copy_from_slice(values);
        }
        (BandCount::ThirtyOne, 30) => {
            physical[..30].copy_from_slice(values);
            physical[30] = values[29];
        }
        (layout, n) => {
            return Err(Error::InvalidInput(format!(
                "{} band values for a {}-band equalizer",
                n,
                layout.count()
            )));
        }
    }
    Ok(physical)
}
