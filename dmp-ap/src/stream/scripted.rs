//! In-memory stream for unit tests: samples go straight into the ring, no decoder

use super::core::{CoreWriter, StreamCore};
use super::{PcmStream, StreamSource};
use crate::dsp::equalizer::Equalizer;
use crate::dsp::iir::BandCount;
use crate::error::{Error, Result};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

pub(crate) struct ScriptedStream {
    core: Arc<StreamCore>,
    writer: Mutex<CoreWriter>,
}

impl ScriptedStream {
    pub(crate) fn new(sample_rate: u32) -> Arc<Self> {
        let (core, writer) = StreamCore::new(sample_rate, 2000, BandCount::Ten);
        Arc::new(Self {
            core,
            writer: Mutex::new(writer),
        })
    }

    /// A stream holding exactly `samples`, then end of data
    pub(crate) fn ended_after(sample_rate: u32, samples: &[f32]) -> Arc<Self> {
        let stream = Self::new(sample_rate);
        stream.push(samples);
        stream.writer.lock().finish();
        stream
    }

    pub(crate) fn push(&self, samples: &[f32]) -> usize {
        self.writer.lock().push(samples)
    }
}

impl PcmStream for ScriptedStream {
    fn id(&self) -> u64 {
        self.core.id()
    }

    fn source(&self) -> StreamSource {
        StreamSource::Null
    }

    fn read(&self, out: &mut [f32]) -> usize {
        self.core.read(out)
    }

    fn sample_rate(&self) -> u32 {
        self.core.sample_rate()
    }

    fn elapsed(&self) -> Duration {
        self.core.elapsed()
    }

    fn set_elapsed(&self, _position: Duration) -> Result<Duration> {
        Err(Error::InvalidState("Scripted streams cannot seek".to_string()))
    }

    fn duration(&self) -> Option<Duration> {
        None
    }

    fn bitrate_kbps(&self) -> Option<u32> {
        None
    }

    fn set_gain_db(&self, db: f32) {
        self.core.set_gain_db(db);
    }

    fn gain_db(&self) -> f32 {
        self.core.gain_db()
    }

    fn equalizer(&self) -> Option<&Equalizer> {
        Some(self.core.equalizer())
    }

    fn clipping_rate(&self) -> f32 {
        self.core.clipping_rate()
    }

    fn underruns(&self) -> u64 {
        self.core.underruns()
    }

    fn close(&self) {
        self.core.close();
    }

    fn is_closed(&self) -> bool {
        self.core.is_closed()
    }
}
