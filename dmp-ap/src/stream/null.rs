//! The silence stream
//!
//! One process-wide instance stands in wherever no real stream is playing and serves
//! the silence drain before a rate change. It is immutable and never closed.

use super::{PcmStream, StreamSource};
use crate::dsp::equalizer::Equalizer;
use crate::error::{Error, Result};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

static NULL_STREAM: OnceLock<Arc<NullStream>> = OnceLock::new();

/// The shared silence stream
pub fn null_stream() -> Arc<dyn PcmStream> {
    NULL_STREAM.get_or_init(|| Arc::new(NullStream { id: 0 })).clone()
}

/// Endless silence at whatever rate the device runs
#[derive(Debug)]
pub struct NullStream {
    id: u64,
}

impl PcmStream for NullStream {
    fn id(&self) -> u64 {
        self.id
    }

    fn source(&self) -> StreamSource {
        StreamSource::Null
    }

    fn read(&self, out: &mut [f32]) -> usize {
        out.fill(0.0);
        out.len()
    }

    fn sample_rate(&self) -> u32 {
        0
    }

    fn elapsed(&self) -> Duration {
        Duration::ZERO
    }

    fn set_elapsed(&self, _position: Duration) -> Result<Duration> {
        Err(Error::InvalidState("Nothing is playing".to_string()))
    }

    fn duration(&self) -> Option<Duration> {
        None
    }

    fn bitrate_kbps(&self) -> Option<u32> {
        None
    }

    fn set_gain_db(&self, _db: f32) {}

    fn gain_db(&self) -> f32 {
        0.0
    }

    fn equalizer(&self) -> Option<&Equalizer> {
        None
    }

    fn clipping_rate(&self) -> f32 {
        0.0
    }

    fn underruns(&self) -> u64 {
        0
    }

    fn close(&self) {}

    fn is_closed(&self) -> bool {
        false
    }
}

/// True when `stream` is the shared silence stream
pub fn is_null(stream: &Arc<dyn PcmStream>) -> bool {
    stream.source() == StreamSource::Null
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_singleton_and_never_closes() {
        let a = null_stream();
        let b = null_stream();
        assert!(Arc::ptr_eq(&a, &b));
        a.close();
        assert!(!b.is_closed());
        assert!(is_null(&a));
    }

    #[test]
    fn test_reads_full_silence() {
        let mut out = [0.7f32; 32];
        assert_eq!(null_stream().read(&mut out), 32);
        assert!(out.iter().all(|&s| s == 0.0));
    }
}
