//! File stream: a local file decoded ahead on its own thread

use super::core::{DecoderThread, StreamCore};
use super::{PcmStream, StreamOptions, StreamSource};
use crate::audio::decoder::{DecoderFactory, SourceInfo};
use crate::dsp::equalizer::Equalizer;
use crate::error::{Error, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// A decoded local file
pub struct FileStream {
    path: PathBuf,
    info: SourceInfo,
    core: Arc<StreamCore>,
    decoder: DecoderThread,
}

impl FileStream {
    /// Open `path` and start decoding ahead.
    ///
    /// # Returns
    /// `Error::Open` when the file is missing or the decoder rejects it.
    pub fn open(path: &Path, factory: &dyn DecoderFactory, options: StreamOptions) -> Result<Self> {
        if !path.is_file() {
            return Err(Error::open(path, "file not found"));
        }
        let decoder = factory.open_file(path)?;
        let info = decoder.info().clone();
        if info.sample_rate == 0 {
            return Err(Error::open(path, "decoder reported a zero sample rate"));
        }

        let (core, writer) = StreamCore::new(info.sample_rate, options.buffer_ms, options.equalizer_bands);
        let decoder = DecoderThread::spawn(decoder, writer, path.display().to_string())?;

        info!(
            "Opened file stream {} ({} Hz, {:?})",
            path.display(),
            info.sample_rate,
            info.duration
        );

        Ok(Self {
            path: path.to_path_buf(),
            info,
            core,
            decoder,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn info(&self) -> &SourceInfo {
        &self.info
    }

    /// Wait until decoded audio is available or the file has ended. False on timeout.
    pub fn wait_ready(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if self.core.fill_percent() > 0 || self.core.is_finished() {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(Duration::from_millis(1));
        }
    }
}

impl PcmStream for FileStream {
    fn id(&self) -> u64 {
        self.core.id()
    }

    fn source(&self) -> StreamSource {
        StreamSource::File(self.path.clone())
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

    fn set_elapsed(&self, position: Duration) -> Result<Duration> {
        if self.core.is_closed() {
            return Err(Error::InvalidState("Stream is closed".to_string()));
        }
        let target = match self.info.duration {
            Some(duration) => position.min(duration),
            None => position,
        };
        self.decoder.seek(target)
    }

    fn duration(&self) -> Option<Duration> {
        self.info.duration
    }

    fn bitrate_kbps(&self) -> Option<u32> {
        self.info.bitrate_kbps
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
        if !self.core.close() {
            return;
        }
        self.decoder.stop();
        debug!("Closed file stream {}", self.path.display());
    }

    fn is_closed(&self) -> bool {
        self.core.is_closed()
    }
}

impl Drop for FileStream {
    fn drop(&mut self) {
        self.close();
    }
}
