//! Radio stream
//!
//! Connection tries every negotiation on each attempt and backs off between attempts; a
//! caller-owned `closing` flag aborts between tries. Once connected the stream is
//! playable immediately but reads silence until [`RadioStream::prebuffer`] has seen the
//! transport fill past the threshold or its wait has run out.

use super::core::{DecoderThread, StreamCore};
use super::metadata::{MetadataChange, MetadataTracker, StationMetadata};
use super::transport::{BufferFill, Negotiation, RadioTransport, TransportConnector};
use super::{PcmStream, StreamOptions, StreamSource};
use crate::audio::decoder::{DecoderFactory, SourceInfo};
use crate::config::RadioConfig;
use crate::dsp::equalizer::Equalizer;
use crate::error::{Error, Result};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Byte count treated as a full buffer for transports that only report bytes
const PREBUFFER_TARGET_BYTES: usize = 48 * 1024;

/// Granularity of the backoff sleep, so `closing` is noticed quickly
const BACKOFF_SLICE: Duration = Duration::from_millis(10);

/// A connected internet radio station
pub struct RadioStream {
    url: String,
    negotiation: Negotiation,
    info: SourceInfo,
    core: Arc<StreamCore>,
    transport: Arc<dyn RadioTransport>,
    decoder: DecoderThread,
    buffered: AtomicBool,
    tracker: Mutex<MetadataTracker>,
}

impl RadioStream {
    /// Connect to `url`, retrying up to `config.max_retries` times.
    ///
    /// # Returns
    /// `Error::RadioConnect` once every attempt has failed, `Error::InvalidState` when
    /// `closing` was raised before a connection succeeded.
    pub fn connect(
        url: &str,
        connector: &dyn TransportConnector,
        factory: &dyn DecoderFactory,
        config: &RadioConfig,
        options: StreamOptions,
        closing: &AtomicBool,
    ) -> Result<Self> {
        let attempts = config.max_retries.max(1);
        let mut last_error = String::from("no attempt made");

        for attempt in 1..=attempts {
            for negotiation in Negotiation::ALL {
                if closing.load(Ordering::Acquire) {
                    return Err(Error::InvalidState(format!("Connection to {} cancelled", url)));
                }
                match Self::try_open(url, negotiation, connector, factory, config, options) {
                    Ok(stream) => return Ok(stream),
                    Err(e) => {
                        warn!(
                            "Radio attempt {}/{} to {} ({:?}) failed: {}",
                            attempt, attempts, url, negotiation, e
                        );
                        last_error = e.to_string();
                    }
                }
            }

            if attempt < attempts {
                let backoff = Duration::from_millis(config.retry_backoff_ms);
                let deadline = Instant::now() + backoff;
                while Instant::now() < deadline {
                    if closing.load(Ordering::Acquire) {
                        return Err(Error::InvalidState(format!("Connection to {} cancelled", url)));
                    }
                    thread::sleep(BACKOFF_SLICE.min(backoff));
                }
            }
        }

        Err(Error::RadioConnect {
            url: url.to_string(),
            attempts,
            reason: last_error,
        })
    }

    fn try_open(
        url: &str,
        negotiation: Negotiation,
        connector: &dyn TransportConnector,
        factory: &dyn DecoderFactory,
        config: &RadioConfig,
        options: StreamOptions,
    ) -> Result<Self> {
        let connection = connector.connect(url, negotiation, config)?;
        let transport = connection.transport;

        let decoder = match factory.open_stream(connection.reader, connection.content_type.as_deref()) {
            Ok(decoder) => decoder,
            Err(e) => {
                transport.close();
                return Err(e);
            }
        };
        let mut info = decoder.info().clone();
        if info.sample_rate == 0 {
            transport.close();
            return Err(Error::Decode(format!("{} reported a zero sample rate", url)));
        }
        if info.bitrate_kbps.is_none() {
            info.bitrate_kbps = transport.metadata().bitrate_kbps;
        }

        let (core, writer) = StreamCore::new(info.sample_rate, options.buffer_ms, options.equalizer_bands);
        let decoder = match DecoderThread::spawn(decoder, writer, url.to_string()) {
            Ok(decoder) => decoder,
            Err(e) => {
                transport.close();
                return Err(e);
            }
        };

        info!("Radio stream {} open at {} Hz via {:?}", url, info.sample_rate, negotiation);
        Ok(Self {
            url: url.to_string(),
            negotiation,
            info,
            core,
            transport,
            decoder,
            buffered: AtomicBool::new(false),
            tracker: Mutex::new(MetadataTracker::new()),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn negotiation(&self) -> Negotiation {
        self.negotiation
    }

    /// Current transport fill as a percentage
    pub fn fill_percent(&self) -> u8 {
        match self.transport.fill() {
            BufferFill::Percent(p) => p.min(100),
            BufferFill::Bytes(n) => ((n * 100) / PREBUFFER_TARGET_BYTES).min(100) as u8,
        }
    }

    /// Wait for the transport to fill, then expose real audio.
    ///
    /// Polls every `prebuffer_poll_ms`, reporting each new fill level to `progress`, and
    /// stops once the fill exceeds `prebuffer_threshold_percent`, `prebuffer_timeout_ms`
    /// has elapsed, or the stream closed. Returns the last fill level seen.
    pub fn prebuffer(&self, config: &RadioConfig, mut progress: impl FnMut(u8)) -> u8 {
        let started = Instant::now();
        let timeout = Duration::from_millis(config.prebuffer_timeout_ms);
        let poll = Duration::from_millis(config.prebuffer_poll_ms.max(1));
        let mut last_reported = None;
        let mut percent = 0;

        loop {
            if self.core.is_closed() {
                break;
            }
            percent = self.fill_percent();
            if last_reported != Some(percent) {
                progress(percent);
                last_reported = Some(percent);
            }
            if percent > config.prebuffer_threshold_percent
                || started.elapsed() >= timeout
                || self.transport.is_ended()
            {
                break;
            }
            thread::sleep(poll);
        }

        self.buffered.store(true, Ordering::Release);
        debug!(
            "Radio {} buffered at {}% after {:?}",
            self.url,
            percent,
            started.elapsed()
        );
        percent
    }

    pub fn is_buffered(&self) -> bool {
        self.buffered.load(Ordering::Acquire)
    }

    /// Latest station metadata from the transport
    pub fn metadata(&self) -> StationMetadata {
        self.transport.metadata()
    }

    /// Re-read station metadata; returns only values that changed since the last poll
    pub fn poll_metadata(&self) -> Vec<MetadataChange> {
        let current = self.transport.metadata();
        self.tracker.lock().update(&current)
    }
}

impl PcmStream for RadioStream {
    fn id(&self) -> u64 {
        self.core.id()
    }

    fn source(&self) -> StreamSource {
        StreamSource::Radio(self.url.clone())
    }

    fn read(&self, out: &mut [f32]) -> usize {
        if !self.buffered.load(Ordering::Acquire) {
            out.fill(0.0);
            return out.len();
        }
        self.core.read(out)
    }

    fn sample_rate(&self) -> u32 {
        self.core.sample_rate()
    }

    fn elapsed(&self) -> Duration {
        self.core.elapsed()
    }

    fn set_elapsed(&self, _position: Duration) -> Result<Duration> {
        Err(Error::InvalidState("Radio streams cannot seek".to_string()))
    }

    fn duration(&self) -> Option<Duration> {
        None
    }

    fn bitrate_kbps(&self) -> Option<u32> {
        self.transport.metadata().bitrate_kbps.or(self.info.bitrate_kbps)
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
        // Transport first: it unblocks a decoder waiting for bytes
        self.transport.close();
        self.decoder.stop();
        debug!("Closed radio stream {}", self.url);
    }

    fn is_closed(&self) -> bool {
        self.core.is_closed()
    }
}

impl Drop for RadioStream {
    fn drop(&mut self) {
        self.close();
    }
}
