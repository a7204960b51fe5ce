//! Synthetic collaborators
//!
//! `FakeDecoderFactory` decodes any existing file to a cosine tone (first sample at full
//! tone amplitude) and counts opens, so preload hits are observable. `ScriptedConnector`
//! fails a set number of connection attempts, then hands out a transport whose fill and
//! metadata the test controls.

use dmp_ap::audio::decoder::{DecoderFactory, PcmDecoder, SourceInfo, StreamReader};
use dmp_ap::config::RadioConfig;
use dmp_ap::error::{Error, Result};
use dmp_ap::stream::transport::{BufferFill, Negotiation, RadioConnection, RadioTransport, TransportConnector};
use dmp_ap::stream::StationMetadata;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Peak of the synthetic tone
pub const TONE_AMPLITUDE: f32 = 0.25;

const TONE_HZ: f64 = 440.0;
const CHUNK_FRAMES: u64 = 1024;

pub struct ToneDecoder {
    info: SourceInfo,
    position: u64,
    total: Option<u64>,
}

impl ToneDecoder {
    fn new(sample_rate: u32, duration: Option<Duration>) -> Self {
        Self {
            info: SourceInfo {
                sample_rate,
                source_channels: 2,
                duration,
                bitrate_kbps: Some(1411),
            },
            position: 0,
            total: duration.map(|d| (d.as_secs_f64() * sample_rate as f64) as u64),
        }
    }
}

impl PcmDecoder for ToneDecoder {
    fn info(&self) -> &SourceInfo {
        &self.info
    }

    fn next_chunk(&mut self) -> Result<Option<Vec<f32>>> {
        let remaining = match self.total {
            Some(total) if self.position >= total => return Ok(None),
            Some(total) => (total - self.position).min(CHUNK_FRAMES),
            None => CHUNK_FRAMES,
        };
        let rate = self.info.sample_rate as f64;
        let mut chunk = Vec::with_capacity(remaining as usize * 2);
        for n in self.position..self.position + remaining {
            let value = (TONE_AMPLITUDE as f64 * (2.0 * std::f64::consts::PI * TONE_HZ * n as f64 / rate).cos()) as f32;
            chunk.push(value);
            chunk.push(value);
        }
        self.position += remaining;
        Ok(Some(chunk))
    }

    fn seek(&mut self, position: Duration) -> Result<Duration> {
        let frame = (position.as_secs_f64() * self.info.sample_rate as f64) as u64;
        self.position = self.total.map(|t| frame.min(t)).unwrap_or(frame);
        Ok(Duration::from_secs_f64(self.position as f64 / self.info.sample_rate as f64))
    }
}

/// Decoder factory producing tones; counts every open
pub struct FakeDecoderFactory {
    default_rate: u32,
    duration: Option<Duration>,
    rates: Mutex<HashMap<PathBuf, u32>>,
    file_opens: AtomicUsize,
    stream_opens: AtomicUsize,
    opened_paths: Mutex<Vec<PathBuf>>,
}

impl FakeDecoderFactory {
    pub fn new(default_rate: u32, duration: Duration) -> Self {
        Self {
            default_rate,
            duration: Some(duration),
            rates: Mutex::new(HashMap::new()),
            file_opens: AtomicUsize::new(0),
            stream_opens: AtomicUsize::new(0),
            opened_paths: Mutex::new(Vec::new()),
        }
    }

    /// Decode `path` at `rate` instead of the default
    pub fn set_rate(&self, path: &Path, rate: u32) {
        self.rates.lock().insert(path.to_path_buf(), rate);
    }

    pub fn file_opens(&self) -> usize {
        self.file_opens.load(Ordering::SeqCst)
    }

    pub fn stream_opens(&self) -> usize {
        self.stream_opens.load(Ordering::SeqCst)
    }

    pub fn opens_of(&self, path: &Path) -> usize {
        self.opened_paths.lock().iter().filter(|p| p.as_path() == path).count()
    }
}

impl DecoderFactory for FakeDecoderFactory {
    fn open_file(&self, path: &Path) -> Result<Box<dyn PcmDecoder>> {
        self.file_opens.fetch_add(1, Ordering::SeqCst);
        self.opened_paths.lock().push(path.to_path_buf());
        if path.extension().and_then(|e| e.to_str()) == Some("bad") {
            return Err(Error::open(path, "unsupported container"));
        }
        let rate = self.rates.lock().get(path).copied().unwrap_or(self.default_rate);
        Ok(Box::new(ToneDecoder::new(rate, self.duration)))
    }

    fn open_stream(&self, _reader: StreamReader, _hint: Option<&str>) -> Result<Box<dyn PcmDecoder>> {
        self.stream_opens.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(ToneDecoder::new(self.default_rate, None)))
    }
}

/// Transport whose state the test drives
#[derive(Default)]
pub struct ScriptedTransport {
    pub fill_percent: Mutex<u8>,
    pub metadata: Mutex<StationMetadata>,
    pub ended: AtomicBool,
    pub closed: AtomicBool,
}

impl RadioTransport for ScriptedTransport {
    fn fill(&self) -> BufferFill {
        BufferFill::Percent(*self.fill_percent.lock())
    }

    fn metadata(&self) -> StationMetadata {
        self.metadata.lock().clone()
    }

    fn is_ended(&self) -> bool {
        self.ended.load(Ordering::SeqCst)
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// Connector failing the first `failures` attempts
pub struct ScriptedConnector {
    failures: usize,
    attempts: AtomicUsize,
    negotiations: Mutex<Vec<Negotiation>>,
    transport: Arc<ScriptedTransport>,
}

impl ScriptedConnector {
    pub fn failing(failures: usize) -> Self {
        Self {
            failures,
            attempts: AtomicUsize::new(0),
            negotiations: Mutex::new(Vec::new()),
            transport: Arc::new(ScriptedTransport::default()),
        }
    }

    pub fn unreachable() -> Self {
        Self::failing(usize::MAX)
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn negotiations(&self) -> Vec<Negotiation> {
        self.negotiations.lock().clone()
    }

    pub fn transport(&self) -> Arc<ScriptedTransport> {
        Arc::clone(&self.transport)
    }
}

impl TransportConnector for ScriptedConnector {
    fn connect(&self, url: &str, negotiation: Negotiation, _config: &RadioConfig) -> Result<RadioConnection> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
        self.negotiations.lock().push(negotiation);
        if attempt < self.failures {
            return Err(Error::Network(format!("{} refused the connection", url)));
        }
        Ok(RadioConnection {
            transport: self.transport.clone(),
            reader: Box::new(std::io::empty()),
            content_type: Some("audio/mpeg".to_string()),
        })
    }
}
