//! Radio transports
//!
//! A transport delivers a station's encoded bytes into a local buffer on its own network
//! thread. The radio stream's decoder reads from that buffer, the pre-buffer phase polls
//! its fill level, and the metadata poll reads the values the transport has collected
//! from response headers and in-band ICY metadata.
//!
//! Two negotiations are tried for every station: `Icy` asks for in-band metadata
//! (`Icy-MetaData: 1`), `Plain` requests the bare audio stream.

use super::metadata::StationMetadata;
use crate::audio::decoder::StreamReader;
use crate::config::RadioConfig;
use crate::error::Result;
use parking_lot::Mutex;
use reqwest::header::HeaderMap;
use ringbuf::{traits::*, HeapCons, HeapProd, HeapRb};
use std::io::Read;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, info, trace, warn};

/// Encoded bytes held ahead of the decoder
const NETWORK_BUFFER_BYTES: usize = 64 * 1024;

const READ_CHUNK: usize = 8192;

/// Sleep while the buffer is full (network side) or empty (decoder side)
const POLL_WAIT: Duration = Duration::from_millis(5);

/// Stream acquisition strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Negotiation {
    /// Request in-band ICY metadata
    Icy,
    /// Plain HTTP audio stream
    Plain,
}

impl Negotiation {
    /// Order in which negotiations are attempted
    pub const ALL: [Negotiation; 2] = [Negotiation::Icy, Negotiation::Plain];
}

/// How full a transport's buffer is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferFill {
    Percent(u8),
    /// Transports that only know how many bytes they hold
    Bytes(usize),
}

/// A connected station
pub trait RadioTransport: Send + Sync {
    fn fill(&self) -> BufferFill;

    fn metadata(&self) -> StationMetadata;

    /// True once the server closed the stream or the connection failed
    fn is_ended(&self) -> bool;

    fn close(&self);
}

/// Result of a successful connection
pub struct RadioConnection {
    pub transport: Arc<dyn RadioTransport>,
    /// Encoded audio for the decoder
    pub reader: StreamReader,
    /// MIME type the server announced
    pub content_type: Option<String>,
}

/// Opens transports; swapped for a scripted connector in tests
pub trait TransportConnector: Send + Sync {
    fn connect(&self, url: &str, negotiation: Negotiation, config: &RadioConfig) -> Result<RadioConnection>;
}

/// HTTP(S) connector backed by reqwest's blocking client
#[derive(Debug, Default, Clone, Copy)]
pub struct HttpConnector;

impl TransportConnector for HttpConnector {
    fn connect(&self, url: &str, negotiation: Negotiation, config: &RadioConfig) -> Result<RadioConnection> {
        let client = reqwest::blocking::Client::builder()
            .user_agent(config.user_agent.clone())
            .connect_timeout(Duration::from_millis(config.connect_timeout_ms))
            .timeout(None::<Duration>)
            .build()?;

        let mut request = client.get(url);
        if negotiation == Negotiation::Icy {
            request = request.header("Icy-MetaData", "1");
        }

        let response = request.send()?.error_for_status()?;
        let headers = response.headers().clone();
        let content_type = header_str(&headers, "content-type").map(|s| s.to_string());

        let metaint = match negotiation {
            Negotiation::Icy => header_str(&headers, "icy-metaint").and_then(|v| v.trim().parse::<usize>().ok()),
            Negotiation::Plain => None,
        };

        let metadata = StationMetadata {
            name: header_str(&headers, "icy-name").map(|s| s.trim().to_string()),
            genre: header_str(&headers, "icy-genre").map(|s| s.trim().to_string()),
            bitrate_kbps: header_str(&headers, "icy-br").and_then(parse_bitrate),
            title: None,
        };

        info!(
            "Connected to {} ({:?}, {}, metaint {:?})",
            url,
            negotiation,
            content_type.as_deref().unwrap_or("unknown type"),
            metaint
        );

        let (transport, reader) = HttpTransport::start(Box::new(response), metaint.filter(|m| *m > 0), metadata)?;
        Ok(RadioConnection {
            transport,
            reader,
            content_type,
        })
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// "128" or "128,128" (some servers repeat the value)
fn parse_bitrate(value: &str) -> Option<u32> {
    value.split(',').next()?.trim().parse().ok()
}

struct TransportShared {
    closed: AtomicBool,
    ended: AtomicBool,
    buffered: AtomicUsize,
    metadata: Mutex<StationMetadata>,
}

/// Byte pump from an HTTP response into the local buffer
pub struct HttpTransport {
    shared: Arc<TransportShared>,
}

impl HttpTransport {
    fn start(
        response: Box<dyn Read + Send>,
        metaint: Option<usize>,
        metadata: StationMetadata,
    ) -> Result<(Arc<dyn RadioTransport>, StreamReader)> {
        let shared = Arc::new(TransportShared {
            closed: AtomicBool::new(false),
            ended: AtomicBool::new(false),
            buffered: AtomicUsize::new(0),
            metadata: Mutex::new(metadata),
        });
        let (producer, consumer) = HeapRb::<u8>::new(NETWORK_BUFFER_BYTES).split();

        let pump_shared = Arc::clone(&shared);
        // Not joined on close: a stalled server can hold the blocking read; the thread
        // exits on its next wake-up once `closed` is set.
        thread::Builder::new()
            .name("radio-net".into())
            .spawn(move || pump(response, metaint.map(IcyParser::new), producer, pump_shared))?;

        let reader = TransportReader {
            consumer: Mutex::new(consumer),
            shared: Arc::clone(&shared),
        };
        Ok((Arc::new(HttpTransport { shared }), Box::new(reader)))
    }
}

impl RadioTransport for HttpTransport {
    fn fill(&self) -> BufferFill {
        let buffered = self.shared.buffered.load(Ordering::Relaxed);
        BufferFill::Percent(((buffered * 100) / NETWORK_BUFFER_BYTES).min(100) as u8)
    }

    fn metadata(&self) -> StationMetadata {
        self.shared.metadata.lock().clone()
    }

    fn is_ended(&self) -> bool {
        self.shared.ended.load(Ordering::Acquire)
    }

    fn close(&self) {
        if !self.shared.closed.swap(true, Ordering::AcqRel) {
            debug!("Radio transport closed");
        }
    }
}

impl Drop for HttpTransport {
    fn drop(&mut self) {
        self.close();
    }
}

fn pump(
    mut response: Box<dyn Read + Send>,
    mut parser: Option<IcyParser>,
    mut producer: HeapProd<u8>,
    shared: Arc<TransportShared>,
) {
    let mut buf = [0u8; READ_CHUNK];
    let mut audio = Vec::with_capacity(READ_CHUNK);

    'outer: while !shared.closed.load(Ordering::Acquire) {
        let n = match response.read(&mut buf) {
            Ok(0) => {
                info!("Radio server closed the stream");
                break;
            }
            Ok(n) => n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => {
                warn!("Radio stream read failed: {}", e);
                break;
            }
        };

        audio.clear();
        match parser.as_mut() {
            Some(parser) => {
                if let Some(title) = parser.feed(&buf[..n], &mut audio) {
                    trace!("ICY stream title: {}", title);
                    shared.metadata.lock().title = Some(title);
                }
            }
            None => audio.extend_from_slice(&buf[..n]),
        }

        let mut offset = 0;
        while offset < audio.len() {
            if shared.closed.load(Ordering::Acquire) {
                break 'outer;
            }
            let pushed = producer.push_slice(&audio[offset..]);
            shared.buffered.fetch_add(pushed, Ordering::Relaxed);
            offset += pushed;
            if offset < audio.len() {
                thread::sleep(POLL_WAIT);
            }
        }
    }

    shared.ended.store(true, Ordering::Release);
}

/// Decoder-side reader over the transport buffer; blocks until data, end or close
struct TransportReader {
    consumer: Mutex<HeapCons<u8>>,
    shared: Arc<TransportShared>,
}

impl Read for TransportReader {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        loop {
            let n = self.consumer.lock().pop_slice(buf);
            if n > 0 {
                self.shared.buffered.fetch_sub(n, Ordering::Relaxed);
                return Ok(n);
            }
            if self.shared.closed.load(Ordering::Acquire) {
                return Ok(0);
            }
            // Producer sets `ended` after its last push; check emptiness once more
            if self.shared.ended.load(Ordering::Acquire) && self.consumer.lock().is_empty() {
                return Ok(0);
            }
            thread::sleep(POLL_WAIT);
        }
    }
}

enum IcyState {
    Audio(usize),
    Length,
    Meta(usize),
}

/// Splits ICY metadata blocks out of an audio byte stream.
///
/// After every `metaint` audio bytes the server inserts one length byte (`len * 16`)
/// followed by that many bytes of `StreamTitle='...';` text.
pub(crate) struct IcyParser {
    metaint: usize,
    state: IcyState,
    meta: Vec<u8>,
}

impl IcyParser {
    pub(crate) fn new(metaint: usize) -> Self {
        Self {
            metaint,
            state: IcyState::Audio(metaint),
            meta: Vec::new(),
        }
    }

    /// Append the audio part of `input` to `audio`; returns the last title seen
    pub(crate) fn feed(&mut self, input: &[u8], audio: &mut Vec<u8>) -> Option<String> {
        let mut title = None;
        let mut i = 0;
        while i < input.len() {
            match self.state {
                IcyState::Audio(remaining) => {
                    let n = remaining.min(input.len() - i);
                    audio.extend_from_slice(&input[i..i + n]);
                    i += n;
                    self.state = if remaining == n {
                        IcyState::Length
                    } else {
                        IcyState::Audio(remaining - n)
                    };
                }
                IcyState::Length => {
                    let len = input[i] as usize * 16;
                    i += 1;
                    self.meta.clear();
                    self.state = if len == 0 {
                        IcyState::Audio(self.metaint)
                    } else {
                        IcyState::Meta(len)
                    };
                }
                IcyState::Meta(remaining) => {
                    let n = remaining.min(input.len() - i);
                    self.meta.extend_from_slice(&input[i..i + n]);
                    i += n;
                    if remaining == n {
                        if let Some(t) = parse_stream_title(&self.meta) {
                            title = Some(t);
                        }
                        self.state = IcyState::Audio(self.metaint);
                    } else {
                        self.state = IcyState::Meta(remaining - n);
                    }
                }
            }
        }
        title
    }
}

fn parse_stream_title(block: &[u8]) -> Option<String> {
    let text = String::from_utf8_lossy(block);
    let text = text.trim_end_matches('\0');
    let start = text.find("StreamTitle='")? + "StreamTitle='".len();
    let rest = &text[start..];
    let end = rest.find("';").unwrap_or(rest.len());
    let title = rest[..end].trim();
    if title.is_empty() {
        None
    } else {
        Some(title.to_string())
    }
}
