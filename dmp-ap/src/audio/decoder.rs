//! Audio decoding capability
//!
//! Streams never talk to a codec library directly. They receive a [`DecoderFactory`]
//! and pull interleaved stereo `f32` chunks from the [`PcmDecoder`] it opens, so the
//! decode stage can be swapped for a synthetic one in tests.
//!
//! The production factory is symphonia-backed: MP3, FLAC, AAC/MP4, Vorbis and WAV.
//! Mono sources are duplicated to both channels; sources with more than two channels
//! keep their front pair.

use crate::audio::types::STEREO;
use crate::error::{Error, Result};
use std::io::Read;
use std::path::Path;
use std::time::Duration;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{Decoder, DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader, SeekMode, SeekTo};
use symphonia::core::io::{MediaSource, MediaSourceStream, ReadOnlySource};
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use symphonia::core::units::Time;
use tracing::{debug, warn};

/// Reader handed to the decoder for network sources
pub type StreamReader = Box<dyn Read + Send + Sync>;

/// Properties of an opened source
#[derive(Debug, Clone, PartialEq)]
pub struct SourceInfo {
    /// Native sample rate (streams never resample)
    pub sample_rate: u32,
    /// Channel count before stereo mapping
    pub source_channels: u16,
    /// Total length when the container reports it
    pub duration: Option<Duration>,
    /// Average bitrate in kbit/s when known
    pub bitrate_kbps: Option<u32>,
}

/// An opened decoder producing interleaved stereo `f32`
pub trait PcmDecoder: Send {
    fn info(&self) -> &SourceInfo;

    /// Decode the next chunk. `Ok(None)` signals end of data.
    fn next_chunk(&mut self) -> Result<Option<Vec<f32>>>;

    /// Reposition; returns the position actually reached
    fn seek(&mut self, position: Duration) -> Result<Duration>;
}

/// Opens decoders for files and network byte streams
pub trait DecoderFactory: Send + Sync {
    fn open_file(&self, path: &Path) -> Result<Box<dyn PcmDecoder>>;

    /// Open a non-seekable byte stream. `hint` is a file extension or MIME-ish hint.
    fn open_stream(&self, reader: StreamReader, hint: Option<&str>) -> Result<Box<dyn PcmDecoder>>;
}

/// Symphonia-backed decoder factory
#[derive(Debug, Default, Clone, Copy)]
pub struct SymphoniaDecoderFactory;

impl DecoderFactory for SymphoniaDecoderFactory {
    fn open_file(&self, path: &Path) -> Result<Box<dyn PcmDecoder>> {
        let file = std::fs::File::open(path).map_err(|e| Error::open(path, e))?;
        let file_len = file.metadata().ok().map(|m| m.len());

        let mut hint = Hint::new();
        if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
            hint.with_extension(ext);
        }

        let mut decoder = SymphoniaDecoder::open(Box::new(file), hint)
            .map_err(|e| Error::open(path, e))?;

        // Containers rarely carry a bitrate; derive the average from size and length
        if decoder.info.bitrate_kbps.is_none() {
            if let (Some(len), Some(duration)) = (file_len, decoder.info.duration) {
                let secs = duration.as_secs_f64();
                if secs > 0.0 {
                    decoder.info.bitrate_kbps = Some((len as f64 * 8.0 / secs / 1000.0) as u32);
                }
            }
        }

        debug!(
            "Opened {}: {} Hz, {} ch, {:?}",
            path.display(),
            decoder.info.sample_rate,
            decoder.info.source_channels,
            decoder.info.duration
        );
        Ok(Box::new(decoder))
    }

    fn open_stream(&self, reader: StreamReader, hint: Option<&str>) -> Result<Box<dyn PcmDecoder>> {
        let mut probe_hint = Hint::new();
        match hint {
            Some(h) if h.contains('/') => {
                probe_hint.mime_type(h);
            }
            Some(h) => {
                probe_hint.with_extension(h);
            }
            None => {}
        }
        let decoder = SymphoniaDecoder::open(Box::new(ReadOnlySource::new(reader)), probe_hint)?;
        Ok(Box::new(decoder))
    }
}

/// Decoder over a symphonia format reader
pub struct SymphoniaDecoder {
    format: Box<dyn FormatReader>,
    decoder: Box<dyn Decoder>,
    track_id: u32,
    info: SourceInfo,
    sample_buf: Option<SampleBuffer<f32>>,
}

impl SymphoniaDecoder {
    fn open(source: Box<dyn MediaSource>, hint: Hint) -> Result<Self> {
        let mss = MediaSourceStream::new(source, Default::default());

        let format_opts = FormatOptions {
            enable_gapless: true,
            ..Default::default()
        };

        let probed = symphonia::default::get_probe()
            .format(&hint, mss, &format_opts, &MetadataOptions::default())
            .map_err(|e| Error::Decode(format!("Failed to probe format: {}", e)))?;

        let format = probed.format;

        let track = format
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or_else(|| Error::Decode("No audio track found".to_string()))?;

        let track_id = track.id;
        let params = track.codec_params.clone();

        let sample_rate = params
            .sample_rate
            .ok_or_else(|| Error::Decode("Sample rate not found".to_string()))?;
        let source_channels = params.channels.map(|c| c.count() as u16).unwrap_or(2);
        let duration = params
            .n_frames
            .map(|frames| Duration::from_secs_f64(frames as f64 / sample_rate as f64));

        let decoder = symphonia::default::get_codecs()
            .make(&params, &DecoderOptions::default())
            .map_err(|e| Error::Decode(format!("Failed to create decoder: {}", e)))?;

        Ok(Self {
            format,
            decoder,
            track_id,
            info: SourceInfo {
                sample_rate,
                source_channels,
                duration,
                bitrate_kbps: None,
            },
            sample_buf: None,
        })
    }
}

impl PcmDecoder for SymphoniaDecoder {
    fn info(&self) -> &SourceInfo {
        &self.info
    }

    fn next_chunk(&mut self) -> Result<Option<Vec<f32>>> {
        loop {
            let packet = match self.format.next_packet() {
                Ok(packet) => packet,
                Err(SymphoniaError::IoError(ref e))
                    if e.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    debug!("Reached end of stream");
                    return Ok(None);
                }
                Err(SymphoniaError::ResetRequired) => {
                    self.decoder.reset();
                    continue;
                }
                Err(e) => return Err(Error::Decode(format!("Failed to read packet: {}", e))),
            };

            if packet.track_id() != self.track_id {
                continue;
            }

            let decoded = match self.decoder.decode(&packet) {
                Ok(decoded) => decoded,
                Err(SymphoniaError::DecodeError(e)) => {
                    warn!("Decode error in packet, skipping: {}", e);
                    continue;
                }
                Err(e) => return Err(Error::Decode(e.to_string())),
            };

            let spec = *decoded.spec();
            let channels = spec.channels.count();
            let needed = decoded.capacity() * channels;
            if self.sample_buf.as_ref().map_or(true, |b| b.capacity() < needed) {
                self.sample_buf = Some(SampleBuffer::new(decoded.capacity() as u64, spec));
            }
            if let Some(buf) = self.sample_buf.as_mut() {
                buf.copy_interleaved_ref(decoded);
                return Ok(Some(to_stereo(buf.samples(), channels)));
            }
        }
    }

    fn seek(&mut self, position: Duration) -> Result<Duration> {
        let time = Time::new(position.as_secs(), position.subsec_nanos() as f64 / 1e9);
        let seeked = self
            .format
            .seek(
                SeekMode::Accurate,
                SeekTo::Time {
                    time,
                    track_id: Some(self.track_id),
                },
            )
            .map_err(|e| Error::Decode(format!("Seek failed: {}", e)))?;
        self.decoder.reset();

        let reached = seeked.actual_ts as f64 / self.info.sample_rate as f64;
        Ok(Duration::from_secs_f64(reached.max(0.0)))
    }
}

/// Map interleaved samples with `channels` channels to interleaved stereo
pub fn to_stereo(samples: &[f32], channels: usize) -> Vec<f32> {
    match channels {
        STEREO => samples.to_vec(),
        0 => Vec::new(),
        1 => samples.iter().flat_map(|&s| [s, s]).collect(),
        n => samples
            .chunks_exact(n)
            .flat_map(|frame| [frame[0], frame[1]])
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mono_to_stereo() {
        assert_eq!(to_stereo(&[0.1, 0.2, 0.3], 1), vec![0.1, 0.1, 0.2, 0.2, 0.3, 0.3]);
    }

    #[test]
    fn test_multichannel_keeps_front_pair() {
        let six = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0, 10.0, 11.0, 12.0];
        assert_eq!(to_stereo(&six, 6), vec![1.0, 2.0, 7.0, 8.0]);
    }

    #[test]
    fn test_missing_file_is_open_error() {
        let result = SymphoniaDecoderFactory.open_file(Path::new("/nonexistent/track.flac"));
        assert!(matches!(result, Err(Error::Open { .. })));
    }
}
