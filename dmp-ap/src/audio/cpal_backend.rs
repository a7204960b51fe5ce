//! cpal device backend
//!
//! Two host kinds:
//! - `Shared`: the platform's default mixer host (WASAPI shared, CoreAudio, ALSA/Pulse)
//! - `ProAudio`: a low-latency host (JACK or ASIO) when cpal was built with one, falling
//!   back to the default host otherwise
//!
//! `cpal::Stream` is not `Send` on every platform, so each opened device lives on its own
//! "audio-device" thread that builds the stream, owns it and obeys play/pause/close
//! commands. The driver's callback converts the rendered `f32` to the device encoding
//! (`i16` for 16-bit, left-justified `i32` for 24-bit) using a scratch buffer allocated
//! before the stream starts.

use crate::audio::backend::{AudioBackend, DeviceStream, OpenRequest, RenderSource};
use crate::audio::types::{convert_to_i16, convert_to_i24, BitDepth, PcmFormat};
use crate::error::{Error, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleFormat, Stream, StreamConfig};
use crossbeam_channel::{bounded, Receiver, Sender};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, error, info, warn};

/// Frames assumed per callback until the driver reports its real size
const ASSUMED_BUFFER_FRAMES: u32 = 512;
/// Minimum scratch size (frames) allocated for callback conversion
const MIN_SCRATCH_FRAMES: usize = 8192;

/// Which audio host to drive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum HostKind {
    #[default]
    Shared,
    ProAudio,
}

/// cpal-backed device access
pub struct CpalBackend {
    host_id: cpal::HostId,
    name: String,
}

impl CpalBackend {
    pub fn new(kind: HostKind) -> Self {
        let default_id = cpal::default_host().id();
        let host_id = match kind {
            HostKind::Shared => default_id,
            HostKind::ProAudio => cpal::available_hosts()
                .into_iter()
                .find(|id| matches!(id.name(), "JACK" | "ASIO"))
                .unwrap_or_else(|| {
                    warn!(
                        "No pro-audio host compiled in, using {} instead",
                        default_id.name()
                    );
                    default_id
                }),
        };
        info!("Audio host: {}", host_id.name());
        Self {
            host_id,
            name: host_id.name().to_string(),
        }
    }

    fn host(&self) -> Result<cpal::Host> {
        cpal::host_from_id(self.host_id)
            .map_err(|e| Error::AudioOutput(format!("Host {} unavailable: {}", self.name, e)))
    }
}

impl AudioBackend for CpalBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn list_devices(&self) -> Result<Vec<String>> {
        let host = self.host()?;
        let devices: Vec<String> = host
            .output_devices()
            .map_err(|e| Error::AudioOutput(format!("Failed to enumerate devices: {}", e)))?
            .filter_map(|device| device.name().ok())
            .collect();

        debug!("Found {} output devices", devices.len());
        Ok(devices)
    }

    fn open(&self, request: &OpenRequest, source: Arc<dyn RenderSource>) -> Result<Box<dyn DeviceStream>> {
        let (command_tx, command_rx) = bounded::<DeviceCommand>(8);
        let (ready_tx, ready_rx) = bounded::<Result<String>>(1);
        let error_flag = Arc::new(AtomicBool::new(false));
        let callback_frames = Arc::new(AtomicU32::new(
            request.buffer_frames.unwrap_or(ASSUMED_BUFFER_FRAMES),
        ));

        let ctx = DeviceThreadContext {
            host_id: self.host_id,
            request: request.clone(),
            source,
            error_flag: Arc::clone(&error_flag),
            callback_frames: Arc::clone(&callback_frames),
        };

        let thread = thread::Builder::new()
            .name("audio-device".into())
            .spawn(move || device_thread(ctx, command_rx, ready_tx))
            .map_err(|e| Error::AudioOutput(format!("Failed to spawn device thread: {}", e)))?;

        let device_name = match ready_rx.recv() {
            Ok(Ok(name)) => name,
            Ok(Err(e)) => {
                let _ = thread.join();
                return Err(e);
            }
            Err(_) => {
                let _ = thread.join();
                return Err(Error::AudioOutput("Device thread exited during open".to_string()));
            }
        };

        Ok(Box::new(CpalStream {
            commands: command_tx,
            thread: Some(thread),
            format: request.format,
            device_name,
            error_flag,
            callback_frames,
        }))
    }
}

enum DeviceCommand {
    Play(Sender<Result<()>>),
    Pause(Sender<Result<()>>),
    Close,
}

struct DeviceThreadContext {
    host_id: cpal::HostId,
    request: OpenRequest,
    source: Arc<dyn RenderSource>,
    error_flag: Arc<AtomicBool>,
    callback_frames: Arc<AtomicU32>,
}

fn device_thread(ctx: DeviceThreadContext, commands: Receiver<DeviceCommand>, ready: Sender<Result<String>>) {
    let (stream, name) = match build_stream(&ctx) {
        Ok(built) => built,
        Err(e) => {
            let _ = ready.send(Err(e));
            return;
        }
    };
    if ready.send(Ok(name.clone())).is_err() {
        return;
    }

    while let Ok(command) = commands.recv() {
        match command {
            DeviceCommand::Play(reply) => {
                let result = stream
                    .play()
                    .map_err(|e| Error::AudioOutput(format!("Failed to start stream: {}", e)));
                let _ = reply.send(result);
            }
            DeviceCommand::Pause(reply) => {
                let result = stream
                    .pause()
                    .map_err(|e| Error::AudioOutput(format!("Failed to pause stream: {}", e)));
                let _ = reply.send(result);
            }
            DeviceCommand::Close => break,
        }
    }

    let _ = stream.pause();
    drop(stream);
    debug!("Device '{}' closed", name);
}

fn find_device(host: &cpal::Host, name: Option<&str>) -> Result<Device> {
    match name {
        Some(name) => {
            let mut devices = host
                .output_devices()
                .map_err(|e| Error::AudioOutput(format!("Failed to enumerate devices: {}", e)))?;
            devices
                .find(|d| d.name().ok().as_deref() == Some(name))
                .ok_or_else(|| Error::AudioOutput(format!("Device '{}' not found", name)))
        }
        None => host
            .default_output_device()
            .ok_or_else(|| Error::AudioOutput("No default output device found".to_string())),
    }
}

/// Pick the device sample format for a bit depth, or report it unsupported
fn negotiate_format(device: &Device, format: &PcmFormat) -> Result<SampleFormat> {
    let configs: Vec<_> = device
        .supported_output_configs()
        .map_err(|e| Error::AudioOutput(format!("Failed to get device configs: {}", e)))?
        .filter(|c| {
            c.channels() == format.channels
                && c.min_sample_rate().0 <= format.sample_rate
                && c.max_sample_rate().0 >= format.sample_rate
        })
        .collect();

    if configs.is_empty() {
        return Err(Error::AudioOutput(format!(
            "Device has no stereo configuration at {} Hz",
            format.sample_rate
        )));
    }

    let supports = |fmt: SampleFormat| configs.iter().any(|c| c.sample_format() == fmt);
    match format.bit_depth {
        BitDepth::Bits24 if supports(SampleFormat::I32) => Ok(SampleFormat::I32),
        BitDepth::Bits24 => Err(Error::UnsupportedFormat(
            "device has no 24-bit (32-bit container) mode".to_string(),
        )),
        BitDepth::Bits16 if supports(SampleFormat::I16) => Ok(SampleFormat::I16),
        // Mixer-only hosts accept float; 16-bit content is carried in it unchanged
        BitDepth::Bits16 if supports(SampleFormat::F32) => Ok(SampleFormat::F32),
        BitDepth::Bits16 => Err(Error::UnsupportedFormat(
            "device has no 16-bit or float mode".to_string(),
        )),
    }
}

fn build_stream(ctx: &DeviceThreadContext) -> Result<(Stream, String)> {
    let host = cpal::host_from_id(ctx.host_id)
        .map_err(|e| Error::AudioOutput(format!("Host unavailable: {}", e)))?;
    let device = find_device(&host, ctx.request.device.as_deref())?;
    let name = device.name().unwrap_or_else(|_| "Unknown".to_string());

    let format = ctx.request.format;
    let sample_format = negotiate_format(&device, &format)?;

    let mut config = StreamConfig {
        channels: format.channels,
        sample_rate: cpal::SampleRate(format.sample_rate),
        buffer_size: cpal::BufferSize::Default,
    };
    if let Some(frames) = ctx.request.buffer_frames {
        config.buffer_size = cpal::BufferSize::Fixed(frames);
    }

    debug!(
        "Opening '{}': {} Hz, {} ch, {:?}, buffer {:?}",
        name, format.sample_rate, format.channels, sample_format, config.buffer_size
    );

    let channels = format.channels as usize;
    let scratch_frames = MIN_SCRATCH_FRAMES.max(ctx.request.buffer_frames.unwrap_or(0) as usize);
    let mut scratch = vec![0.0f32; scratch_frames * channels];

    let source = Arc::clone(&ctx.source);
    let callback_frames = Arc::clone(&ctx.callback_frames);
    let error_flag = Arc::clone(&ctx.error_flag);
    let on_error = move |err: cpal::StreamError| {
        error!("Audio stream error: {}", err);
        error_flag.store(true, Ordering::SeqCst);
    };

    let stream = match sample_format {
        SampleFormat::I16 => device.build_output_stream(
            &config,
            move |data: &mut [i16], _: &cpal::OutputCallbackInfo| {
                callback_frames.store((data.len() / channels) as u32, Ordering::Relaxed);
                for chunk in data.chunks_mut(scratch.len()) {
                    let pcm = &mut scratch[..chunk.len()];
                    source.render(pcm);
                    convert_to_i16(pcm, chunk);
                }
            },
            on_error,
            None,
        ),
        SampleFormat::I32 => device.build_output_stream(
            &config,
            move |data: &mut [i32], _: &cpal::OutputCallbackInfo| {
                callback_frames.store((data.len() / channels) as u32, Ordering::Relaxed);
                for chunk in data.chunks_mut(scratch.len()) {
                    let pcm = &mut scratch[..chunk.len()];
                    source.render(pcm);
                    convert_to_i24(pcm, chunk);
                }
            },
            on_error,
            None,
        ),
        _ => device.build_output_stream(
            &config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                callback_frames.store((data.len() / channels) as u32, Ordering::Relaxed);
                source.render(data);
                for s in data.iter_mut() {
                    *s = s.clamp(-1.0, 1.0);
                }
            },
            on_error,
            None,
        ),
    }
    .map_err(|e| match e {
        cpal::BuildStreamError::StreamConfigNotSupported => {
            Error::UnsupportedFormat(format!("{} at {} Hz", format.bit_depth, format.sample_rate))
        }
        other => Error::AudioOutput(format!("Failed to build stream: {}", other)),
    })?;

    // Streams start paused until the owner calls play
    let _ = stream.pause();
    info!("Audio device '{}' opened ({}, {} Hz)", name, format.bit_depth, format.sample_rate);
    Ok((stream, name))
}

struct CpalStream {
    commands: Sender<DeviceCommand>,
    thread: Option<JoinHandle<()>>,
    format: PcmFormat,
    device_name: String,
    error_flag: Arc<AtomicBool>,
    callback_frames: Arc<AtomicU32>,
}

impl CpalStream {
    fn request(&self, make: impl FnOnce(Sender<Result<()>>) -> DeviceCommand) -> Result<()> {
        let (reply_tx, reply_rx) = bounded(1);
        self.commands
            .send(make(reply_tx))
            .map_err(|_| Error::AudioOutput("Device thread is gone".to_string()))?;
        reply_rx
            .recv()
            .map_err(|_| Error::AudioOutput("Device thread is gone".to_string()))?
    }
}

impl DeviceStream for CpalStream {
    fn play(&self) -> Result<()> {
        self.request(DeviceCommand::Play)
    }

    fn pause(&self) -> Result<()> {
        self.request(DeviceCommand::Pause)
    }

    fn format(&self) -> PcmFormat {
        self.format
    }

    fn buffer_frames(&self) -> u32 {
        self.callback_frames.load(Ordering::Relaxed)
    }

    fn device_name(&self) -> &str {
        &self.device_name
    }

    fn has_error(&self) -> bool {
        self.error_flag.load(Ordering::SeqCst)
    }
}

impl Drop for CpalStream {
    fn drop(&mut self) {
        let _ = self.commands.send(DeviceCommand::Close);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}
