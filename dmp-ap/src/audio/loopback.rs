//! Loopback backend
//!
//! A virtual device with no driver thread. Whoever holds the backend decides when the
//! "driver" pulls, which makes the render path deterministic for tests and lets the CLI
//! render a whole track to a file faster than real time.

use crate::audio::backend::{AudioBackend, DeviceStream, OpenRequest, RenderSource};
use crate::audio::types::{BitDepth, PcmFormat};
use crate::error::{Error, Result};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

const DEFAULT_DEVICE: &str = "loopback";
const DEFAULT_BUFFER_FRAMES: u32 = 512;

struct LoopbackDevice {
    id: u64,
    name: String,
    format: PcmFormat,
    buffer_frames: u32,
    source: Arc<dyn RenderSource>,
    playing: AtomicBool,
}

struct LoopbackState {
    devices: Vec<String>,
    rejected_depths: Vec<BitDepth>,
    default_buffer_frames: u32,
    active: Mutex<Option<Arc<LoopbackDevice>>>,
    opened: Mutex<Vec<(String, PcmFormat)>>,
    next_id: AtomicU64,
}

/// Virtual output driven by explicit `pull` calls
#[derive(Clone)]
pub struct LoopbackBackend {
    state: Arc<LoopbackState>,
}

impl Default for LoopbackBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl LoopbackBackend {
    pub fn new() -> Self {
        Self::with_devices(vec![DEFAULT_DEVICE.to_string()])
    }

    /// Backend exposing the given device names (first is the default)
    pub fn with_devices(devices: Vec<String>) -> Self {
        Self {
            state: Arc::new(LoopbackState {
                devices,
                rejected_depths: Vec::new(),
                default_buffer_frames: DEFAULT_BUFFER_FRAMES,
                active: Mutex::new(None),
                opened: Mutex::new(Vec::new()),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Make every device refuse `depth`, like a 16-bit-only driver
    pub fn rejecting(mut self, depth: BitDepth) -> Self {
        if let Some(state) = Arc::get_mut(&mut self.state) {
            state.rejected_depths.push(depth);
        }
        self
    }

    /// Callback size used when the request does not fix one
    pub fn with_buffer_frames(mut self, frames: u32) -> Self {
        if let Some(state) = Arc::get_mut(&mut self.state) {
            state.default_buffer_frames = frames.max(1);
        }
        self
    }

    /// Run one driver callback of `frames` frames. Silence when nothing is playing.
    pub fn pull(&self, frames: usize) -> Vec<f32> {
        let mut out = Vec::new();
        self.pull_into(frames, &mut out);
        out
    }

    /// Like `pull`, reusing the caller's buffer
    pub fn pull_into(&self, frames: usize, out: &mut Vec<f32>) {
        let device = self.state.active.lock().clone();
        let channels = device
            .as_ref()
            .map(|d| d.format.channels as usize)
            .unwrap_or(2);
        out.clear();
        out.resize(frames * channels, 0.0);
        if let Some(device) = device {
            if device.playing.load(Ordering::Acquire) {
                device.source.render(out);
            }
        }
    }

    /// Pull exactly one device buffer
    pub fn pull_buffer(&self) -> Vec<f32> {
        let frames = self.active_buffer_frames().unwrap_or(self.state.default_buffer_frames);
        self.pull(frames as usize)
    }

    pub fn active_format(&self) -> Option<PcmFormat> {
        self.state.active.lock().as_ref().map(|d| d.format)
    }

    pub fn active_device(&self) -> Option<String> {
        self.state.active.lock().as_ref().map(|d| d.name.clone())
    }

    pub fn active_buffer_frames(&self) -> Option<u32> {
        self.state.active.lock().as_ref().map(|d| d.buffer_frames)
    }

    pub fn is_playing(&self) -> bool {
        self.state
            .active
            .lock()
            .as_ref()
            .map(|d| d.playing.load(Ordering::Acquire))
            .unwrap_or(false)
    }

    /// Every successful open, in order
    pub fn opened(&self) -> Vec<(String, PcmFormat)> {
        self.state.opened.lock().clone()
    }
}

impl AudioBackend for LoopbackBackend {
    fn name(&self) -> &str {
        "loopback"
    }

    fn list_devices(&self) -> Result<Vec<String>> {
        Ok(self.state.devices.clone())
    }

    fn open(&self, request: &OpenRequest, source: Arc<dyn RenderSource>) -> Result<Box<dyn DeviceStream>> {
        let name = match &request.device {
            Some(name) if self.state.devices.contains(name) => name.clone(),
            Some(name) => {
                return Err(Error::AudioOutput(format!("Device '{}' not found", name)));
            }
            None => self
                .state
                .devices
                .first()
                .cloned()
                .ok_or_else(|| Error::AudioOutput("No output devices".to_string()))?,
        };

        if self.state.rejected_depths.contains(&request.format.bit_depth) {
            return Err(Error::UnsupportedFormat(format!(
                "{} rejected by {}",
                request.format.bit_depth, name
            )));
        }

        let device = Arc::new(LoopbackDevice {
            id: self.state.next_id.fetch_add(1, Ordering::Relaxed),
            name: name.clone(),
            format: request.format,
            buffer_frames: request.buffer_frames.unwrap_or(self.state.default_buffer_frames),
            source,
            playing: AtomicBool::new(false),
        });

        debug!("Loopback device '{}' opened at {:?}", name, request.format);
        self.state.opened.lock().push((name, request.format));
        *self.state.active.lock() = Some(Arc::clone(&device));

        Ok(Box::new(LoopbackStream {
            device,
            state: Arc::clone(&self.state),
        }))
    }
}

struct LoopbackStream {
    device: Arc<LoopbackDevice>,
    state: Arc<LoopbackState>,
}

impl DeviceStream for LoopbackStream {
    fn play(&self) -> Result<()> {
        self.device.playing.store(true, Ordering::Release);
        Ok(())
    }

    fn pause(&self) -> Result<()> {
        self.device.playing.store(false, Ordering::Release);
        Ok(())
    }

    fn format(&self) -> PcmFormat {
        self.device.format
    }

    fn buffer_frames(&self) -> u32 {
        self.device.buffer_frames
    }

    fn device_name(&self) -> &str {
        &self.device.name
    }
}

impl Drop for LoopbackStream {
    fn drop(&mut self) {
        let mut active = self.state.active.lock();
        if active.as_ref().map(|d| d.id) == Some(self.device.id) {
            *active = None;
        }
    }
}
