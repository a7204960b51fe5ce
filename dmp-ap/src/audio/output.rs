//! Audio output
//!
//! Owns the single active device stream and everything the device-facing side of the
//! player needs: bit-depth negotiation (24-bit first, stepping down to 16-bit when the
//! driver refuses), pause/resume/kill, rate reconfiguration, device switching and mute.
//!
//! Mute substitutes a precomputed silence buffer for the rendered audio after the pull,
//! so streams keep advancing (position, metadata) while the device plays nothing.
//!
//! Rate changes and device switches open the replacement stream and start it before the
//! old one is dropped, so there is never a moment without a running device.

use crate::audio::backend::{AudioBackend, DeviceStream, OpenRequest, RenderSource};
use crate::audio::types::{BitDepth, PcmFormat};
use crate::error::{Error, Result};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Samples in the precomputed silence buffer
const SILENCE_SAMPLES: usize = 16384;

/// Device selection for an output
#[derive(Debug, Clone, PartialEq, Default)]
pub struct OutputSettings {
    /// Device name; `None` uses the backend default
    pub device: Option<String>,
    pub preferred_bit_depth: BitDepth,
    pub buffer_frames: Option<u32>,
}

/// Render source wrapper applying mute after the pull
struct MuteGate {
    inner: Arc<dyn RenderSource>,
    muted: AtomicBool,
    silence: Vec<f32>,
}

impl RenderSource for MuteGate {
    fn render(&self, out: &mut [f32]) {
        self.inner.render(out);
        if self.muted.load(Ordering::Acquire) {
            for chunk in out.chunks_mut(self.silence.len()) {
                chunk.copy_from_slice(&self.silence[..chunk.len()]);
            }
        }
    }
}

struct Active {
    stream: Box<dyn DeviceStream>,
    format: PcmFormat,
}

/// The one active output device
pub struct AudioOutput {
    backend: Arc<dyn AudioBackend>,
    gate: Arc<MuteGate>,
    settings: Mutex<OutputSettings>,
    active: Mutex<Option<Active>>,
    paused: AtomicBool,
}

impl AudioOutput {
    /// Open a device at `sample_rate` and start it running.
    ///
    /// Tries the preferred bit depth first; a 24-bit request the driver rejects is retried
    /// at 16-bit before giving up.
    pub fn open(
        backend: Arc<dyn AudioBackend>,
        source: Arc<dyn RenderSource>,
        settings: OutputSettings,
        sample_rate: u32,
    ) -> Result<Self> {
        let gate = Arc::new(MuteGate {
            inner: source,
            muted: AtomicBool::new(false),
            silence: vec![0.0; SILENCE_SAMPLES],
        });

        let output = Self {
            backend,
            gate,
            settings: Mutex::new(settings),
            active: Mutex::new(None),
            paused: AtomicBool::new(false),
        };

        let settings = output.settings.lock().clone();
        let active = output.open_active(&settings, sample_rate)?;
        active.stream.play()?;
        *output.active.lock() = Some(active);
        Ok(output)
    }

    fn open_active(&self, settings: &OutputSettings, sample_rate: u32) -> Result<Active> {
        let mut depths = vec![settings.preferred_bit_depth];
        if settings.preferred_bit_depth == BitDepth::Bits24 {
            depths.push(BitDepth::Bits16);
        }

        let mut last_err = None;
        for depth in depths {
            let request = OpenRequest {
                device: settings.device.clone(),
                format: PcmFormat::stereo(sample_rate, depth),
                buffer_frames: settings.buffer_frames,
            };
            let source: Arc<dyn RenderSource> = self.gate.clone();
            match self.backend.open(&request, source) {
                Ok(stream) => {
                    let format = stream.format();
                    info!(
                        "Output '{}' running at {} Hz, {}",
                        stream.device_name(),
                        format.sample_rate,
                        format.bit_depth
                    );
                    return Ok(Active { stream, format });
                }
                Err(Error::UnsupportedFormat(reason)) => {
                    warn!("{} output rejected ({}), trying next format", depth, reason);
                    last_err = Some(Error::UnsupportedFormat(reason));
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_err.unwrap_or_else(|| Error::AudioOutput("No usable output format".to_string())))
    }

    /// Re-open with new settings or rate; the new stream runs before the old one is dropped
    fn replace(&self, settings: &OutputSettings, sample_rate: u32) -> Result<()> {
        let replacement = self.open_active(settings, sample_rate)?;
        if !self.paused.load(Ordering::Acquire) {
            replacement.stream.play()?;
        }
        let old = self.active.lock().replace(replacement);
        drop(old);
        Ok(())
    }

    /// Names of the backend's output devices
    pub fn list_devices(&self) -> Result<Vec<String>> {
        self.backend.list_devices()
    }

    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    pub fn pause(&self) -> Result<()> {
        if self.paused.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        if let Some(active) = self.active.lock().as_ref() {
            active.stream.pause()?;
        }
        debug!("Output paused");
        Ok(())
    }

    pub fn resume(&self) -> Result<()> {
        if !self.paused.swap(false, Ordering::AcqRel) {
            return Ok(());
        }
        if let Some(active) = self.active.lock().as_ref() {
            active.stream.play()?;
        }
        debug!("Output resumed");
        Ok(())
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Acquire)
    }

    /// Hard stop: close the device. The output is unusable afterwards.
    pub fn kill(&self) {
        if let Some(active) = self.active.lock().take() {
            let _ = active.stream.pause();
            info!("Output '{}' killed", active.stream.device_name());
        }
    }

    pub fn is_running(&self) -> bool {
        self.active.lock().is_some()
    }

    /// Current device sample rate (0 once killed)
    pub fn frequency(&self) -> u32 {
        self.format().map(|f| f.sample_rate).unwrap_or(0)
    }

    /// Reconfigure the device rate.
    ///
    /// Callers schedule this at a safe point (after the silence drain) on the control
    /// thread, never from the render path.
    pub fn set_frequency(&self, sample_rate: u32) -> Result<()> {
        if self.frequency() == sample_rate {
            return Ok(());
        }
        let settings = self.settings.lock().clone();
        self.replace(&settings, sample_rate)?;
        info!("Output rate changed to {} Hz", sample_rate);
        Ok(())
    }

    /// Negotiated format of the running device
    pub fn format(&self) -> Option<PcmFormat> {
        self.active.lock().as_ref().map(|a| a.format)
    }

    pub fn bit_depth(&self) -> Option<BitDepth> {
        self.format().map(|f| f.bit_depth)
    }

    pub fn device_name(&self) -> Option<String> {
        self.active
            .lock()
            .as_ref()
            .map(|a| a.stream.device_name().to_string())
    }

    /// Device callback size in bytes of the negotiated format
    pub fn buffer_size_bytes(&self) -> usize {
        self.active
            .lock()
            .as_ref()
            .map(|a| a.stream.buffer_frames() as usize * a.format.bytes_per_frame())
            .unwrap_or(0)
    }

    pub fn set_muted(&self, muted: bool) {
        self.gate.muted.store(muted, Ordering::Release);
        debug!("Output mute {}", if muted { "on" } else { "off" });
    }

    pub fn is_muted(&self) -> bool {
        self.gate.muted.load(Ordering::Acquire)
    }

    pub fn has_error(&self) -> bool {
        self.active
            .lock()
            .as_ref()
            .map(|a| a.stream.has_error())
            .unwrap_or(false)
    }

    /// Move output to another device; the old device closes once the new one is running
    pub fn switch_device(&self, device: Option<String>) -> Result<()> {
        let mut settings = self.settings.lock().clone();
        settings.device = device;
        let rate = self.frequency();
        if rate == 0 {
            return Err(Error::InvalidState("Output has been killed".to_string()));
        }
        self.replace(&settings, rate)?;
        *self.settings.lock() = settings;
        Ok(())
    }
}

impl Drop for AudioOutput {
    fn drop(&mut self) {
        self.kill();
    }
}
