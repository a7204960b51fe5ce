//! Device driver capability
//!
//! A backend enumerates output devices and opens a [`DeviceStream`] whose driver thread
//! repeatedly pulls interleaved stereo `f32` from a [`RenderSource`]. Sample encoding
//! for the device (16-bit or 24-bit) happens inside the backend.

use crate::audio::types::PcmFormat;
use crate::error::Result;
use std::sync::Arc;

/// Producer of audio for the device's real-time callback
///
/// `render` runs on the driver's thread. It must fill `out` completely, return promptly
/// and never block on I/O, take contended locks or allocate.
pub trait RenderSource: Send + Sync {
    fn render(&self, out: &mut [f32]);
}

/// What to open
#[derive(Debug, Clone, PartialEq)]
pub struct OpenRequest {
    /// Device name; `None` selects the backend's default device
    pub device: Option<String>,
    pub format: PcmFormat,
    /// Fixed callback size in frames; `None` lets the driver choose
    pub buffer_frames: Option<u32>,
}

/// A running (or paused) device stream; dropping it closes the device
pub trait DeviceStream: Send {
    fn play(&self) -> Result<()>;

    fn pause(&self) -> Result<()>;

    fn format(&self) -> PcmFormat;

    /// Frames the driver requests per callback
    fn buffer_frames(&self) -> u32;

    fn device_name(&self) -> &str;

    /// True once the driver has reported a stream error
    fn has_error(&self) -> bool {
        false
    }
}

/// An audio host (shared mixer, pro-audio host, loopback)
pub trait AudioBackend: Send + Sync {
    fn name(&self) -> &str;

    fn list_devices(&self) -> Result<Vec<String>>;

    /// Open a device stream in the paused state.
    ///
    /// Returns `Error::UnsupportedFormat` when the device rejects the requested sample
    /// format, which lets the caller step down to a lower bit depth.
    fn open(&self, request: &OpenRequest, source: Arc<dyn RenderSource>) -> Result<Box<dyn DeviceStream>>;
}
