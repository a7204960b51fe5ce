//! Audio I/O: decoding capability, device backends and the output device

pub mod backend;
pub mod cpal_backend;
pub mod decoder;
pub mod loopback;
pub mod output;
pub mod types;

pub use backend::{AudioBackend, DeviceStream, OpenRequest, RenderSource};
pub use cpal_backend::{CpalBackend, HostKind};
pub use decoder::{DecoderFactory, PcmDecoder, SourceInfo, SymphoniaDecoderFactory};
pub use loopback::LoopbackBackend;
pub use output::{AudioOutput, OutputSettings};
pub use types::{BitDepth, PcmFormat};
