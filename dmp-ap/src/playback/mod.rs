//! Playback orchestration
//!
//! - `render`: what the device pulls (current stream, silence drain, spectrum capture)
//! - `worker`: control thread reacting to render notifications
//! - `player`: the public [`Player`] control surface

pub mod player;
mod render;
mod worker;

pub use player::{Diagnostics, EqualizerState, Player, TrackProvider};
