//! # DMP Common Library
//!
//! Shared code for the desktop media player crates:
//! - Error type shared across crates
//! - Player event vocabulary (`PlayerEvent`, `PlayMode`) and the `EventBus`
//! - Configuration file resolution

pub mod config;
pub mod error;
pub mod events;

pub use error::{Error, Result};
pub use events::{EventBus, PlayMode, PlayerEvent};
