//! Multi-channel music for a single buzzer on small microcontrollers.
//!
//! A [`Song`] is a compact byte-code with one track per channel. The
//! [`MusicState`] scheduler decodes every track one tick at a time and tells a
//! [`ToneBackend`] which notes change. The shipped backend,
//! [`MultiplexBackend`], gives each channel a timer driven [`Oscillator`] and
//! mixes all of them into the duty cycle of one PWM output with an
//! [`OutputMixer`].
//!
//! The crate is `no_std` without the default `std` feature, which adds the
//! offline [`SongBuilder`] encoder, the [`midi`] converter and the
//! [`Renderer`] preview.
#![cfg_attr(not(feature = "std"), no_std)]

mod consts;
#[cfg(feature = "std")]
mod encoder;
#[cfg(feature = "std")]
pub mod midi;
mod mixer;
mod music;
mod oscillator;
pub mod pitch;
#[cfg(feature = "std")]
mod render;
mod song;
pub mod targets;
mod track;

pub use consts::{DEFAULT_VOLUME, PLAYABLE_NOTES, TEMPO_ADJUST, TICKS_PER_BEAT, TICK_SLICE_US};
#[cfg(feature = "std")]
pub use encoder::{SongBuilder, TrackBuilder};
pub use mixer::{check_levels, DutyRegister, MultiplexBackend, OutputMixer};
pub use music::{play, BusyWait, MusicState, Pacer, ToneBackend};
pub use oscillator::{ChannelConfig, ChannelTimer, Oscillator};
#[cfg(feature = "std")]
pub use render::Renderer;
pub use song::{Error, Song};
pub use targets::Target;
pub use track::{Event, Note, Track, TrackEvents};
