//! Speech practice audio core: delayed auditory feedback, a beat
//! scheduler, a pausable recorder and a spectrum renderer, plus the
//! terminal front end that drives them.

pub mod audio;
pub mod cli;
pub mod color;
pub mod config;
pub mod display;
pub mod error;
pub mod events;
pub mod metronome;
pub mod recording;
pub mod visualizer;

pub use cli::Args;
pub use config::Config;
pub use error::{CaptureError, ParameterError, RecordingError};
