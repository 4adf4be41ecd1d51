mod surface;
pub mod terminal;

pub use surface::TerminalSurface;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum PracticeMode {
    /// Hear yourself with a short delay
    #[default]
    Daf,
    /// Record a take and save it as WAV
    Record,
    /// Visual and audible beat
    Metronome,
}

impl PracticeMode {
    /// Exercise name reported in completion events.
    pub fn exercise_type(&self) -> &'static str {
        match self {
            PracticeMode::Daf => "daf",
            PracticeMode::Record => "recording",
            PracticeMode::Metronome => "metronome",
        }
    }
}
