use clap::Parser;
use clap_complete::Shell;
use std::path::PathBuf;

use crate::display::PracticeMode;

#[derive(Parser, Debug)]
#[command(name = "echoloop")]
#[command(author, version, about = "Speech practice with delayed auditory feedback, metronome and recorder")]
pub struct Args {
    /// Practice mode
    #[arg(value_enum, default_value = "daf")]
    pub mode: PracticeMode,

    /// Config file path
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Capture source name
    #[arg(short, long)]
    pub device: Option<String>,

    /// Feedback delay in milliseconds (0-1000)
    #[arg(long)]
    pub delay: Option<u32>,

    /// Playback gain (0.0-2.0)
    #[arg(long)]
    pub gain: Option<f32>,

    /// Metronome tempo (40-220)
    #[arg(long)]
    pub bpm: Option<u32>,

    /// Beats per measure (1-16)
    #[arg(long)]
    pub beats: Option<u32>,

    /// Silent metronome (visual beat only)
    #[arg(long)]
    pub no_click: bool,

    /// Color scheme: spectrum, calm, warm, meter, monochrome
    #[arg(long)]
    pub colors: Option<String>,

    /// Number of frequency bars
    #[arg(short, long)]
    pub bars: Option<usize>,

    /// Grow bars from the middle row
    #[arg(long)]
    pub mirror: bool,

    /// Directory for saved recordings
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Write a commented default config to the XDG config path and exit
    #[arg(long)]
    pub init_config: bool,

    /// Print shell completions and exit
    #[arg(long, value_name = "SHELL")]
    pub completions: Option<Shell>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_defaults_to_daf() {
        let args = Args::parse_from(["echoloop"]);
        assert_eq!(args.mode, PracticeMode::Daf);
        assert!(args.delay.is_none());
    }

    #[test]
    fn test_parses_mode_and_flags() {
        let args = Args::parse_from(["echoloop", "metronome", "--bpm", "120", "--beats", "3", "--no-click"]);
        assert_eq!(args.mode, PracticeMode::Metronome);
        assert_eq!(args.bpm, Some(120));
        assert_eq!(args.beats, Some(3));
        assert!(args.no_click);
    }

    #[test]
    fn test_rejects_unknown_mode() {
        assert!(Args::try_parse_from(["echoloop", "karaoke"]).is_err());
    }
}
