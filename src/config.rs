use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::audio::DafSettings;
use crate::cli::Args;
use crate::color::ColorScheme;
use crate::metronome::{validate_beats_per_measure, validate_bpm};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub audio: AudioConfig,
    pub daf: DafConfig,
    pub metronome: MetronomeConfig,
    pub recording: RecordingConfig,
    pub visualizer: VisualizerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Capture source name (None = server default)
    pub device: Option<String>,
    pub sample_rate: u32,
    /// Frames per processing block
    pub block_size: usize,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            device: None,
            sample_rate: 48_000,
            block_size: 512,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DafConfig {
    pub delay_ms: u32,
    pub gain: f32,
}

impl Default for DafConfig {
    fn default() -> Self {
        Self {
            delay_ms: 100,
            gain: 1.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetronomeConfig {
    pub bpm: u32,
    pub beats_per_measure: u32,
    /// Play an audible click on each beat
    pub click: bool,
    pub click_volume: f32,
}

impl Default for MetronomeConfig {
    fn default() -> Self {
        Self {
            bpm: 60,
            beats_per_measure: 4,
            click: true,
            click_volume: 0.6,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordingConfig {
    /// Where saved takes go (None = data dir)
    pub output_dir: Option<PathBuf>,
}

impl RecordingConfig {
    pub fn resolved_output_dir(&self) -> PathBuf {
        self.output_dir.clone().unwrap_or_else(|| {
            dirs::data_dir()
                .unwrap_or_else(std::env::temp_dir)
                .join("echoloop")
                .join("recordings")
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VisualizerConfig {
    pub bars: usize,
    pub color_scheme: ColorScheme,
    pub fps: u32,
    pub mirror: bool,
}

impl Default for VisualizerConfig {
    fn default() -> Self {
        Self {
            bars: 48,
            color_scheme: ColorScheme::Spectrum,
            fps: 30,
            mirror: false,
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Get the default XDG config path (~/.config/echoloop/config.toml)
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("echoloop").join("config.toml"))
    }

    /// Load config from the default XDG path if it exists.
    /// Returns None if the file doesn't exist, logs a warning on parse errors.
    pub fn load_from_default_path() -> Option<Self> {
        let path = Self::default_path()?;
        if !path.exists() {
            return None;
        }
        match Self::load(&path) {
            Ok(config) => Some(config),
            Err(e) => {
                warn!("Failed to parse config at {}: {}. Using defaults.", path.display(), e);
                None
            }
        }
    }

    /// Initialize default config file at XDG path, returns the path
    pub fn init_default_config() -> Result<PathBuf> {
        let path = Self::default_path()
            .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, Self::generate_config_template())?;

        Ok(path)
    }

    /// Generate a commented TOML config template
    pub fn generate_config_template() -> String {
        r#"# Echoloop Configuration
# This file is auto-generated. Edit as needed.

[audio]
# Capture source (omit for the server default)
# device = "alsa_input.usb-mic"
# Sample rate in Hz
sample_rate = 48000
# Frames per processing block (lower = less latency, more CPU)
block_size = 512

[daf]
# Feedback delay in milliseconds (0-1000)
delay_ms = 100
# Playback gain (0.0 = muted, 1.0 = unity, 2.0 = boosted)
gain = 1.0

[metronome]
# Tempo in beats per minute (40-220)
bpm = 60
# Beats per measure; beat 1 is accented (1-16)
beats_per_measure = 4
# Audible click on each beat
click = true
# Click volume (0.0-1.0)
click_volume = 0.6

[recording]
# Directory for saved takes (omit for ~/.local/share/echoloop/recordings)
# output_dir = "~/Music/practice"

[visualizer]
# Number of frequency bars
bars = 48
# Color scheme: "spectrum", "calm", "warm", "meter", "monochrome"
color_scheme = "spectrum"
# Display refresh rate
fps = 30
# Grow bars from the middle row
mirror = false
"#
        .to_string()
    }

    /// Merge CLI arguments into config (CLI takes priority)
    pub fn merge_args(&mut self, args: &Args) {
        if let Some(ref device) = args.device {
            self.audio.device = Some(device.clone());
        }
        if let Some(delay) = args.delay {
            self.daf.delay_ms = delay;
        }
        if let Some(gain) = args.gain {
            self.daf.gain = gain;
        }
        if let Some(bpm) = args.bpm {
            self.metronome.bpm = bpm;
        }
        if let Some(beats) = args.beats {
            self.metronome.beats_per_measure = beats;
        }
        if args.no_click {
            self.metronome.click = false;
        }
        if let Some(ref output) = args.output {
            self.recording.output_dir = Some(output.clone());
        }
        if let Some(bars) = args.bars {
            self.visualizer.bars = bars;
        }
        if let Some(ref colors) = args.colors {
            match colors.parse() {
                Ok(scheme) => self.visualizer.color_scheme = scheme,
                Err(e) => warn!("{}; keeping {}", e, self.visualizer.color_scheme.name()),
            }
        }
        if args.mirror {
            self.visualizer.mirror = true;
        }
    }

    /// Reject values the audio components would refuse at runtime.
    pub fn validate(&self) -> Result<()> {
        DafSettings::new(self.daf.delay_ms, self.daf.gain).context("Invalid [daf] settings")?;
        validate_bpm(self.metronome.bpm).context("Invalid [metronome] bpm")?;
        validate_beats_per_measure(self.metronome.beats_per_measure)
            .context("Invalid [metronome] beats_per_measure")?;

        if !(0.0..=1.0).contains(&self.metronome.click_volume) {
            anyhow::bail!("click_volume {} is outside 0.0..=1.0", self.metronome.click_volume);
        }
        if self.audio.sample_rate == 0 {
            anyhow::bail!("sample_rate must be positive");
        }
        if !(64..=8192).contains(&self.audio.block_size) {
            anyhow::bail!("block_size {} is outside 64..=8192", self.audio.block_size);
        }
        if self.visualizer.bars == 0 {
            anyhow::bail!("bars must be at least 1");
        }
        if !(1..=240).contains(&self.visualizer.fps) {
            anyhow::bail!("fps {} is outside 1..=240", self.visualizer.fps);
        }
        Ok(())
    }

    /// Write delay, gain and tempo values that differ from `baseline` (the
    /// config the session started with) back into the config file at `path`,
    /// creating it from the template when missing. Values the session did not
    /// touch, including one-off command line overrides, are never written.
    /// Returns whether anything was saved.
    pub fn persist_practice_settings(&self, baseline: &Config, path: &Path) -> Result<bool> {
        let delay = (self.daf.delay_ms != baseline.daf.delay_ms).then_some(self.daf.delay_ms);
        let gain = (self.daf.gain != baseline.daf.gain).then_some(self.daf.gain);
        let bpm = (self.metronome.bpm != baseline.metronome.bpm).then_some(self.metronome.bpm);
        let beats = (self.metronome.beats_per_measure != baseline.metronome.beats_per_measure)
            .then_some(self.metronome.beats_per_measure);
        if delay.is_none() && gain.is_none() && bpm.is_none() && beats.is_none() {
            debug!("Practice settings unchanged; nothing to save");
            return Ok(false);
        }

        if !path.exists() {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(path, Self::generate_config_template())?;
            info!("Created config file at {}", path.display());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config for save: {}", path.display()))?;
        let mut doc = content
            .parse::<toml_edit::DocumentMut>()
            .with_context(|| format!("Failed to parse config for save: {}", path.display()))?;

        if (delay.is_some() || gain.is_some()) && !doc.contains_key("daf") {
            doc["daf"] = toml_edit::table();
        }
        if let Some(delay) = delay {
            doc["daf"]["delay_ms"] = toml_edit::value(delay as i64);
        }
        if let Some(gain) = gain {
            // Round so 0.1 steps don't persist as 0.30000001192092896
            doc["daf"]["gain"] = toml_edit::value((gain as f64 * 100.0).round() / 100.0);
        }

        if (bpm.is_some() || beats.is_some()) && !doc.contains_key("metronome") {
            doc["metronome"] = toml_edit::table();
        }
        if let Some(bpm) = bpm {
            doc["metronome"]["bpm"] = toml_edit::value(bpm as i64);
        }
        if let Some(beats) = beats {
            doc["metronome"]["beats_per_measure"] = toml_edit::value(beats as i64);
        }

        std::fs::write(path, doc.to_string())?;
        info!("Saved practice settings to {}", path.display());
        Ok(true)
    }
}
