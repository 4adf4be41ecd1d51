mod daf;
mod fft;
pub mod graph;
pub mod platform;
mod pulse;

#[cfg(test)]
pub(crate) mod testing;

pub use daf::{AnalyserTap, AudioGraphManager, DafSettings};
pub use fft::{Analyser, FFT_SIZE};
pub use platform::{AudioPlatform, AudioSink, CaptureConstraints, CaptureHandle, CaptureStream};
pub use pulse::PulsePlatform;

/// Per-block snapshot of the analyser tap.
#[derive(Debug, Clone, PartialEq)]
pub struct VisualizationFrame {
    /// Frequency magnitudes on a 0..=255 scale, one per bin
    pub bins: Vec<u8>,
    /// RMS of the input block (0.0 to 1.0)
    pub level: f32,
}

impl VisualizationFrame {
    /// The frame returned before any real data has arrived.
    pub fn silent(bin_count: usize) -> Self {
        Self {
            bins: vec![0; bin_count],
            level: 0.0,
        }
    }
}

impl Default for VisualizationFrame {
    fn default() -> Self {
        Self::silent(FFT_SIZE / 2)
    }
}

/// Root mean square of a block of samples.
pub fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum: f32 = samples.iter().map(|s| s * s).sum();
    (sum / samples.len() as f32).sqrt().min(1.0)
}
