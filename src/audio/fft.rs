use rustfft::{num_complex::Complex, Fft, FftPlanner};
use std::sync::Arc;

use super::{rms, VisualizationFrame};

/// Analysis window length; yields `FFT_SIZE / 2` frequency bins.
pub const FFT_SIZE: usize = 2048;

const MIN_DECIBELS: f32 = -100.0;
const MAX_DECIBELS: f32 = -30.0;
const SMOOTHING: f32 = 0.8;

/// Frequency analyser for the tap branch of the graph.
///
/// Keeps the most recent `FFT_SIZE` samples, so it can be fed blocks of any
/// size. Magnitudes are smoothed over time and mapped from the
/// `MIN_DECIBELS..MAX_DECIBELS` range onto `0..=255`.
pub struct Analyser {
    fft: Arc<dyn Fft<f32>>,
    history: Vec<f32>,
    write_pos: usize,
    buffer: Vec<Complex<f32>>,
    window: Vec<f32>,
    smoothed: Vec<f32>,
}

impl Analyser {
    pub fn new() -> Self {
        let mut planner = FftPlanner::new();
        let fft = planner.plan_fft_forward(FFT_SIZE);

        // Hann window
        let window: Vec<f32> = (0..FFT_SIZE)
            .map(|i| 0.5 * (1.0 - (2.0 * std::f32::consts::PI * i as f32 / (FFT_SIZE - 1) as f32).cos()))
            .collect();

        Self {
            fft,
            history: vec![0.0; FFT_SIZE],
            write_pos: 0,
            buffer: vec![Complex::new(0.0, 0.0); FFT_SIZE],
            window,
            smoothed: vec![0.0; FFT_SIZE / 2],
        }
    }

    pub fn bin_count(&self) -> usize {
        FFT_SIZE / 2
    }

    /// Push a block of input and produce the frame for it.
    pub fn process(&mut self, samples: &[f32]) -> VisualizationFrame {
        for &s in samples {
            self.history[self.write_pos] = s;
            self.write_pos = (self.write_pos + 1) % FFT_SIZE;
        }

        // Oldest sample first
        for i in 0..FFT_SIZE {
            let s = self.history[(self.write_pos + i) % FFT_SIZE];
            self.buffer[i] = Complex::new(s * self.window[i], 0.0);
        }
        self.fft.process(&mut self.buffer);

        let scale = 1.0 / FFT_SIZE as f32;
        let range = MAX_DECIBELS - MIN_DECIBELS;
        let bins = self
            .smoothed
            .iter_mut()
            .zip(self.buffer.iter())
            .map(|(prev, c)| {
                let magnitude = c.norm() * scale;
                *prev = SMOOTHING * *prev + (1.0 - SMOOTHING) * magnitude;
                if *prev <= 0.0 {
                    return 0;
                }
                let db = 20.0 * prev.log10();
                (255.0 * (db - MIN_DECIBELS) / range).clamp(0.0, 255.0) as u8
            })
            .collect();

        VisualizationFrame {
            bins,
            level: rms(samples),
        }
    }
}

impl Default for Analyser {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(freq: f32, sample_rate: f32, len: usize) -> Vec<f32> {
        (0..len)
            .map(|i| (2.0 * std::f32::consts::PI * freq * i as f32 / sample_rate).sin() * 0.5)
            .collect()
    }

    #[test]
    fn test_silence_yields_zero_bins() {
        let mut analyser = Analyser::new();
        let frame = analyser.process(&[0.0; 512]);
        assert_eq!(frame.bins.len(), FFT_SIZE / 2);
        assert!(frame.bins.iter().all(|&b| b == 0));
        assert_eq!(frame.level, 0.0);
    }

    #[test]
    fn test_sine_peaks_at_its_bin() {
        let sample_rate = 48_000.0;
        let mut analyser = Analyser::new();
        let input = sine(1500.0, sample_rate, FFT_SIZE);
        let mut frame = analyser.process(&input);
        for _ in 0..10 {
            frame = analyser.process(&input);
        }

        let expected_bin = (1500.0 * FFT_SIZE as f32 / sample_rate).round() as usize;
        let peak = frame
            .bins
            .iter()
            .enumerate()
            .max_by_key(|(_, &b)| b)
            .map(|(i, _)| i)
            .unwrap();
        assert!((peak as i64 - expected_bin as i64).abs() <= 1, "peak {} expected {}", peak, expected_bin);
        assert!(frame.level > 0.3);
    }

    #[test]
    fn test_smoothing_decays_gradually() {
        let mut analyser = Analyser::new();
        let input = sine(1000.0, 48_000.0, FFT_SIZE);
        for _ in 0..10 {
            analyser.process(&input);
        }
        let loud = analyser.process(&input).bins.iter().map(|&b| b as u32).sum::<u32>();
        let after = analyser.process(&[0.0; FFT_SIZE]).bins.iter().map(|&b| b as u32).sum::<u32>();
        assert!(after > 0);
        assert!(after <= loud);
    }
}
