//! Signal graph for delayed auditory feedback.
//!
//! ```text
//! Source ─► Delay ─► Gain ─► Destination
//!    └────► Analyser
//! ```
//!
//! Parameters live in [`GraphParams`] atomics so the control side can retune
//! a running graph without rebuilding it. The processing side reads them
//! once per block.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use super::fft::Analyser;
use super::VisualizationFrame;
use crate::error::{CaptureError, ParameterError};

pub const MAX_DELAY_MS: u32 = 1000;
pub const MAX_GAIN: f32 = 2.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    Source,
    Delay,
    Gain,
    Analyser,
    Destination,
}

/// Node connections of a graph.
#[derive(Debug, Clone, Default)]
pub struct Topology {
    edges: Vec<(NodeKind, NodeKind)>,
}

impl Topology {
    /// Connect `from` to `to`.
    ///
    /// A direct `Source → Destination` edge would let the undelayed signal
    /// reach the speakers, so it is rejected.
    pub fn connect(&mut self, from: NodeKind, to: NodeKind) -> Result<(), CaptureError> {
        if from == NodeKind::Source && to == NodeKind::Destination {
            return Err(CaptureError::graph("source cannot feed the destination directly"));
        }
        if from == NodeKind::Destination || to == NodeKind::Source {
            return Err(CaptureError::graph(format!("invalid edge {:?} -> {:?}", from, to)));
        }
        if !self.edges.contains(&(from, to)) {
            self.edges.push((from, to));
        }
        Ok(())
    }

    pub fn edges(&self) -> &[(NodeKind, NodeKind)] {
        &self.edges
    }

    pub fn is_connected(&self, from: NodeKind, to: NodeKind) -> bool {
        self.edges.contains(&(from, to))
    }

    /// The delayed-feedback wiring with its analyser tap.
    pub fn daf() -> Result<Self, CaptureError> {
        let mut topology = Self::default();
        topology.connect(NodeKind::Source, NodeKind::Delay)?;
        topology.connect(NodeKind::Delay, NodeKind::Gain)?;
        topology.connect(NodeKind::Gain, NodeKind::Destination)?;
        topology.connect(NodeKind::Source, NodeKind::Analyser)?;
        Ok(topology)
    }

    /// True when the destination is reachable and every route to it from
    /// the source goes through the delay node.
    pub fn passes_through_delay(&self) -> bool {
        let reachable = |skip_delay: bool| {
            let mut seen = HashSet::new();
            let mut stack = vec![NodeKind::Source];
            while let Some(node) = stack.pop() {
                if !seen.insert(node) {
                    continue;
                }
                for &(from, to) in &self.edges {
                    if from == node && !(skip_delay && to == NodeKind::Delay) {
                        stack.push(to);
                    }
                }
            }
            seen.contains(&NodeKind::Destination)
        };
        reachable(false) && !reachable(true)
    }
}

pub fn validate_delay(ms: u32) -> Result<u32, ParameterError> {
    if ms > MAX_DELAY_MS {
        return Err(ParameterError::Delay(ms));
    }
    Ok(ms)
}

pub fn validate_gain(level: f32) -> Result<f32, ParameterError> {
    if !(0.0..=MAX_GAIN).contains(&level) {
        return Err(ParameterError::Gain(level));
    }
    Ok(level)
}

/// Live-tunable parameters shared between control and processing sides.
#[derive(Debug)]
pub struct GraphParams {
    delay_ms: AtomicU32,
    gain_bits: AtomicU32,
}

impl GraphParams {
    pub fn new(delay_ms: u32, gain: f32) -> Self {
        Self {
            delay_ms: AtomicU32::new(delay_ms.min(MAX_DELAY_MS)),
            gain_bits: AtomicU32::new(gain.clamp(0.0, MAX_GAIN).to_bits()),
        }
    }

    /// Store already-validated values, clamping like [`new`](Self::new).
    pub fn store(&self, delay_ms: u32, gain: f32) {
        self.delay_ms.store(delay_ms.min(MAX_DELAY_MS), Ordering::Release);
        self.gain_bits.store(gain.clamp(0.0, MAX_GAIN).to_bits(), Ordering::Release);
    }

    pub fn set_delay_ms(&self, ms: u32) -> Result<(), ParameterError> {
        self.delay_ms.store(validate_delay(ms)?, Ordering::Release);
        Ok(())
    }

    pub fn set_gain(&self, level: f32) -> Result<(), ParameterError> {
        self.gain_bits.store(validate_gain(level)?.to_bits(), Ordering::Release);
        Ok(())
    }

    pub fn delay_ms(&self) -> u32 {
        self.delay_ms.load(Ordering::Acquire)
    }

    pub fn gain(&self) -> f32 {
        f32::from_bits(self.gain_bits.load(Ordering::Acquire))
    }
}

/// Fixed-capacity delay line holding up to `MAX_DELAY_MS` of audio.
pub struct DelayLine {
    buffer: Vec<f32>,
    write_pos: usize,
    sample_rate: u32,
}

impl DelayLine {
    pub fn new(sample_rate: u32) -> Self {
        let capacity = ms_to_samples(sample_rate, MAX_DELAY_MS) + 1;
        Self {
            buffer: vec![0.0; capacity],
            write_pos: 0,
            sample_rate,
        }
    }

    /// Write `input` and read the signal from `delay_ms` ago into `output`.
    pub fn process(&mut self, input: &[f32], delay_ms: u32, output: &mut [f32]) {
        let len = self.buffer.len();
        let delay = ms_to_samples(self.sample_rate, delay_ms).min(len - 1);
        for (x, out) in input.iter().zip(output.iter_mut()) {
            self.buffer[self.write_pos] = *x;
            *out = self.buffer[(self.write_pos + len - delay) % len];
            self.write_pos = (self.write_pos + 1) % len;
        }
    }
}

fn ms_to_samples(sample_rate: u32, ms: u32) -> usize {
    (sample_rate as u64 * ms as u64 / 1000) as usize
}

/// Apply `gain` in place, clamped to the valid sample range.
pub fn apply_gain(samples: &mut [f32], gain: f32) {
    for s in samples.iter_mut() {
        *s = (*s * gain).clamp(-1.0, 1.0);
    }
}

/// A wired graph ready to process blocks.
pub struct AudioGraph {
    topology: Topology,
    params: Arc<GraphParams>,
    delay: DelayLine,
    analyser: Analyser,
}

impl AudioGraph {
    pub fn daf(sample_rate: u32, params: Arc<GraphParams>) -> Result<Self, CaptureError> {
        if sample_rate == 0 {
            return Err(CaptureError::graph("capture reported a zero sample rate"));
        }
        let topology = Topology::daf()?;
        if !topology.passes_through_delay() {
            return Err(CaptureError::graph("destination path bypasses the delay node"));
        }
        Ok(Self {
            topology,
            params,
            delay: DelayLine::new(sample_rate),
            analyser: Analyser::new(),
        })
    }

    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    /// Run one block: the analyser taps the raw input, the destination
    /// receives the delayed and gained signal in `output`.
    pub fn process_block(&mut self, input: &[f32], output: &mut [f32]) -> VisualizationFrame {
        let frame = self.analyser.process(input);
        let n = input.len().min(output.len());
        self.delay.process(&input[..n], self.params.delay_ms(), &mut output[..n]);
        apply_gain(&mut output[..n], self.params.gain());
        frame
    }
}
