//! Boundary with the platform's audio capability.
//!
//! Every component talks to the microphone and the speakers through
//! [`AudioPlatform`]. The production implementation is
//! [`PulsePlatform`](super::PulsePlatform); tests use an in-memory double.

use std::future::Future;
use tracing::debug;

use crate::error::CaptureError;

/// What a component asks for when it requests the microphone.
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureConstraints {
    /// Source name (None = platform default)
    pub device: Option<String>,
    pub sample_rate: u32,
    /// Samples per read
    pub block_size: usize,
    pub echo_cancellation: bool,
    pub noise_suppression: bool,
    pub auto_gain_control: bool,
}

impl CaptureConstraints {
    /// Mono capture with every voice-processing stage disabled.
    ///
    /// Delayed feedback and analysis need the untouched signal; platform
    /// voice processing would re-delay or reshape what the user hears.
    pub fn raw(sample_rate: u32, block_size: usize, device: Option<String>) -> Self {
        Self {
            device,
            sample_rate,
            block_size,
            echo_cancellation: false,
            noise_suppression: false,
            auto_gain_control: false,
        }
    }

    pub fn wants_voice_processing(&self) -> bool {
        self.echo_cancellation || self.noise_suppression || self.auto_gain_control
    }
}

/// A live microphone stream delivering mono f32 samples.
pub trait CaptureStream: Send {
    fn sample_rate(&self) -> u32;

    /// Block until `buf` is filled with the next samples; returns the count.
    fn read(&mut self, buf: &mut [f32]) -> Result<usize, CaptureError>;

    /// Stop every hardware track behind this stream. Must be idempotent.
    fn stop(&mut self);
}

/// Speaker output accepting mono f32 samples.
pub trait AudioSink: Send {
    fn write(&mut self, samples: &[f32]) -> Result<(), CaptureError>;

    /// Discard queued audio and close the output. Must be idempotent.
    fn close(&mut self);
}

/// Platform capability: microphone access and an output device.
pub trait AudioPlatform: Send + Sync + 'static {
    /// Request microphone access. This is the only operation in the core
    /// that waits on something external (often a permission prompt).
    fn acquire(
        &self,
        constraints: CaptureConstraints,
    ) -> impl Future<Output = Result<CaptureHandle, CaptureError>> + Send;

    fn open_output(&self, sample_rate: u32, latency_ms: u32) -> Result<Box<dyn AudioSink>, CaptureError>;
}

/// Exclusive owner of a live microphone stream.
///
/// Dropping the handle releases the stream, so every exit path (success,
/// error, panic unwinding) turns the microphone off.
pub struct CaptureHandle {
    stream: Option<Box<dyn CaptureStream>>,
    sample_rate: u32,
}

impl CaptureHandle {
    pub fn new(stream: Box<dyn CaptureStream>) -> Self {
        let sample_rate = stream.sample_rate();
        Self {
            stream: Some(stream),
            sample_rate,
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    pub fn read(&mut self, buf: &mut [f32]) -> Result<usize, CaptureError> {
        match self.stream.as_mut() {
            Some(stream) => stream.read(buf),
            None => Err(CaptureError::other("capture handle already released")),
        }
    }

    /// Stop all hardware tracks. Safe to call repeatedly.
    pub fn release(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            stream.stop();
            debug!("Capture handle released");
        }
    }
}

impl Drop for CaptureHandle {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for CaptureHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaptureHandle")
            .field("open", &self.is_open())
            .field("sample_rate", &self.sample_rate)
            .finish()
    }
}
