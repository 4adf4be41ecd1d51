//! Error taxonomy for the audio core.
//!
//! Capture and graph failures are recovered at the component boundary and
//! returned as one of these values; nothing here is allowed to reach the
//! render path as a panic.

use thiserror::Error;

/// Failure to acquire or wire up the microphone.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CaptureError {
    #[error("microphone access was denied")]
    PermissionDenied,

    #[error("no microphone was found")]
    DeviceNotFound,

    #[error("the microphone is busy")]
    DeviceBusy,

    #[error("audio capture failed: {0}")]
    Other(String),

    #[error("failed to build audio graph: {0}")]
    GraphConstruction(String),
}

impl CaptureError {
    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }

    pub fn graph(msg: impl Into<String>) -> Self {
        Self::GraphConstruction(msg.into())
    }

    /// Whether an explicit user retry can succeed without changing
    /// permissions or hardware.
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            CaptureError::DeviceBusy | CaptureError::Other(_) | CaptureError::GraphConstruction(_)
        )
    }

    /// Actionable message shown to the user, distinct for every kind.
    pub fn user_message(&self) -> &'static str {
        match self {
            CaptureError::PermissionDenied => {
                "Microphone access was denied. Allow this application to use the microphone in your system sound or privacy settings, then try again."
            }
            CaptureError::DeviceNotFound => {
                "No microphone was found. Connect a microphone or headset and try again."
            }
            CaptureError::DeviceBusy => {
                "The microphone is in use by another application. Close it and press start again."
            }
            CaptureError::Other(_) => {
                "The microphone could not be started. Press start to try again."
            }
            CaptureError::GraphConstruction(_) => {
                "Audio playback could not be set up. Check your speaker or headphone output and try again."
            }
        }
    }
}

/// A parameter outside the range a component accepts.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParameterError {
    #[error("delay {0} ms is outside 0..=1000 ms")]
    Delay(u32),

    #[error("gain {0} is outside 0.0..=2.0")]
    Gain(f32),

    #[error("tempo {0} bpm is outside 40..=220 bpm")]
    Bpm(u32),

    #[error("beats per measure {0} is outside 1..=16")]
    BeatsPerMeasure(u32),
}

#[derive(Error, Debug)]
pub enum RecordingError {
    #[error(transparent)]
    Capture(#[from] CaptureError),

    #[error("a recording is already in progress")]
    AlreadyActive,

    #[error("failed to encode recording: {0}")]
    Encode(#[from] hound::Error),

    #[error("failed to save recording: {0}")]
    Io(#[from] std::io::Error),
}

impl RecordingError {
    /// User-facing message; capture failures keep their per-kind wording.
    pub fn user_message(&self) -> String {
        match self {
            RecordingError::Capture(e) => e.user_message().to_string(),
            other => other.to_string(),
        }
    }
}
