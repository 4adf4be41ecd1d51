//! Microphone recording with pause/resume.

mod artifact;
mod clock;

pub use artifact::{encode_wav, ArtifactRegistry, ArtifactUrl, RecordingArtifact, RecordingBuffer};
pub use clock::{format_elapsed, ActiveClock};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use tracing::{debug, error, info, warn};

use crate::audio::{AudioPlatform, CaptureConstraints, CaptureHandle};
use crate::error::{CaptureError, RecordingError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordingState {
    Idle,
    Recording,
    Paused,
}

/// Capture thread and the state it shares with the session.
struct ActiveCapture {
    paused: Arc<AtomicBool>,
    stop_flag: Arc<AtomicBool>,
    /// Set by the capture thread when the device fails mid-recording
    fault: Arc<Mutex<Option<CaptureError>>>,
    buffer: Arc<Mutex<RecordingBuffer>>,
    worker: Option<thread::JoinHandle<CaptureHandle>>,
    sample_rate: u32,
}

impl ActiveCapture {
    fn is_faulted(&self) -> bool {
        self.fault.lock().unwrap_or_else(PoisonError::into_inner).is_some()
    }

    /// End the capture thread and release the microphone.
    fn shutdown(&mut self) {
        self.stop_flag.store(true, Ordering::Release);
        if let Some(worker) = self.worker.take() {
            match worker.join() {
                Ok(mut capture) => capture.release(),
                Err(_) => error!("Recording thread panicked"),
            }
        }
    }
}

pub struct RecordingSession<P: AudioPlatform> {
    platform: Arc<P>,
    registry: ArtifactRegistry,
    sample_rate: u32,
    block_size: usize,
    device: Option<String>,
    state: RecordingState,
    clock: ActiveClock,
    capture: Option<ActiveCapture>,
    artifact: Option<RecordingArtifact>,
}

impl<P: AudioPlatform> RecordingSession<P> {
    pub fn new(
        platform: Arc<P>,
        registry: ArtifactRegistry,
        sample_rate: u32,
        block_size: usize,
        device: Option<String>,
    ) -> Self {
        Self {
            platform,
            registry,
            sample_rate,
            block_size: block_size.max(1),
            device,
            state: RecordingState::Idle,
            clock: ActiveClock::default(),
            capture: None,
            artifact: None,
        }
    }

    /// Acquire the microphone and begin a fresh recording.
    ///
    /// Any artifact from a previous recording is revoked first.
    pub async fn start(&mut self) -> Result<(), RecordingError> {
        if let Some(e) = self.take_error() {
            debug!("Clearing earlier capture failure: {}", e);
        }
        if self.state != RecordingState::Idle {
            return Err(RecordingError::AlreadyActive);
        }
        self.discard_artifact();
        self.clock.reset();

        let constraints = CaptureConstraints::raw(self.sample_rate, self.block_size, self.device.clone());
        let capture = self.platform.acquire(constraints).await.map_err(|e| {
            warn!("Microphone request failed: {}", e);
            e
        })?;
        let sample_rate = capture.sample_rate();

        let paused = Arc::new(AtomicBool::new(false));
        let stop_flag = Arc::new(AtomicBool::new(false));
        let fault = Arc::new(Mutex::new(None));
        let buffer = Arc::new(Mutex::new(RecordingBuffer::default()));

        let worker = {
            let paused = paused.clone();
            let stop_flag = stop_flag.clone();
            let fault = fault.clone();
            let buffer = buffer.clone();
            let block_size = self.block_size;
            thread::Builder::new()
                .name("echoloop-record".into())
                .spawn(move || capture_loop(capture, buffer, paused, stop_flag, fault, block_size))
                .map_err(|e| CaptureError::other(format!("recording thread: {}", e)))?
        };

        self.capture = Some(ActiveCapture {
            paused,
            stop_flag,
            fault,
            buffer,
            worker: Some(worker),
            sample_rate,
        });
        self.clock.start();
        self.state = RecordingState::Recording;
        info!("Recording started at {} Hz", sample_rate);
        Ok(())
    }

    /// Suspend collection and the clock. No-op unless recording.
    pub fn pause(&mut self) {
        if self.state() != RecordingState::Recording {
            return;
        }
        if let Some(capture) = &self.capture {
            capture.paused.store(true, Ordering::Release);
        }
        self.clock.pause();
        self.state = RecordingState::Paused;
        info!("Recording paused at {}", format_elapsed(self.clock.elapsed_secs()));
    }

    /// Continue collection and the clock. No-op unless paused.
    pub fn resume(&mut self) {
        if self.state() != RecordingState::Paused {
            return;
        }
        if let Some(capture) = &self.capture {
            capture.paused.store(false, Ordering::Release);
        }
        self.clock.resume();
        self.state = RecordingState::Recording;
        info!("Recording resumed");
    }

    /// Finish the recording and produce its artifact.
    ///
    /// Returns `Ok(None)` when there is nothing to stop. The microphone is
    /// released before encoding, so it is off even if encoding fails.
    pub fn stop(&mut self) -> Result<Option<RecordingArtifact>, RecordingError> {
        if let Some(e) = self.take_error() {
            return Err(e.into());
        }
        let Some(mut capture) = self.capture.take() else {
            self.state = RecordingState::Idle;
            return Ok(None);
        };

        capture.shutdown();
        self.clock.pause();
        self.state = RecordingState::Idle;

        let buffer = std::mem::take(&mut *capture.buffer.lock().unwrap_or_else(PoisonError::into_inner));
        let chunks = buffer.chunk_count();
        let samples = buffer.into_samples();
        let bytes = encode_wav(&samples, capture.sample_rate)?;

        let bytes: Arc<[u8]> = Arc::from(bytes);
        let url = self.registry.register(bytes.clone());
        let artifact = RecordingArtifact {
            bytes,
            url,
            duration: self.clock.elapsed(),
            sample_rate: capture.sample_rate,
            sample_count: samples.len(),
        };
        info!(
            "Recording finished: {} ({} chunks, {})",
            artifact.url,
            chunks,
            format_elapsed(artifact.duration.as_secs())
        );
        self.artifact = Some(artifact.clone());
        Ok(Some(artifact))
    }

    /// Drop any capture and artifact and return to a clean idle state.
    pub fn reset(&mut self) {
        if let Some(mut capture) = self.capture.take() {
            capture.shutdown();
            debug!("Recording discarded");
        }
        self.discard_artifact();
        self.clock.reset();
        self.state = RecordingState::Idle;
    }

    fn discard_artifact(&mut self) {
        if let Some(old) = self.artifact.take() {
            self.registry.revoke(&old.url);
        }
    }

    /// Device failure that ended the current recording, if any.
    ///
    /// The capture thread has already released the microphone. The failed
    /// take is discarded and the session is left idle with the clock reset,
    /// so no artifact claims time that was never captured.
    pub fn take_error(&mut self) -> Option<CaptureError> {
        let err = self
            .capture
            .as_ref()?
            .fault
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()?;
        if let Some(mut capture) = self.capture.take() {
            capture.shutdown();
        }
        self.clock.reset();
        self.state = RecordingState::Idle;
        warn!("Recording lost: {}", err);
        Some(err)
    }

    fn is_faulted(&self) -> bool {
        self.capture.as_ref().is_some_and(ActiveCapture::is_faulted)
    }

    /// Idle as soon as the device has failed, even before
    /// [`take_error`](Self::take_error) collects the failure.
    pub fn state(&self) -> RecordingState {
        if self.is_faulted() {
            RecordingState::Idle
        } else {
            self.state
        }
    }

    pub fn artifact(&self) -> Option<&RecordingArtifact> {
        self.artifact.as_ref()
    }

    /// Active recording time at one-second resolution.
    pub fn elapsed_secs(&self) -> u64 {
        if self.is_faulted() {
            return 0;
        }
        self.clock.elapsed_secs()
    }

    /// Samples collected so far in the current recording.
    pub fn buffered_samples(&self) -> usize {
        self.capture
            .as_ref()
            .map(|c| c.buffer.lock().unwrap_or_else(PoisonError::into_inner).sample_count())
            .unwrap_or(0)
    }
}

impl<P: AudioPlatform> Drop for RecordingSession<P> {
    fn drop(&mut self) {
        self.reset();
    }
}

fn capture_loop(
    mut capture: CaptureHandle,
    buffer: Arc<Mutex<RecordingBuffer>>,
    paused: Arc<AtomicBool>,
    stop_flag: Arc<AtomicBool>,
    fault: Arc<Mutex<Option<CaptureError>>>,
    block_size: usize,
) -> CaptureHandle {
    let mut block = vec![0.0f32; block_size];
    while !stop_flag.load(Ordering::Acquire) {
        match capture.read(&mut block) {
            Ok(n) => {
                // Keep draining the device while paused, but drop the data
                if !paused.load(Ordering::Acquire) {
                    buffer
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .append(block[..n].to_vec());
                }
            }
            Err(e) => {
                warn!("Capture read failed, recording halted: {}", e);
                capture.release();
                *fault.lock().unwrap_or_else(PoisonError::into_inner) = Some(e);
                break;
            }
        }
    }
    capture
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::testing::{wait_for, FakePlatform};
    use std::time::Duration;

    fn session(platform: &Arc<FakePlatform>, registry: &ArtifactRegistry) -> RecordingSession<FakePlatform> {
        RecordingSession::new(platform.clone(), registry.clone(), 48_000, 480, None)
    }

    #[tokio::test(start_paused = true)]
    async fn test_elapsed_excludes_paused_time() {
        let platform = Arc::new(FakePlatform::new());
        let registry = ArtifactRegistry::new();
        let mut rec = session(&platform, &registry);

        rec.start().await.unwrap();
        tokio::time::sleep(Duration::from_secs(3)).await;
        rec.pause();
        assert_eq!(rec.state(), RecordingState::Paused);
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(rec.elapsed_secs(), 3);
        rec.resume();
        tokio::time::sleep(Duration::from_secs(2)).await;

        let artifact = rec.stop().unwrap().unwrap();
        assert_eq!(artifact.duration, Duration::from_secs(5));
        assert_eq!(rec.elapsed_secs(), 5);
        assert_eq!(rec.state(), RecordingState::Idle);
        assert_eq!(platform.stats().open_captures(), 0);
    }

    #[tokio::test]
    async fn test_artifact_contains_captured_audio() {
        let platform = Arc::new(FakePlatform::new());
        let registry = ArtifactRegistry::new();
        let mut rec = session(&platform, &registry);

        rec.start().await.unwrap();
        assert!(wait_for(|| rec.buffered_samples() >= 4800));
        let artifact = rec.stop().unwrap().unwrap();

        assert!(artifact.sample_count >= 4800);
        assert_eq!(artifact.sample_rate, 48_000);
        let resolved = registry.resolve(&artifact.url).unwrap();
        assert_eq!(&resolved[..], &artifact.bytes[..]);
        let reader = hound::WavReader::new(std::io::Cursor::new(resolved.to_vec())).unwrap();
        assert_eq!(reader.len() as usize, artifact.sample_count);
    }

    #[tokio::test]
    async fn test_paused_audio_is_not_collected() {
        let platform = Arc::new(FakePlatform::new());
        let registry = ArtifactRegistry::new();
        let mut rec = session(&platform, &registry);

        rec.start().await.unwrap();
        assert!(wait_for(|| rec.buffered_samples() > 0));
        rec.pause();
        thread::sleep(Duration::from_millis(10));
        let at_pause = rec.buffered_samples();
        let read_at_pause = platform.stats().samples_read();
        assert!(wait_for(|| platform.stats().samples_read() > read_at_pause + 4800));
        assert_eq!(rec.buffered_samples(), at_pause);

        rec.resume();
        assert!(wait_for(|| rec.buffered_samples() > at_pause));
        rec.stop().unwrap();
    }

    #[tokio::test]
    async fn test_stop_and_pause_when_idle_are_noops() {
        let platform = Arc::new(FakePlatform::new());
        let mut rec = session(&platform, &ArtifactRegistry::new());
        assert!(rec.stop().unwrap().is_none());
        rec.pause();
        rec.resume();
        assert_eq!(rec.state(), RecordingState::Idle);
        assert!(rec.stop().unwrap().is_none());
        assert_eq!(platform.stats().acquired(), 0);
    }

    #[tokio::test]
    async fn test_resume_only_from_paused() {
        let platform = Arc::new(FakePlatform::new());
        let mut rec = session(&platform, &ArtifactRegistry::new());
        rec.start().await.unwrap();
        rec.resume();
        assert_eq!(rec.state(), RecordingState::Recording);
        rec.pause();
        rec.pause();
        assert_eq!(rec.state(), RecordingState::Paused);
        // Stop is valid from paused
        assert!(rec.stop().unwrap().is_some());
    }

    #[tokio::test]
    async fn test_second_start_while_active_is_rejected() {
        let platform = Arc::new(FakePlatform::new());
        let mut rec = session(&platform, &ArtifactRegistry::new());
        rec.start().await.unwrap();
        assert!(matches!(rec.start().await, Err(RecordingError::AlreadyActive)));
        assert_eq!(platform.stats().open_captures(), 1);
        rec.stop().unwrap();
    }

    #[tokio::test]
    async fn test_reset_revokes_previous_artifact() {
        let platform = Arc::new(FakePlatform::new());
        let registry = ArtifactRegistry::new();
        let mut rec = session(&platform, &registry);

        rec.start().await.unwrap();
        let old = rec.stop().unwrap().unwrap();
        assert!(registry.resolve(&old.url).is_some());

        rec.reset();
        assert!(registry.resolve(&old.url).is_none());
        assert!(rec.artifact().is_none());
        assert_eq!(rec.elapsed_secs(), 0);

        rec.start().await.unwrap();
        let new = rec.stop().unwrap().unwrap();
        assert_ne!(old.url, new.url);
        assert_eq!(registry.live_count(), 1);
    }

    #[tokio::test]
    async fn test_new_start_revokes_previous_artifact() {
        let platform = Arc::new(FakePlatform::new());
        let registry = ArtifactRegistry::new();
        let mut rec = session(&platform, &registry);

        rec.start().await.unwrap();
        let first = rec.stop().unwrap().unwrap();
        rec.start().await.unwrap();
        assert!(registry.resolve(&first.url).is_none());
        rec.stop().unwrap();
        assert_eq!(registry.live_count(), 1);
    }

    #[tokio::test]
    async fn test_reset_while_recording_releases_microphone() {
        let platform = Arc::new(FakePlatform::new());
        let mut rec = session(&platform, &ArtifactRegistry::new());
        rec.start().await.unwrap();
        rec.reset();
        assert_eq!(rec.state(), RecordingState::Idle);
        assert_eq!(platform.stats().open_captures(), 0);
    }

    #[tokio::test]
    async fn test_capture_failures_leave_session_idle() {
        for kind in [CaptureError::PermissionDenied, CaptureError::DeviceNotFound, CaptureError::other("boom")] {
            let platform = Arc::new(FakePlatform::new());
            platform.fail_acquire_with(kind.clone());
            let mut rec = session(&platform, &ArtifactRegistry::new());
            match rec.start().await {
                Err(RecordingError::Capture(e)) => assert_eq!(e, kind),
                other => panic!("unexpected result: {:?}", other.err()),
            }
            assert_eq!(rec.state(), RecordingState::Idle);
            assert_eq!(platform.stats().acquired(), platform.stats().released());
        }
    }

    #[tokio::test]
    async fn test_drop_releases_microphone() {
        let platform = Arc::new(FakePlatform::new());
        {
            let mut rec = session(&platform, &ArtifactRegistry::new());
            rec.start().await.unwrap();
        }
        assert_eq!(platform.stats().open_captures(), 0);
    }

    #[tokio::test]
    async fn test_device_loss_releases_microphone_and_discards_take() {
        let platform = Arc::new(FakePlatform::new());
        platform.fail_reads_after(3, CaptureError::DeviceNotFound);
        let registry = ArtifactRegistry::new();
        let mut rec = session(&platform, &registry);

        rec.start().await.unwrap();
        // Released by the capture thread, before anyone calls stop()
        assert!(wait_for(|| rec.state() == RecordingState::Idle));
        assert_eq!(platform.stats().released(), 1);
        assert_eq!(rec.elapsed_secs(), 0);

        assert_eq!(rec.take_error(), Some(CaptureError::DeviceNotFound));
        assert_eq!(rec.take_error(), None);
        assert!(rec.stop().unwrap().is_none());
        assert_eq!(registry.live_count(), 0);

        platform.clear_failures();
        rec.start().await.unwrap();
        assert_eq!(rec.state(), RecordingState::Recording);
        assert!(rec.stop().unwrap().is_some());
        assert_eq!(platform.stats().open_captures(), 0);
    }

    #[tokio::test]
    async fn test_stop_after_device_loss_reports_capture_error() {
        let platform = Arc::new(FakePlatform::new());
        platform.fail_reads_after(2, CaptureError::DeviceBusy);
        let mut rec = session(&platform, &ArtifactRegistry::new());

        rec.start().await.unwrap();
        assert!(wait_for(|| rec.state() == RecordingState::Idle));
        rec.pause();
        rec.resume();

        let err = rec.stop().unwrap_err();
        assert!(matches!(err, RecordingError::Capture(CaptureError::DeviceBusy)));
        assert!(rec.artifact().is_none());
        assert_eq!(platform.stats().open_captures(), 0);
    }
}
