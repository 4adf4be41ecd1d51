//! In-memory platform double that counts every acquire and release.

use std::f32::consts::PI;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use super::platform::{AudioPlatform, AudioSink, CaptureConstraints, CaptureHandle, CaptureStream};
use crate::error::CaptureError;

#[derive(Debug, Default)]
pub(crate) struct FakeStats {
    acquired: AtomicUsize,
    released: AtomicUsize,
    outputs_opened: AtomicUsize,
    outputs_closed: AtomicUsize,
    samples_written: AtomicUsize,
    samples_read: AtomicUsize,
}

impl FakeStats {
    pub fn acquired(&self) -> usize {
        self.acquired.load(Ordering::SeqCst)
    }

    pub fn released(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }

    pub fn open_captures(&self) -> usize {
        self.acquired() - self.released()
    }

    pub fn outputs_opened(&self) -> usize {
        self.outputs_opened.load(Ordering::SeqCst)
    }

    pub fn outputs_closed(&self) -> usize {
        self.outputs_closed.load(Ordering::SeqCst)
    }

    pub fn samples_written(&self) -> usize {
        self.samples_written.load(Ordering::SeqCst)
    }

    pub fn samples_read(&self) -> usize {
        self.samples_read.load(Ordering::SeqCst)
    }
}

pub(crate) struct FakePlatform {
    stats: Arc<FakeStats>,
    acquire_failure: Mutex<Option<CaptureError>>,
    output_failure: Mutex<Option<CaptureError>>,
    read_failure: Mutex<Option<(usize, CaptureError)>>,
    sample_rate: u32,
    frequency: f32,
}

impl FakePlatform {
    pub fn new() -> Self {
        Self {
            stats: Arc::new(FakeStats::default()),
            acquire_failure: Mutex::new(None),
            output_failure: Mutex::new(None),
            read_failure: Mutex::new(None),
            sample_rate: 48_000,
            frequency: 440.0,
        }
    }

    pub fn stats(&self) -> &FakeStats {
        &self.stats
    }

    /// Every following acquire fails with `err` until cleared.
    pub fn fail_acquire_with(&self, err: CaptureError) {
        *self.acquire_failure.lock().unwrap() = Some(err);
    }

    pub fn fail_output_with(&self, err: CaptureError) {
        *self.output_failure.lock().unwrap() = Some(err);
    }

    /// Streams acquired from now on fail with `err` after `reads` good reads,
    /// like a device unplugged mid-session.
    pub fn fail_reads_after(&self, reads: usize, err: CaptureError) {
        *self.read_failure.lock().unwrap() = Some((reads, err));
    }

    pub fn clear_failures(&self) {
        *self.acquire_failure.lock().unwrap() = None;
        *self.output_failure.lock().unwrap() = None;
        *self.read_failure.lock().unwrap() = None;
    }
}

impl AudioPlatform for FakePlatform {
    fn acquire(
        &self,
        _constraints: CaptureConstraints,
    ) -> impl Future<Output = Result<CaptureHandle, CaptureError>> + Send {
        let result = match self.acquire_failure.lock().unwrap().clone() {
            Some(err) => Err(err),
            None => {
                self.stats.acquired.fetch_add(1, Ordering::SeqCst);
                Ok(CaptureHandle::new(Box::new(FakeStream {
                    stats: self.stats.clone(),
                    sample_rate: self.sample_rate,
                    frequency: self.frequency,
                    phase: 0.0,
                    stopped: false,
                    reads: 0,
                    fail_after: self.read_failure.lock().unwrap().clone(),
                })))
            }
        };
        async move {
            tokio::task::yield_now().await;
            result
        }
    }

    fn open_output(&self, _sample_rate: u32, _latency_ms: u32) -> Result<Box<dyn AudioSink>, CaptureError> {
        if let Some(err) = self.output_failure.lock().unwrap().clone() {
            return Err(err);
        }
        self.stats.outputs_opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeSink {
            stats: self.stats.clone(),
            closed: false,
        }))
    }
}

struct FakeStream {
    stats: Arc<FakeStats>,
    sample_rate: u32,
    frequency: f32,
    phase: f32,
    stopped: bool,
    reads: usize,
    fail_after: Option<(usize, CaptureError)>,
}

impl CaptureStream for FakeStream {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn read(&mut self, buf: &mut [f32]) -> Result<usize, CaptureError> {
        if self.stopped {
            return Err(CaptureError::other("stream stopped"));
        }
        if let Some((limit, err)) = &self.fail_after {
            if self.reads >= *limit {
                return Err(err.clone());
            }
        }
        self.reads += 1;
        let step = 2.0 * PI * self.frequency / self.sample_rate as f32;
        for sample in buf.iter_mut() {
            *sample = self.phase.sin() * 0.5;
            self.phase = (self.phase + step) % (2.0 * PI);
        }
        self.stats.samples_read.fetch_add(buf.len(), Ordering::SeqCst);
        thread::sleep(Duration::from_millis(1));
        Ok(buf.len())
    }

    fn stop(&mut self) {
        if !self.stopped {
            self.stopped = true;
            self.stats.released.fetch_add(1, Ordering::SeqCst);
        }
    }
}

struct FakeSink {
    stats: Arc<FakeStats>,
    closed: bool,
}

impl AudioSink for FakeSink {
    fn write(&mut self, samples: &[f32]) -> Result<(), CaptureError> {
        self.stats.samples_written.fetch_add(samples.len(), Ordering::SeqCst);
        Ok(())
    }

    fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.stats.outputs_closed.fetch_add(1, Ordering::SeqCst);
        }
    }
}

impl Drop for FakeSink {
    fn drop(&mut self) {
        self.close();
    }
}

/// Poll `cond` from a plain thread until it holds or five seconds pass.
pub(crate) fn wait_for<F: Fn() -> bool>(cond: F) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(2));
    }
    false
}
