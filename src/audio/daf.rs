use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use super::graph::{validate_delay, validate_gain, AudioGraph, GraphParams};
use super::platform::{AudioPlatform, AudioSink, CaptureConstraints, CaptureHandle};
use super::VisualizationFrame;
use crate::error::{CaptureError, ParameterError};

/// Target speaker latency on top of the configured delay.
const OUTPUT_LATENCY_MS: u32 = 20;

/// Validated start parameters for delayed feedback.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DafSettings {
    delay_ms: u32,
    gain: f32,
}

impl DafSettings {
    pub fn new(delay_ms: u32, gain: f32) -> Result<Self, ParameterError> {
        Ok(Self {
            delay_ms: validate_delay(delay_ms)?,
            gain: validate_gain(gain)?,
        })
    }

    pub fn delay_ms(&self) -> u32 {
        self.delay_ms
    }

    pub fn gain(&self) -> f32 {
        self.gain
    }
}

/// Read side of the analyser branch, handed to renderers.
#[derive(Clone)]
pub struct AnalyserTap {
    rx: watch::Receiver<Arc<VisualizationFrame>>,
    active: Arc<AtomicBool>,
}

impl AnalyserTap {
    /// Latest frame; never blocks.
    pub fn snapshot(&self) -> Arc<VisualizationFrame> {
        self.rx.borrow().clone()
    }

    /// False from the moment the owning graph starts tearing down.
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }
}

/// Running processing thread plus the flag that ends it.
struct ActiveGraph {
    stop_flag: Arc<AtomicBool>,
    /// Set by the processing thread when the device fails mid-session
    fault: Arc<Mutex<Option<CaptureError>>>,
    worker: Option<thread::JoinHandle<(CaptureHandle, Box<dyn AudioSink>)>>,
}

/// Owns the microphone capture and the delay/gain/analyser graph.
///
/// Every resource the graph holds is torn down by [`stop`](Self::stop),
/// which also runs on drop.
pub struct AudioGraphManager<P: AudioPlatform> {
    platform: Arc<P>,
    sample_rate: u32,
    block_size: usize,
    device: Option<String>,
    params: Arc<GraphParams>,
    frames: Arc<watch::Sender<Arc<VisualizationFrame>>>,
    frames_rx: watch::Receiver<Arc<VisualizationFrame>>,
    active: Arc<AtomicBool>,
    graph: Option<ActiveGraph>,
}

impl<P: AudioPlatform> AudioGraphManager<P> {
    pub fn new(platform: Arc<P>, sample_rate: u32, block_size: usize, device: Option<String>) -> Self {
        let (tx, rx) = watch::channel(Arc::new(VisualizationFrame::default()));
        Self {
            platform,
            sample_rate,
            block_size: block_size.max(1),
            device,
            params: Arc::new(GraphParams::new(0, 1.0)),
            frames: Arc::new(tx),
            frames_rx: rx,
            active: Arc::new(AtomicBool::new(false)),
            graph: None,
        }
    }

    /// Acquire the microphone and start delayed feedback.
    ///
    /// On any failure the manager is left idle with nothing acquired.
    pub async fn start(&mut self, settings: DafSettings) -> Result<(), CaptureError> {
        if self.graph.is_some() {
            self.stop();
        }

        let constraints = CaptureConstraints::raw(self.sample_rate, self.block_size, self.device.clone());
        let mut capture = match self.platform.acquire(constraints).await {
            Ok(capture) => capture,
            Err(e) => {
                warn!("Microphone request failed: {}", e);
                return Err(e);
            }
        };

        let graph = match AudioGraph::daf(capture.sample_rate(), self.params.clone()) {
            Ok(graph) => graph,
            Err(e) => {
                capture.release();
                error!("Graph construction failed, microphone released: {}", e);
                return Err(e);
            }
        };

        let sink = match self
            .platform
            .open_output(capture.sample_rate(), OUTPUT_LATENCY_MS)
        {
            Ok(sink) => sink,
            Err(e) => {
                capture.release();
                error!("Could not open output, microphone released: {}", e);
                return Err(CaptureError::graph(format!("output unavailable: {}", e)));
            }
        };

        let previous = (self.params.delay_ms(), self.params.gain());
        self.params.store(settings.delay_ms, settings.gain);
        self.frames.send_replace(Arc::new(VisualizationFrame::default()));
        self.active.store(true, Ordering::Release);

        let stop_flag = Arc::new(AtomicBool::new(false));
        let fault = Arc::new(Mutex::new(None));
        let worker = {
            let stop_flag = stop_flag.clone();
            let fault = fault.clone();
            let frames = self.frames.clone();
            let active = self.active.clone();
            let block_size = self.block_size;
            // A failed spawn drops the closure, and with it the capture handle
            thread::Builder::new()
                .name("echoloop-daf".into())
                .spawn(move || process_loop(capture, sink, graph, frames, active, stop_flag, fault, block_size))
        };

        match worker {
            Ok(worker) => {
                info!(
                    "Delayed feedback started: {} ms, gain {:.2}",
                    settings.delay_ms, settings.gain
                );
                self.graph = Some(ActiveGraph {
                    stop_flag,
                    fault,
                    worker: Some(worker),
                });
                Ok(())
            }
            Err(e) => {
                self.active.store(false, Ordering::Release);
                self.params.store(previous.0, previous.1);
                error!("Failed to spawn processing thread: {}", e);
                Err(CaptureError::graph(format!("processing thread: {}", e)))
            }
        }
    }

    /// Change the delay of the running graph; audible from the next block.
    pub fn set_delay(&mut self, ms: u32) -> Result<(), ParameterError> {
        self.params.set_delay_ms(ms)?;
        debug!("Delay set to {} ms", ms);
        Ok(())
    }

    pub fn set_gain(&mut self, level: f32) -> Result<(), ParameterError> {
        self.params.set_gain(level)?;
        debug!("Gain set to {:.2}", level);
        Ok(())
    }

    pub fn current_delay_ms(&self) -> u32 {
        self.params.delay_ms()
    }

    pub fn current_gain(&self) -> f32 {
        self.params.gain()
    }

    /// Last analyser frame, all zeros until real data has arrived.
    pub fn get_analyser_snapshot(&self) -> Vec<u8> {
        self.frames_rx.borrow().bins.clone()
    }

    /// RMS level of the most recent input block.
    pub fn input_level(&self) -> f32 {
        self.frames_rx.borrow().level
    }

    pub fn analyser_tap(&self) -> AnalyserTap {
        AnalyserTap {
            rx: self.frames_rx.clone(),
            active: self.active.clone(),
        }
    }

    pub fn is_active(&self) -> bool {
        self.graph.is_some() && self.active.load(Ordering::Acquire)
    }

    /// Device failure that ended a running graph, if any.
    ///
    /// The processing thread has already released the microphone by the
    /// time this returns `Some`; the manager is torn down and left idle.
    pub fn take_error(&mut self) -> Option<CaptureError> {
        let err = self
            .graph
            .as_ref()?
            .fault
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()?;
        self.stop();
        Some(err)
    }

    /// Tear down the graph and release the microphone. Idempotent.
    pub fn stop(&mut self) {
        self.active.store(false, Ordering::Release);
        let Some(mut graph) = self.graph.take() else {
            return;
        };

        graph.stop_flag.store(true, Ordering::Release);
        if let Some(worker) = graph.worker.take() {
            match worker.join() {
                Ok((mut capture, mut sink)) => {
                    sink.close();
                    capture.release();
                }
                // Unwinding already dropped, and so released, the handle
                Err(_) => error!("Processing thread panicked"),
            }
        }
        info!("Delayed feedback stopped");
    }
}

impl<P: AudioPlatform> Drop for AudioGraphManager<P> {
    fn drop(&mut self) {
        self.stop();
    }
}

fn process_loop(
    mut capture: CaptureHandle,
    mut sink: Box<dyn AudioSink>,
    mut graph: AudioGraph,
    frames: Arc<watch::Sender<Arc<VisualizationFrame>>>,
    active: Arc<AtomicBool>,
    stop_flag: Arc<AtomicBool>,
    fault: Arc<Mutex<Option<CaptureError>>>,
    block_size: usize,
) -> (CaptureHandle, Box<dyn AudioSink>) {
    let mut input = vec![0.0f32; block_size];
    let mut output = vec![0.0f32; block_size];

    while !stop_flag.load(Ordering::Acquire) {
        let n = match capture.read(&mut input) {
            Ok(n) => n,
            Err(e) => {
                warn!("Capture read failed, ending feedback: {}", e);
                sink.close();
                capture.release();
                *fault.lock().unwrap_or_else(PoisonError::into_inner) = Some(e);
                active.store(false, Ordering::Release);
                break;
            }
        };

        let frame = graph.process_block(&input[..n], &mut output[..n]);
        frames.send_replace(Arc::new(frame));

        if let Err(e) = sink.write(&output[..n]) {
            warn!("Output write failed: {}", e);
        }
    }

    debug!("Processing loop exited");
    (capture, sink)
}
