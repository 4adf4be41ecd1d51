use std::f32::consts::PI;
use std::thread;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, warn};

use super::BeatEvent;
use crate::audio::AudioSink;

const ACCENT_HZ: f32 = 1000.0;
const BEAT_HZ: f32 = 800.0;
const CLICK_MS: u32 = 50;

/// Short decaying sine click.
#[derive(Debug, Clone, Copy)]
pub struct ClickVoice {
    sample_rate: u32,
    volume: f32,
}

impl ClickVoice {
    pub fn new(sample_rate: u32, volume: f32) -> Self {
        Self {
            sample_rate,
            volume: volume.clamp(0.0, 1.0),
        }
    }

    pub fn render(&self, accent: bool) -> Vec<f32> {
        let freq = if accent { ACCENT_HZ } else { BEAT_HZ };
        let len = (self.sample_rate * CLICK_MS / 1000) as usize;
        let sr = self.sample_rate as f32;
        (0..len)
            .map(|i| {
                let t = i as f32 / sr;
                // Exponential ramp down to ~0.001 over the click
                let envelope = (-7.0 * i as f32 / len as f32).exp();
                (2.0 * PI * freq * t).sin() * envelope * self.volume
            })
            .collect()
    }
}

/// Plays a click for every beat on a dedicated output thread.
///
/// The thread ends once the metronome that produced the beats is dropped.
pub struct ClickPlayer {
    worker: thread::JoinHandle<()>,
}

impl ClickPlayer {
    pub fn spawn(
        mut sink: Box<dyn AudioSink>,
        voice: ClickVoice,
        mut beats: broadcast::Receiver<BeatEvent>,
    ) -> std::io::Result<Self> {
        let accent = voice.render(true);
        let normal = voice.render(false);

        let worker = thread::Builder::new().name("echoloop-click".into()).spawn(move || {
            loop {
                match beats.blocking_recv() {
                    Ok(beat) => {
                        let click = if beat.accent { &accent } else { &normal };
                        if let Err(e) = sink.write(click) {
                            warn!("Click output failed: {}", e);
                        }
                    }
                    Err(RecvError::Lagged(n)) => debug!("Click player skipped {} beats", n),
                    Err(RecvError::Closed) => break,
                }
            }
            sink.close();
        })?;

        Ok(Self { worker })
    }

    pub fn join(self) {
        if self.worker.join().is_err() {
            warn!("Click thread panicked");
        }
    }
}
