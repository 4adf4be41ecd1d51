//! Timer-driven beat generator for practice cadence.
//!
//! Beats are scheduled from wall-clock deadlines on the tokio timer, not
//! from the audio hardware clock, so very long sessions can drift slightly.

mod click;

pub use click::{ClickPlayer, ClickVoice};

use std::ops::RangeInclusive;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::error::ParameterError;

pub const BPM_RANGE: RangeInclusive<u32> = 40..=220;
pub const BEATS_PER_MEASURE_RANGE: RangeInclusive<u32> = 1..=16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetronomeState {
    pub is_running: bool,
    pub bpm: u32,
    pub beats_per_measure: u32,
    /// 0-based position within the measure; 0 is the accented beat
    pub current_beat_index: u32,
    /// Beats emitted since the last start
    pub tick_count: u64,
}

impl Default for MetronomeState {
    fn default() -> Self {
        Self {
            is_running: false,
            bpm: 60,
            beats_per_measure: 4,
            current_beat_index: 0,
            tick_count: 0,
        }
    }
}

/// One emitted beat.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BeatEvent {
    pub index: u32,
    pub accent: bool,
    pub tick: u64,
}

pub fn validate_bpm(bpm: u32) -> Result<u32, ParameterError> {
    if !BPM_RANGE.contains(&bpm) {
        return Err(ParameterError::Bpm(bpm));
    }
    Ok(bpm)
}

pub fn validate_beats_per_measure(beats: u32) -> Result<u32, ParameterError> {
    if !BEATS_PER_MEASURE_RANGE.contains(&beats) {
        return Err(ParameterError::BeatsPerMeasure(beats));
    }
    Ok(beats)
}

/// Time between beats at `bpm`.
pub fn beat_period(bpm: u32) -> Duration {
    Duration::from_secs_f64(60.0 / bpm.max(1) as f64)
}

struct Shared {
    state: watch::Sender<MetronomeState>,
    beats: broadcast::Sender<BeatEvent>,
    // Bumped on every stop so a cancelled task can never emit late
    generation: AtomicU64,
}

impl Shared {
    /// Emit one beat for `session`. The first beat of a session stays on
    /// index 0; every later one advances.
    fn emit(&self, session: u64, first: bool) {
        let mut event = None;
        self.state.send_if_modified(|s| {
            if !s.is_running || self.generation.load(Ordering::Acquire) != session {
                return false;
            }
            if !first {
                s.current_beat_index = (s.current_beat_index + 1) % s.beats_per_measure;
            }
            s.tick_count += 1;
            event = Some(BeatEvent {
                index: s.current_beat_index,
                accent: s.current_beat_index == 0,
                tick: s.tick_count,
            });
            true
        });
        if let Some(event) = event {
            let _ = self.beats.send(event);
        }
    }
}

pub struct MetronomeScheduler {
    shared: Arc<Shared>,
    bpm_tx: Option<watch::Sender<u32>>,
    task: Option<JoinHandle<()>>,
}

impl MetronomeScheduler {
    pub fn new() -> Self {
        let (state, _) = watch::channel(MetronomeState::default());
        let (beats, _) = broadcast::channel(64);
        Self {
            shared: Arc::new(Shared {
                state,
                beats,
                generation: AtomicU64::new(0),
            }),
            bpm_tx: None,
            task: None,
        }
    }

    /// Start ticking at `bpm`; beat 1 fires immediately.
    ///
    /// Must be called from within a tokio runtime. Restarting a running
    /// metronome starts a fresh measure.
    pub fn start(&mut self, bpm: u32, beats_per_measure: u32) -> Result<(), ParameterError> {
        let bpm = validate_bpm(bpm)?;
        let beats_per_measure = validate_beats_per_measure(beats_per_measure)?;
        self.stop();

        let session = self.shared.generation.load(Ordering::Acquire);
        self.shared.state.send_replace(MetronomeState {
            is_running: true,
            bpm,
            beats_per_measure,
            current_beat_index: 0,
            tick_count: 0,
        });

        let (bpm_tx, bpm_rx) = watch::channel(bpm);
        self.bpm_tx = Some(bpm_tx);
        self.task = Some(tokio::spawn(run_ticks(self.shared.clone(), bpm_rx, session)));

        info!("Metronome started: {} bpm, {} beats per measure", bpm, beats_per_measure);
        Ok(())
    }

    /// Change the tempo for beats scheduled after this call.
    pub fn set_bpm(&mut self, bpm: u32) -> Result<(), ParameterError> {
        let bpm = validate_bpm(bpm)?;
        self.shared.state.send_modify(|s| s.bpm = bpm);
        if let Some(tx) = &self.bpm_tx {
            tx.send_replace(bpm);
        }
        debug!("Metronome tempo set to {} bpm", bpm);
        Ok(())
    }

    /// Cancel pending beats and return to beat 1. Idempotent.
    pub fn stop(&mut self) {
        self.shared.generation.fetch_add(1, Ordering::AcqRel);
        if let Some(task) = self.task.take() {
            task.abort();
            info!("Metronome stopped");
        }
        self.bpm_tx = None;
        self.shared.state.send_if_modified(|s| {
            let changed = s.is_running || s.current_beat_index != 0;
            s.is_running = false;
            s.current_beat_index = 0;
            changed
        });
    }

    pub fn state(&self) -> MetronomeState {
        *self.shared.state.borrow()
    }

    pub fn is_running(&self) -> bool {
        self.state().is_running
    }

    pub fn subscribe(&self) -> watch::Receiver<MetronomeState> {
        self.shared.state.subscribe()
    }

    pub fn subscribe_beats(&self) -> broadcast::Receiver<BeatEvent> {
        self.shared.beats.subscribe()
    }
}

impl Default for MetronomeScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for MetronomeScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn run_ticks(shared: Arc<Shared>, mut bpm_rx: watch::Receiver<u32>, session: u64) {
    let mut period = beat_period(*bpm_rx.borrow_and_update());
    let mut last_tick = Instant::now();
    shared.emit(session, true);
    let mut next = last_tick + period;

    loop {
        tokio::select! {
            _ = tokio::time::sleep_until(next) => {
                last_tick = Instant::now();
                shared.emit(session, false);
                next += period;
                // Fell behind by a whole period: resync instead of bursting
                if next <= last_tick {
                    next = last_tick + period;
                }
            }
            changed = bpm_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                period = beat_period(*bpm_rx.borrow_and_update());
                // Never sooner than one new period after the last beat
                next = (last_tick + period).max(Instant::now());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::{sleep, Duration};

    const SLACK: Duration = Duration::from_millis(5);

    #[tokio::test(start_paused = true)]
    async fn test_first_beat_fires_immediately() {
        let mut metronome = MetronomeScheduler::new();
        let mut beats = metronome.subscribe_beats();
        metronome.start(120, 4).unwrap();

        let first = beats.recv().await.unwrap();
        assert_eq!(first, BeatEvent { index: 0, accent: true, tick: 1 });
        assert_eq!(metronome.state().tick_count, 1);
        assert!(metronome.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_sixty_bpm_three_seconds() {
        let mut metronome = MetronomeScheduler::new();
        metronome.start(60, 4).unwrap();
        tokio::task::yield_now().await;
        assert_eq!(metronome.state().tick_count, 1);

        sleep(Duration::from_millis(3000) + SLACK).await;
        let state = metronome.state();
        assert_eq!(state.tick_count, 4);
        assert_eq!(state.current_beat_index, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_beat_index_wraps() {
        let mut metronome = MetronomeScheduler::new();
        let mut beats = metronome.subscribe_beats();
        metronome.start(200, 4).unwrap();

        let mut indices = Vec::new();
        for _ in 0..9 {
            indices.push(beats.recv().await.unwrap().index);
        }
        assert_eq!(indices, vec![0, 1, 2, 3, 0, 1, 2, 3, 0]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_beats_are_evenly_spaced() {
        let mut metronome = MetronomeScheduler::new();
        let mut beats = metronome.subscribe_beats();
        let start = Instant::now();
        metronome.start(150, 3).unwrap();

        let mut times = Vec::new();
        for _ in 0..6 {
            beats.recv().await.unwrap();
            times.push(Instant::now() - start);
        }
        assert!(times[0] < SLACK);
        for pair in times.windows(2) {
            let gap = pair[1] - pair[0];
            assert!(gap >= Duration::from_millis(400) && gap < Duration::from_millis(400) + SLACK);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_resets_index() {
        let mut metronome = MetronomeScheduler::new();
        metronome.start(60, 4).unwrap();
        sleep(Duration::from_millis(2000) + SLACK).await;
        assert_eq!(metronome.state().current_beat_index, 2);

        metronome.stop();
        let state = metronome.state();
        assert!(!state.is_running);
        assert_eq!(state.current_beat_index, 0);

        // No pending ticks survive the stop
        sleep(Duration::from_millis(5000)).await;
        assert_eq!(metronome.state().current_beat_index, 0);
        assert_eq!(metronome.state().tick_count, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_when_idle_is_noop() {
        let mut metronome = MetronomeScheduler::new();
        metronome.stop();
        metronome.stop();
        assert_eq!(metronome.state(), MetronomeState::default());
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_bpm_applies_to_next_beat_without_double_fire() {
        let mut metronome = MetronomeScheduler::new();
        let mut beats = metronome.subscribe_beats();
        let start = Instant::now();
        metronome.start(60, 4).unwrap();
        beats.recv().await.unwrap();

        // Halfway through the first period, speed up to 120 bpm (500 ms)
        sleep(Duration::from_millis(500)).await;
        metronome.set_bpm(120).unwrap();

        beats.recv().await.unwrap();
        let second = Instant::now() - start;
        // 500 ms after the first beat at the new tempo, not immediately
        assert!(second >= Duration::from_millis(500) && second < Duration::from_millis(500) + SLACK);

        beats.recv().await.unwrap();
        let third = Instant::now() - start;
        assert!(third >= Duration::from_millis(1000) && third < Duration::from_millis(1000) + SLACK);
        assert_eq!(metronome.state().bpm, 120);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slowing_down_does_not_skip() {
        let mut metronome = MetronomeScheduler::new();
        let mut beats = metronome.subscribe_beats();
        let start = Instant::now();
        metronome.start(120, 4).unwrap();
        beats.recv().await.unwrap();

        sleep(Duration::from_millis(100)).await;
        metronome.set_bpm(60).unwrap();

        let next = beats.recv().await.unwrap();
        assert_eq!(next.index, 1);
        let elapsed = Instant::now() - start;
        assert!(elapsed >= Duration::from_millis(1000) && elapsed < Duration::from_millis(1000) + SLACK);
    }

    #[tokio::test(start_paused = true)]
    async fn test_parameter_validation() {
        let mut metronome = MetronomeScheduler::new();
        assert_eq!(metronome.start(30, 4), Err(ParameterError::Bpm(30)));
        assert_eq!(metronome.start(100, 0), Err(ParameterError::BeatsPerMeasure(0)));
        assert!(!metronome.is_running());
        assert!(metronome.set_bpm(221).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_beat_measure_always_accents() {
        let mut metronome = MetronomeScheduler::new();
        let mut beats = metronome.subscribe_beats();
        metronome.start(220, 1).unwrap();
        for _ in 0..3 {
            let beat = beats.recv().await.unwrap();
            assert_eq!(beat.index, 0);
            assert!(beat.accent);
        }
    }

    #[test]
    fn test_beat_period() {
        assert_eq!(beat_period(60), Duration::from_secs(1));
        assert_eq!(beat_period(120), Duration::from_millis(500));
    }
}
