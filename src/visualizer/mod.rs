//! Per-frame rendering of the analyser tap.

mod bars;
mod canvas;

pub use bars::BarRenderer;
pub use canvas::Canvas;

use std::ops::ControlFlow;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::debug;

use crate::audio::AnalyserTap;

/// Interval between display refreshes at `fps`.
pub fn refresh_period(fps: u32) -> Duration {
    Duration::from_secs_f64(1.0 / fps.clamp(1, 240) as f64)
}

/// Draw the tap into `canvas` once per display refresh and hand each frame
/// to `present`.
///
/// Runs only while the tap is active and returns as soon as it is not, so no
/// per-frame work outlives the graph. `present` may restyle the renderer
/// for the next frame or return [`ControlFlow::Break`] to end the loop early.
/// Returns the number of frames drawn.
pub async fn render_loop<F>(
    tap: AnalyserTap,
    canvas: &mut Canvas,
    renderer: &mut BarRenderer,
    fps: u32,
    mut present: F,
) -> u64
where
    F: FnMut(&Canvas, &mut BarRenderer) -> ControlFlow<()>,
{
    let mut refresh = tokio::time::interval(refresh_period(fps));
    refresh.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let mut frames = 0u64;
    while tap.is_active() {
        refresh.tick().await;
        if !tap.is_active() {
            break;
        }
        let frame = tap.snapshot();
        renderer.draw(&frame, canvas);
        frames += 1;
        if present(canvas, renderer).is_break() {
            break;
        }
    }

    debug!("Render loop ended after {} frames", frames);
    frames
}
