use super::Canvas;
use crate::audio::VisualizationFrame;
use crate::color::ColorScheme;

/// Maps analyser bins onto vertical bars.
#[derive(Debug, Clone)]
pub struct BarRenderer {
    pub bars: usize,
    pub color_scheme: ColorScheme,
    pub mirror: bool,
    /// Empty columns between bars
    pub spacing: usize,
}

impl BarRenderer {
    pub fn new(bars: usize, color_scheme: ColorScheme, mirror: bool) -> Self {
        Self {
            bars: bars.max(1),
            color_scheme,
            mirror,
            spacing: 1,
        }
    }

    /// Bar levels in 0.0..=1.0.
    ///
    /// Bars are spaced logarithmically over the bins so low frequencies,
    /// where most of the voice energy sits, get more of the width.
    pub fn bar_levels(&self, bins: &[u8]) -> Vec<f32> {
        if bins.len() < 2 {
            return vec![0.0; self.bars];
        }
        let first = 1.0f32;
        let last = bins.len() as f32;

        (0..self.bars)
            .map(|bar| {
                let start = first * (last / first).powf(bar as f32 / self.bars as f32);
                let end = first * (last / first).powf((bar + 1) as f32 / self.bars as f32);
                let start = (start.floor() as usize).min(bins.len() - 1);
                let end = (end.ceil() as usize).min(bins.len()).max(start + 1);

                let sum: u32 = bins[start..end].iter().map(|&b| b as u32).sum();
                sum as f32 / (end - start) as f32 / 255.0
            })
            .collect()
    }

    pub fn draw(&self, frame: &VisualizationFrame, canvas: &mut Canvas) {
        canvas.clear();
        if canvas.width == 0 || canvas.height == 0 {
            return;
        }

        let levels = self.bar_levels(&frame.bins);
        let displayable = levels.len().min(canvas.width);
        let slot = canvas.width / displayable;
        let bar_width = slot.saturating_sub(self.spacing).max(1);
        let start_x = (canvas.width - slot * displayable) / 2;
        let height = canvas.height;

        for (i, &level) in levels.iter().take(displayable).enumerate() {
            let bar_height = ((level * height as f32).round() as usize).min(height);
            let x = start_x + i * slot;
            let position = i as f32 / displayable as f32;

            for step in 0..bar_height {
                let shade = step as f32 / height as f32;
                let color = self.color_scheme.get_color(position, shade);
                if self.mirror {
                    // Grow outward from the middle row
                    let center = height / 2;
                    let offset = step / 2;
                    let y = if step % 2 == 0 { center.saturating_sub(offset + 1) } else { center + offset };
                    canvas.fill_rect(x, y, bar_width, 1, color);
                } else {
                    canvas.fill_rect(x, height - 1 - step, bar_width, 1, color);
                }
            }
        }
    }
}
