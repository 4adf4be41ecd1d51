use ratatui::buffer::Buffer;
use ratatui::layout::Rect;
use ratatui::style::Color;

use crate::visualizer::Canvas;

/// Presents a [`Canvas`] in terminal cells, two pixel rows per cell.
///
/// Each cell is an upper half block: foreground is the top pixel, background
/// the bottom one. Unlit pixels map to `Color::Reset` so terminal
/// transparency shows through.
pub struct TerminalSurface;

impl TerminalSurface {
    /// Canvas size that exactly covers `area`.
    pub fn canvas_size(area: Rect) -> (usize, usize) {
        (area.width as usize, area.height as usize * 2)
    }

    pub fn blit(canvas: &Canvas, area: Rect, buf: &mut Buffer) {
        for row in 0..area.height {
            for col in 0..area.width {
                let (x, y) = (col as usize, row as usize * 2);
                let top = pixel_color(canvas, x, y);
                let bottom = pixel_color(canvas, x, y + 1);
                if let Some(cell) = buf.cell_mut((area.x + col, area.y + row)) {
                    match (top, bottom) {
                        (Color::Reset, Color::Reset) => {
                            cell.set_char(' ');
                            cell.set_fg(Color::Reset);
                            cell.set_bg(Color::Reset);
                        }
                        (Color::Reset, bottom) => {
                            cell.set_char('▄');
                            cell.set_fg(bottom);
                            cell.set_bg(Color::Reset);
                        }
                        (top, bottom) => {
                            cell.set_char('▀');
                            cell.set_fg(top);
                            cell.set_bg(bottom);
                        }
                    }
                }
            }
        }
    }
}

fn pixel_color(canvas: &Canvas, x: usize, y: usize) -> Color {
    let (r, g, b, a) = canvas.get_pixel(x, y);
    if a == 0 {
        Color::Reset
    } else {
        Color::Rgb(r, g, b)
    }
}
