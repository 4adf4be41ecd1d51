/// Owned RGBA drawing surface.
///
/// 4 bytes per pixel in **RGBA** order, not pre-multiplied. Output backends
/// convert it to their native format when presenting.
pub struct Canvas {
    pub data: Vec<u8>,
    pub width: usize,
    pub height: usize,
}

impl Canvas {
    pub fn new(width: usize, height: usize) -> Self {
        Self {
            data: vec![0u8; width * height * 4],
            width,
            height,
        }
    }

    /// Resize, reallocating only when the buffer is too small.
    pub fn resize(&mut self, width: usize, height: usize) {
        self.width = width;
        self.height = height;
        let needed = width * height * 4;
        if self.data.len() < needed {
            self.data.resize(needed, 0);
        }
    }

    #[inline]
    pub fn clear(&mut self) {
        let len = self.width * self.height * 4;
        self.data[..len].fill(0);
    }

    #[inline]
    pub fn put_pixel(&mut self, x: usize, y: usize, (r, g, b): (u8, u8, u8)) {
        if x >= self.width || y >= self.height {
            return;
        }
        let idx = (y * self.width + x) * 4;
        self.data[idx..idx + 4].copy_from_slice(&[r, g, b, 255]);
    }

    /// Fill a rectangle, clipped to the surface.
    pub fn fill_rect(&mut self, x: usize, y: usize, w: usize, h: usize, color: (u8, u8, u8)) {
        let x_end = (x + w).min(self.width);
        let y_end = (y + h).min(self.height);
        for py in y..y_end {
            for px in x..x_end {
                self.put_pixel(px, py, color);
            }
        }
    }

    /// RGBA at (x, y); transparent black outside the surface.
    #[inline]
    pub fn get_pixel(&self, x: usize, y: usize) -> (u8, u8, u8, u8) {
        if x >= self.width || y >= self.height {
            return (0, 0, 0, 0);
        }
        let idx = (y * self.width + x) * 4;
        (self.data[idx], self.data[idx + 1], self.data[idx + 2], self.data[idx + 3])
    }

    pub fn is_lit(&self, x: usize, y: usize) -> bool {
        self.get_pixel(x, y).3 != 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fill_rect_clips() {
        let mut canvas = Canvas::new(4, 4);
        canvas.fill_rect(2, 2, 10, 10, (255, 0, 0));
        assert!(canvas.is_lit(3, 3));
        assert!(!canvas.is_lit(1, 1));
        assert_eq!(canvas.get_pixel(2, 2), (255, 0, 0, 255));
        assert_eq!(canvas.get_pixel(9, 9), (0, 0, 0, 0));
    }

    #[test]
    fn test_resize_then_clear() {
        let mut canvas = Canvas::new(2, 2);
        canvas.fill_rect(0, 0, 2, 2, (1, 2, 3));
        canvas.resize(3, 3);
        canvas.clear();
        assert!((0..3).all(|x| (0..3).all(|y| !canvas.is_lit(x, y))));
    }
}
