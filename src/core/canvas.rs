use crate::error::{CompositorError, Result};

/// 2D drawing operations a layer producer can issue.
///
/// Coordinates are signed so content may scroll partly off the canvas;
/// anything outside the canvas is clipped.
#[derive(Debug, Clone, PartialEq)]
pub enum DrawOp {
    /// Fill the entire canvas with an RGBA color
    Clear([u8; 4]),

    Pixel { x: i32, y: i32, color: [u8; 4] },

    HLine { x: i32, y: i32, length: u32, color: [u8; 4] },

    VLine { x: i32, y: i32, length: u32, color: [u8; 4] },

    /// Filled rectangle
    Rect { x: i32, y: i32, width: u32, height: u32, color: [u8; 4] },

    Circle { cx: i32, cy: i32, radius: u32, color: [u8; 4] },

    FilledCircle { cx: i32, cy: i32, radius: u32, color: [u8; 4] },

    Line { x1: i32, y1: i32, x2: i32, y2: i32, color: [u8; 4] },
}

/// RGBA8 pixel buffer a producer draws one frame of layer content into
#[derive(Debug, Clone, PartialEq)]
pub struct Canvas {
    pixels: Vec<u8>,
    width: u32,
    height: u32,
}

impl Canvas {
    /// Fully transparent canvas
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            pixels: vec![0; (width as usize) * (height as usize) * 4],
            width,
            height,
        }
    }

    /// Wrap an existing RGBA8 buffer, which must hold exactly `width * height` pixels
    pub fn from_pixels(width: u32, height: u32, pixels: Vec<u8>) -> Result<Self> {
        let expected = (width as usize) * (height as usize) * 4;
        if pixels.len() != expected {
            return Err(CompositorError::BufferSizeMismatch {
                expected,
                actual: pixels.len(),
            });
        }
        Ok(Self {
            pixels,
            width,
            height,
        })
    }

    /// Execute a batch of operations in order
    pub fn execute(&mut self, ops: &[DrawOp]) {
        for op in ops {
            self.draw(op);
        }
    }

    /// Execute a single draw operation
    pub fn draw(&mut self, op: &DrawOp) {
        match *op {
            DrawOp::Clear(color) => self.fill(color),
            DrawOp::Pixel { x, y, color } => self.set_pixel(x, y, color),
            DrawOp::HLine { x, y, length, color } => {
                let (x0, x1) = self.clip_span(x, length, self.width);
                for px in x0..x1 {
                    self.set_pixel(px, y, color);
                }
            }
            DrawOp::VLine { x, y, length, color } => {
                let (y0, y1) = self.clip_span(y, length, self.height);
                for py in y0..y1 {
                    self.set_pixel(x, py, color);
                }
            }
            DrawOp::Rect { x, y, width, height, color } => {
                let (x0, x1) = self.clip_span(x, width, self.width);
                let (y0, y1) = self.clip_span(y, height, self.height);
                for py in y0..y1 {
                    for px in x0..x1 {
                        self.set_pixel(px, py, color);
                    }
                }
            }
            DrawOp::Circle { cx, cy, radius, color } => self.draw_circle(cx, cy, radius, color),
            DrawOp::FilledCircle { cx, cy, radius, color } => {
                self.draw_filled_circle(cx, cy, radius, color)
            }
            DrawOp::Line { x1, y1, x2, y2, color } => self.draw_line(x1, y1, x2, y2, color),
        }
    }

    /// Reset every pixel to transparent black
    pub fn clear_transparent(&mut self) {
        self.pixels.fill(0);
    }

    fn fill(&mut self, color: [u8; 4]) {
        for px in self.pixels.chunks_exact_mut(4) {
            px.copy_from_slice(&color);
        }
    }

    /// Clamp `[start, start + len)` to `[0, limit)`
    fn clip_span(&self, start: i32, len: u32, limit: u32) -> (i32, i32) {
        let end = (start as i64 + len as i64).min(limit as i64);
        let start = (start as i64).max(0);
        (start as i32, end.max(start) as i32)
    }

    fn set_pixel(&mut self, x: i32, y: i32, color: [u8; 4]) {
        if x < 0 || y < 0 || x as u32 >= self.width || y as u32 >= self.height {
            return;
        }

        let idx = ((y as usize) * (self.width as usize) + x as usize) * 4;
        self.pixels[idx..idx + 4].copy_from_slice(&color);
    }

    /// Midpoint circle outline
    fn draw_circle(&mut self, cx: i32, cy: i32, radius: u32, color: [u8; 4]) {
        let (mut x, mut y) = (radius as i32, 0i32);
        let mut p = 1 - radius as i32;

        while x >= y {
            let points = [
                (cx + x, cy + y), (cx - x, cy + y),
                (cx + x, cy - y), (cx - x, cy - y),
                (cx + y, cy + x), (cx - y, cy + x),
                (cx + y, cy - x), (cx - y, cy - x),
            ];
            for (px, py) in points {
                self.set_pixel(px, py, color);
            }

            y += 1;
            if p <= 0 {
                p += 2 * y + 1;
            } else {
                x -= 1;
                p += 2 * (y - x) + 1;
            }
        }
    }

    fn draw_filled_circle(&mut self, cx: i32, cy: i32, radius: u32, color: [u8; 4]) {
        let r = radius as i32;
        let r_sq = r * r;

        for dy in -r..=r {
            for dx in -r..=r {
                if dx * dx + dy * dy <= r_sq {
                    self.set_pixel(cx + dx, cy + dy, color);
                }
            }
        }
    }

    /// Bresenham line
    fn draw_line(&mut self, x1: i32, y1: i32, x2: i32, y2: i32, color: [u8; 4]) {
        let (mut x, mut y) = (x1, y1);

        let dx = (x2 - x).abs();
        let dy = -(y2 - y).abs();
        let sx = if x < x2 { 1 } else { -1 };
        let sy = if y < y2 { 1 } else { -1 };
        let mut err = dx + dy;

        loop {
            self.set_pixel(x, y, color);

            if x == x2 && y == y2 {
                break;
            }

            let e2 = 2 * err;
            if e2 >= dy {
                err += dy;
                x += sx;
            }
            if e2 <= dx {
                err += dx;
                y += sy;
            }
        }
    }

    /// Color at (x, y); transparent outside the canvas
    pub fn pixel(&self, x: u32, y: u32) -> [u8; 4] {
        if x >= self.width || y >= self.height {
            return [0; 4];
        }
        let idx = ((y as usize) * (self.width as usize) + x as usize) * 4;
        [
            self.pixels[idx],
            self.pixels[idx + 1],
            self.pixels[idx + 2],
            self.pixels[idx + 3],
        ]
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    pub fn into_pixels(self) -> Vec<u8> {
        self.pixels
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}
