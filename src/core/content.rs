//! Demo layer content.

use super::canvas::{Canvas, DrawOp};
use crate::error::Result;
use crate::math::hsv_to_rgb;
use crate::traits::LayerContent;

/// Rows of comment-like blocks sliding horizontally.
///
/// Every refresh moves the blocks right by `step` pixels; once the offset
/// passes the canvas width it wraps to `-width` so blocks re-enter from the
/// left edge.
#[derive(Debug, Clone)]
pub struct ScrollingContent {
    offset: i32,
    step: i32,
    rows: u32,
    hue: f32,
}

impl ScrollingContent {
    pub fn new(step: i32) -> Self {
        Self {
            offset: 0,
            step,
            rows: 6,
            hue: 0.0,
        }
    }

    pub fn with_rows(mut self, rows: u32) -> Self {
        self.rows = rows.max(1);
        self
    }

    /// Base hue in [0, 1)
    pub fn with_hue(mut self, hue: f32) -> Self {
        self.hue = hue.rem_euclid(1.0);
        self
    }

    pub fn offset(&self) -> i32 {
        self.offset
    }

    fn advance(&mut self, width: i32) {
        self.offset += self.step;
        if self.offset > width {
            self.offset = -width;
        }
    }
}

impl Default for ScrollingContent {
    fn default() -> Self {
        Self::new(20)
    }
}

impl LayerContent for ScrollingContent {
    fn refresh(&mut self, canvas: &mut Canvas) -> Result<()> {
        let (width, height) = canvas.dimensions();
        self.advance(width as i32);

        let row_height = height / self.rows;
        if row_height == 0 {
            return Ok(());
        }
        let block_height = (row_height * 3 / 5).max(1);
        let block_width = (width / 4).max(1);

        for row in 0..self.rows {
            let hue = (self.hue + row as f32 / self.rows as f32).fract();
            let [r, g, b] = hsv_to_rgb(hue, 0.6, 0.95);
            let color = [
                (r * 255.0) as u8,
                (g * 255.0) as u8,
                (b * 255.0) as u8,
                255,
            ];

            // Stagger rows so blocks don't line up vertically
            let stagger = (row as i32 * block_width as i32 / 2) % width.max(1) as i32;
            let y = (row * row_height + (row_height - block_height) / 2) as i32;
            canvas.draw(&DrawOp::Rect {
                x: self.offset + stagger,
                y,
                width: block_width,
                height: block_height,
                color,
            });
        }
        Ok(())
    }
}
