use log::debug;
use serde::{Deserialize, Serialize};

use crate::error::{CompositorError, Result};
use crate::math::Rect;
use crate::traits::LayoutStrategy;

/// Every slot gets the whole output; later slots draw over earlier ones
#[derive(Debug, Clone, Copy, Default)]
pub struct FullScreen;

impl LayoutStrategy for FullScreen {
    fn partition(&self, bounds: Rect, count: usize) -> Vec<Rect> {
        vec![bounds; count]
    }

    fn name(&self) -> &str {
        "full_screen"
    }
}

/// Equal-width vertical strips, left to right
#[derive(Debug, Clone, Copy, Default)]
pub struct Columns;

impl LayoutStrategy for Columns {
    fn partition(&self, bounds: Rect, count: usize) -> Vec<Rect> {
        (0..count)
            .map(|i| {
                Rect::new(
                    edge(bounds.left, bounds.right, i, count),
                    bounds.top,
                    edge(bounds.left, bounds.right, i + 1, count),
                    bounds.bottom,
                )
            })
            .collect()
    }

    fn name(&self) -> &str {
        "columns"
    }
}

/// Equal-height horizontal strips, top to bottom
#[derive(Debug, Clone, Copy, Default)]
pub struct Rows;

impl LayoutStrategy for Rows {
    fn partition(&self, bounds: Rect, count: usize) -> Vec<Rect> {
        (0..count)
            .map(|i| {
                Rect::new(
                    bounds.left,
                    edge(bounds.top, bounds.bottom, i, count),
                    bounds.right,
                    edge(bounds.top, bounds.bottom, i + 1, count),
                )
            })
            .collect()
    }

    fn name(&self) -> &str {
        "rows"
    }
}

/// Row-major grid with `ceil(sqrt(count))` columns
#[derive(Debug, Clone, Copy, Default)]
pub struct Grid;

impl LayoutStrategy for Grid {
    fn partition(&self, bounds: Rect, count: usize) -> Vec<Rect> {
        if count == 0 {
            return Vec::new();
        }
        let columns = (count as f64).sqrt().ceil() as usize;
        let rows = count.div_ceil(columns);

        (0..count)
            .map(|i| {
                let (col, row) = (i % columns, i / columns);
                Rect::new(
                    edge(bounds.left, bounds.right, col, columns),
                    edge(bounds.top, bounds.bottom, row, rows),
                    edge(bounds.left, bounds.right, col + 1, columns),
                    edge(bounds.top, bounds.bottom, row + 1, rows),
                )
            })
            .collect()
    }

    fn name(&self) -> &str {
        "grid"
    }
}

/// One dividing line at `ratio` of the output. Slots past the second reuse
/// the second region.
#[derive(Debug, Clone, Copy)]
pub struct Split {
    pub ratio: f32,
    /// Vertical line (side by side) when true, horizontal line (stacked) otherwise
    pub vertical: bool,
}

impl Default for Split {
    fn default() -> Self {
        Self {
            ratio: 0.5,
            vertical: true,
        }
    }
}

impl LayoutStrategy for Split {
    fn partition(&self, bounds: Rect, count: usize) -> Vec<Rect> {
        if count <= 1 {
            return vec![bounds; count];
        }
        let ratio = self.ratio.clamp(0.0, 1.0);
        let (first, second) = if self.vertical {
            let x = bounds.left + bounds.width() * ratio;
            (
                Rect::new(bounds.left, bounds.top, x, bounds.bottom),
                Rect::new(x, bounds.top, bounds.right, bounds.bottom),
            )
        } else {
            let y = bounds.top + bounds.height() * ratio;
            (
                Rect::new(bounds.left, bounds.top, bounds.right, y),
                Rect::new(bounds.left, y, bounds.right, bounds.bottom),
            )
        };

        let mut regions = vec![first];
        regions.resize(count, second);
        regions
    }

    fn name(&self) -> &str {
        "split"
    }
}

/// i-th of n equal divisions of [start, end]; the last edge is exactly `end`
fn edge(start: f32, end: f32, i: usize, n: usize) -> f32 {
    if i >= n {
        end
    } else {
        start + (end - start) * i as f32 / n as f32
    }
}

/// Serializable choice of built-in layout strategy
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum LayoutKind {
    FullScreen,
    Columns,
    Rows,
    Grid,
    Split { ratio: f32, vertical: bool },
}

impl Default for LayoutKind {
    fn default() -> Self {
        Self::Columns
    }
}

impl LayoutKind {
    pub fn build(self) -> Box<dyn LayoutStrategy> {
        match self {
            Self::FullScreen => Box::new(FullScreen),
            Self::Columns => Box::new(Columns),
            Self::Rows => Box::new(Rows),
            Self::Grid => Box::new(Grid),
            Self::Split { ratio, vertical } => Box::new(Split { ratio, vertical }),
        }
    }
}

/// Caches the current partition of the output surface
pub struct LayoutEngine {
    strategy: Box<dyn LayoutStrategy>,
    bounds: Rect,
    regions: Vec<Rect>,
}

impl LayoutEngine {
    pub fn new(strategy: Box<dyn LayoutStrategy>) -> Self {
        Self {
            strategy,
            bounds: Rect::ZERO,
            regions: Vec::new(),
        }
    }

    /// Re-partition for a new output size. Fails if the strategy breaks the
    /// one-region-per-layer contract.
    pub fn relayout(&mut self, width: u32, height: u32, count: usize) -> Result<&[Rect]> {
        let bounds = Rect::from_size(width as f32, height as f32);
        let regions = self.strategy.partition(bounds, count);
        if regions.len() != count {
            return Err(CompositorError::LayerCountMismatch {
                expected: count,
                actual: regions.len(),
            });
        }

        debug!(
            "layout '{}' partitioned {}x{} into {} regions",
            self.strategy.name(),
            width,
            height,
            count
        );
        self.bounds = bounds;
        self.regions = regions;
        Ok(&self.regions)
    }

    pub fn region(&self, index: usize) -> Option<Rect> {
        self.regions.get(index).copied()
    }

    pub fn regions(&self) -> &[Rect] {
        &self.regions
    }

    pub fn bounds(&self) -> Rect {
        self.bounds
    }

    pub fn strategy_name(&self) -> &str {
        self.strategy.name()
    }
}
