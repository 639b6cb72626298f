use crate::math::Rect;

/// Maps the output rectangle onto one display region per layer slot
pub trait LayoutStrategy: Send {
    /// Must return exactly `count` rectangles, each inside `bounds`.
    /// Pure: identical inputs give identical regions.
    fn partition(&self, bounds: Rect, count: usize) -> Vec<Rect>;

    /// Short name for logs
    fn name(&self) -> &str {
        "custom"
    }
}
