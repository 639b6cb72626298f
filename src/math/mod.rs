mod color;
mod rect;
mod transform;

pub use color::{hsv_to_rgb, Color};
pub use rect::Rect;
pub use transform::{orthographic_projection, position_matrix, sampling_matrix, top_left_view};
