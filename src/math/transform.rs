use glam::{Mat4, Vec3};

use super::rect::Rect;

/// Orthographic projection over (0, width) x (0, height) with GPU's bottom-left origin
pub fn orthographic_projection(width: f32, height: f32) -> Mat4 {
    Mat4::orthographic_rh_gl(0.0, width, 0.0, height, -1.0, 1.0)
}

/// Flips Y and shifts by `height` so display coordinates have a top-left origin
pub fn top_left_view(height: f32) -> Mat4 {
    Mat4::from_translation(Vec3::new(0.0, height, 0.0)) * Mat4::from_scale(Vec3::new(1.0, -1.0, 1.0))
}

/// Maps the unit quad onto `region`: projection * view * translate(origin) * scale(size)
pub fn position_matrix(region: &Rect, view: &Mat4, projection: &Mat4) -> Mat4 {
    let placed = *view
        * Mat4::from_translation(Vec3::new(region.left, region.top, 0.0))
        * Mat4::from_scale(Vec3::new(region.width(), region.height(), 1.0));
    *projection * placed
}

/// Overwrites the scale and translation of `raw` with the sampling rectangle.
/// Every other component (rotation metadata from the producer) passes through.
pub fn sampling_matrix(raw: &Mat4, sampling: &Rect) -> Mat4 {
    let mut cols = raw.to_cols_array();
    cols[0] = sampling.width();
    cols[5] = sampling.height();
    cols[12] = sampling.left;
    cols[13] = sampling.top;
    Mat4::from_cols_array(&cols)
}
