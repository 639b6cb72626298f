mod common;

use common::{post_solid, Call, MockBackend};
use glam::Mat4;
use overlay_compositor::core::{
    Columns, Compositor, FullScreen, GrayscaleEffect, LayerSpec, PassthroughEffect, Rows,
    SoftwareBackend, TintEffect,
};
use overlay_compositor::error::CompositorError;
use overlay_compositor::math::{Color, Rect};
use overlay_compositor::traits::{RenderBackend, PARAMS_SLOT, POSITION_SLOT, TEXTURE_MATRIX_SLOT};

const RED: [u8; 4] = [255, 0, 0, 255];
const GREEN: [u8; 4] = [0, 255, 0, 255];
const BLUE: [u8; 4] = [0, 0, 255, 255];

fn background() -> Color {
    Color::from_rgba8(0x53, 0x24, 0x21, 0xff)
}

fn passthrough() -> LayerSpec {
    LayerSpec::new(Box::new(PassthroughEffect::new()))
}

// ============================================================================
// Setup
// ============================================================================

#[test]
fn test_prepare_allocates_one_texture_per_layer() {
    let (mut backend, log) = MockBackend::new();
    let mut compositor = Compositor::new(100, 50, background(), Box::new(Columns));
    compositor.add_layer(passthrough());
    compositor.add_layer(passthrough());
    compositor.add_layer(LayerSpec::new(Box::new(GrayscaleEffect::new())).with_content_size(640, 480));

    compositor.prepare(&mut backend).unwrap();

    assert!(compositor.is_prepared());
    assert_eq!(compositor.surfaces().len(), 3);
    assert_eq!(log.count(|c| matches!(c, Call::CreateProgram { .. })), 2);
    assert_eq!(log.count(|c| matches!(c, Call::CreateBuffer(_))), 1);

    let sizes: Vec<(u32, u32)> = log
        .calls()
        .iter()
        .filter_map(|c| match c {
            Call::CreateTexture { width, height, .. } => Some((*width, *height)),
            _ => None,
        })
        .collect();
    // Region-sized by default: 100/3 rounds to 33
    assert_eq!(sizes, vec![(33, 50), (33, 50), (640, 480)]);
}

#[test]
fn test_prepare_rejects_zero_output() {
    let (mut backend, _log) = MockBackend::new();
    let mut compositor = Compositor::new(0, 50, background(), Box::new(Columns));
    compositor.add_layer(passthrough());
    assert!(matches!(
        compositor.prepare(&mut backend),
        Err(CompositorError::InvalidSize { width: 0, height: 50 })
    ));
}

#[test]
fn test_compose_before_prepare_fails() {
    let (mut backend, log) = MockBackend::new();
    let mut compositor = Compositor::new(10, 10, background(), Box::new(FullScreen));
    compositor.add_layer(passthrough());
    assert!(compositor.compose(&mut backend).is_err());
    assert!(log.calls().is_empty());
}

// ============================================================================
// Draw sequence
// ============================================================================

#[test]
fn test_compose_draws_every_layer_in_order() {
    let (mut backend, log) = MockBackend::new();
    let mut compositor = Compositor::new(100, 50, background(), Box::new(Rows));
    compositor.add_layer(passthrough());
    compositor.add_layer(LayerSpec::new(Box::new(TintEffect::new(Color::WHITE))));
    compositor.prepare(&mut backend).unwrap();

    let textures: Vec<_> = (0..2)
        .map(|i| compositor.layer(i).and_then(|l| l.texture()).unwrap())
        .collect();
    log.clear();

    compositor.compose(&mut backend).unwrap();
    let calls = log.calls();

    assert_eq!(calls[0], Call::SetViewport(100, 50));
    assert_eq!(calls[1], Call::Clear(background()));

    let bound: Vec<_> = calls
        .iter()
        .filter_map(|c| match c {
            Call::BindTexture { unit: 0, texture } => Some(*texture),
            _ => None,
        })
        .collect();
    assert_eq!(bound, textures);

    let draws: Vec<_> = calls
        .iter()
        .enumerate()
        .filter(|(_, c)| matches!(c, Call::Draw { .. }))
        .map(|(i, _)| i)
        .collect();
    assert_eq!(draws.len(), 2);
    for &i in &draws {
        assert!(matches!(calls[i], Call::Draw { components: 2, vertex_count: 4, .. }));
        // Position and sampling matrices are uploaded before every draw
        assert!(matches!(calls[i - 1], Call::SetMatrix { .. }));
        assert!(matches!(calls[i - 2], Call::SetMatrix { handle, .. } if handle == TEXTURE_MATRIX_SLOT));
    }

    // Only the tint slot uploads effect params, after activating its program
    let params: Vec<_> = calls
        .iter()
        .enumerate()
        .filter(|(_, c)| matches!(c, Call::SetVec4 { handle, .. } if *handle == PARAMS_SLOT))
        .map(|(i, _)| i)
        .collect();
    assert_eq!(params.len(), 1);
    assert!(params[0] > draws[0] && params[0] < draws[1]);
    assert!(matches!(calls[params[0] - 1], Call::UseProgram(_)));
}

#[test]
fn test_draw_uses_position_attribute_handle() {
    let (mut backend, _log) = MockBackend::new();
    let mut compositor = Compositor::new(10, 10, background(), Box::new(FullScreen));
    compositor.add_layer(passthrough());
    compositor.prepare(&mut backend).unwrap();

    let handles = compositor.effects().handles(0).unwrap();
    assert_eq!(handles.position_attribute, POSITION_SLOT);
}

#[test]
fn test_producer_transform_reaches_texture_matrix() {
    let (mut backend, log) = MockBackend::new();
    let mut compositor = Compositor::new(10, 10, background(), Box::new(FullScreen));
    // 20x10 content in a square region samples the middle half horizontally
    compositor.add_layer(passthrough().with_content_size(20, 10));
    compositor.prepare(&mut backend).unwrap();

    let mut raw = Mat4::from_rotation_z(std::f32::consts::FRAC_PI_2).to_cols_array();
    raw[14] = 0.5;
    let surface = compositor.surfaces()[0].clone();
    surface.set_transform(Mat4::from_cols_array(&raw)).unwrap();
    post_solid(&surface, RED);

    compositor.update_textures(&mut backend).unwrap();
    log.clear();
    compositor.compose(&mut backend).unwrap();

    let uploaded = log
        .calls()
        .iter()
        .find_map(|c| match c {
            Call::SetMatrix { handle, matrix } if *handle == TEXTURE_MATRIX_SLOT => Some(*matrix),
            _ => None,
        })
        .unwrap();

    let mut expected = raw;
    expected[0] = 0.5;
    expected[5] = 1.0;
    expected[12] = 0.25;
    expected[13] = 0.0;
    assert_eq!(uploaded, Mat4::from_cols_array(&expected));
    // Rotation terms survive untouched
    assert_eq!(uploaded.to_cols_array()[1], raw[1]);
    assert_eq!(uploaded.to_cols_array()[4], raw[4]);
    assert_eq!(uploaded.to_cols_array()[14], 0.5);
}

// ============================================================================
// Pixels (software backend)
// ============================================================================

#[test]
fn test_later_layers_draw_over_earlier_ones() {
    let mut backend = SoftwareBackend::new(8, 8);
    let mut compositor = Compositor::new(8, 8, background(), Box::new(FullScreen));
    for _ in 0..3 {
        compositor.add_layer(passthrough());
    }
    compositor.prepare(&mut backend).unwrap();

    let surfaces = compositor.surfaces().to_vec();
    post_solid(&surfaces[0], RED);
    post_solid(&surfaces[1], GREEN);
    post_solid(&surfaces[2], BLUE);

    assert_eq!(compositor.update_textures(&mut backend).unwrap(), 3);
    compositor.compose(&mut backend).unwrap();

    assert_eq!(backend.draw_calls(), 3);
    for (x, y) in [(0, 0), (3, 4), (7, 7)] {
        assert_eq!(backend.target_pixel(x, y), Some(BLUE));
    }
}

#[test]
fn test_columns_show_each_layer_in_its_region() {
    let mut backend = SoftwareBackend::new(8, 4);
    let mut compositor = Compositor::new(8, 4, background(), Box::new(Columns));
    compositor.add_layer(passthrough());
    compositor.add_layer(passthrough());
    compositor.prepare(&mut backend).unwrap();

    let surfaces = compositor.surfaces().to_vec();
    post_solid(&surfaces[0], RED);
    post_solid(&surfaces[1], BLUE);
    compositor.update_textures(&mut backend).unwrap();
    compositor.compose(&mut backend).unwrap();

    for y in 0..4 {
        for x in 0..4 {
            assert_eq!(backend.target_pixel(x, y), Some(RED), "({}, {})", x, y);
            assert_eq!(backend.target_pixel(x + 4, y), Some(BLUE), "({}, {})", x + 4, y);
        }
    }
}

#[test]
fn test_transparent_layers_show_background() {
    let mut backend = SoftwareBackend::new(4, 4);
    let mut compositor = Compositor::new(4, 4, background(), Box::new(FullScreen));
    compositor.add_layer(passthrough());
    compositor.prepare(&mut backend).unwrap();

    compositor.update_textures(&mut backend).unwrap();
    compositor.compose(&mut backend).unwrap();
    assert_eq!(backend.target_pixel(2, 2), Some([0x53, 0x24, 0x21, 0xff]));
}

#[test]
fn test_grayscale_and_tint_effects_change_pixels() {
    let mut backend = SoftwareBackend::new(4, 2);
    let mut compositor = Compositor::new(4, 2, Color::BLACK, Box::new(Columns));
    compositor.add_layer(LayerSpec::new(Box::new(GrayscaleEffect::new())));
    compositor.add_layer(LayerSpec::new(Box::new(TintEffect::new(Color::new(0.5, 1.0, 1.0, 1.0)))));
    compositor.prepare(&mut backend).unwrap();

    let surfaces = compositor.surfaces().to_vec();
    post_solid(&surfaces[0], RED);
    post_solid(&surfaces[1], [255, 255, 255, 255]);
    compositor.update_textures(&mut backend).unwrap();
    compositor.compose(&mut backend).unwrap();

    // 0.299 * 255 = 76.2
    assert_eq!(backend.target_pixel(0, 0), Some([76, 76, 76, 255]));
    assert_eq!(backend.target_pixel(3, 1), Some([128, 255, 255, 255]));
}

// ============================================================================
// Resize and teardown
// ============================================================================

#[test]
fn test_resize_recomputes_regions() {
    let mut backend = SoftwareBackend::new(100, 50);
    let mut compositor = Compositor::new(100, 50, background(), Box::new(Columns));
    compositor.add_layer(passthrough());
    compositor.add_layer(passthrough());
    compositor.prepare(&mut backend).unwrap();

    compositor.resize(200, 100).unwrap();
    assert_eq!(compositor.size(), (200, 100));
    assert_eq!(compositor.layout().region(1), Some(Rect::new(100.0, 0.0, 200.0, 100.0)));
    let layer = compositor.layer(1).unwrap();
    assert_eq!(layer.display_region(), Rect::new(100.0, 0.0, 200.0, 100.0));
    // 50x50 content now fills a 100x100 region without cropping
    assert_eq!(layer.sampling_region(), Rect::UNIT);

    assert!(matches!(
        compositor.resize(0, 10),
        Err(CompositorError::InvalidSize { .. })
    ));
    assert_eq!(compositor.size(), (200, 100));
}

#[test]
fn test_resize_before_prepare_only_stores_size() {
    let mut compositor = Compositor::new(10, 10, background(), Box::new(Columns));
    compositor.add_layer(passthrough());
    compositor.resize(20, 30).unwrap();
    assert_eq!(compositor.size(), (20, 30));
    assert!(compositor.layout().regions().is_empty());
}

#[test]
fn test_teardown_releases_everything_once() {
    let mut backend = SoftwareBackend::new(16, 16);
    let mut compositor = Compositor::new(16, 16, background(), Box::new(Columns));
    compositor.add_layer(passthrough());
    compositor.add_layer(passthrough());
    compositor.add_layer(LayerSpec::new(Box::new(GrayscaleEffect::new())));
    compositor.prepare(&mut backend).unwrap();
    let surfaces = compositor.surfaces().to_vec();

    assert_eq!(backend.texture_count(), 3);
    assert_eq!(backend.program_count(), 2);
    assert_eq!(backend.buffer_count(), 1);

    compositor.teardown(&mut backend);
    compositor.teardown(&mut backend);

    assert_eq!(backend.texture_count(), 0);
    assert_eq!(backend.program_count(), 0);
    assert_eq!(backend.buffer_count(), 0);
    assert_eq!(backend.invalid_deletes(), 0);
    assert!(!compositor.is_prepared());
    assert!(surfaces.iter().all(|s| s.is_released()));
    assert!(compositor.compose(&mut backend).is_err());
}

#[test]
fn test_teardown_releases_effects_before_layers() {
    let (mut backend, log) = MockBackend::new();
    let mut compositor = Compositor::new(10, 10, background(), Box::new(FullScreen));
    compositor.add_layer(passthrough());
    compositor.prepare(&mut backend).unwrap();
    log.clear();

    compositor.teardown(&mut backend);
    let calls = log.calls();
    assert!(matches!(calls.as_slice(), [
        Call::DeleteProgram(_),
        Call::DeleteTexture(_),
        Call::DeleteBuffer(_)
    ]));

    backend.release();
    compositor.teardown(&mut backend);
    assert_eq!(log.calls().len(), 4);
}
