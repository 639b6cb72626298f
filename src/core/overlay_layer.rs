use glam::Mat4;
use log::trace;

use super::surface::LayerSurface;
use crate::error::{CompositorError, Result};
use crate::math::{position_matrix, sampling_matrix, Rect};
use crate::traits::{ParamHandle, RenderBackend, TextureId};

/// Texture unit every layer samples from
const LAYER_TEXTURE_UNIT: u32 = 0;

/// Normalized texture rectangle that aspect-fit-covers `display` with content
/// of `content_width x content_height`.
///
/// The content is scaled until its shorter side (relative to the display)
/// fills the display exactly; the overflowing axis is cropped symmetrically.
/// Offsets are normalized by the scaled content size, so the result always
/// lies inside [0, 1] x [0, 1]. Degenerate sizes sample the whole texture.
pub fn sampling_region(content_width: u32, content_height: u32, display: &Rect) -> Rect {
    let (content_w, content_h) = (content_width as f32, content_height as f32);
    let (display_w, display_h) = (display.width(), display.height());
    if content_w <= 0.0 || content_h <= 0.0 || display_w <= 0.0 || display_h <= 0.0 {
        return Rect::UNIT;
    }

    let scale = if content_w * display_h > display_w * content_h {
        display_h / content_h
    } else {
        display_w / content_w
    };

    let scaled_w = content_w * scale;
    let scaled_h = content_h * scale;
    let offset_w = ((scaled_w - display_w) / 2.0).max(0.0);
    let offset_h = ((scaled_h - display_h) / 2.0).max(0.0);

    Rect::new(
        offset_w / scaled_w,
        offset_h / scaled_h,
        (scaled_w - offset_w) / scaled_w,
        (scaled_h - offset_h) / scaled_h,
    )
}

/// One composited layer: its GPU texture, the producer surface feeding it,
/// and where on the output it is drawn.
///
/// Lives on the render thread. The texture and surface are allocated by
/// [`configure`](Self::configure) and freed only by [`release`](Self::release).
#[derive(Debug)]
pub struct OverlayLayer {
    index: usize,
    texture: Option<TextureId>,
    surface: Option<LayerSurface>,
    content_size: (u32, u32),
    display_region: Rect,
    sampling_region: Rect,
    raw_transform: Mat4,
    uploaded_generation: u64,
    configured: bool,
    released: bool,
}

impl OverlayLayer {
    pub fn new(index: usize) -> Self {
        Self {
            index,
            texture: None,
            surface: None,
            content_size: (0, 0),
            display_region: Rect::ZERO,
            sampling_region: Rect::UNIT,
            raw_transform: Mat4::IDENTITY,
            uploaded_generation: 0,
            configured: false,
            released: false,
        }
    }

    /// Allocate the texture and its producer surface. Allowed once per layer.
    pub fn configure(
        &mut self,
        backend: &mut dyn RenderBackend,
        width: u32,
        height: u32,
    ) -> Result<LayerSurface> {
        if self.configured {
            return Err(CompositorError::AlreadyConfigured { layer: self.index });
        }
        if width == 0 || height == 0 {
            return Err(CompositorError::InvalidSize { width, height });
        }

        let texture = backend.create_texture(width, height)?;
        let surface = LayerSurface::new(self.index, width, height);

        self.texture = Some(texture);
        self.surface = Some(surface.clone());
        self.content_size = (width, height);
        self.configured = true;
        self.sampling_region = sampling_region(width, height, &self.display_region);
        Ok(surface)
    }

    pub fn set_display_region(&mut self, region: Rect) {
        self.display_region = region;
        let (width, height) = self.content_size;
        self.sampling_region = sampling_region(width, height, &region);
    }

    /// Upload the newest posted frame, if any. Returns whether the texture changed.
    pub fn update_texture(&mut self, backend: &mut dyn RenderBackend) -> Result<bool> {
        let (Some(texture), Some(surface)) = (self.texture, self.surface.as_ref()) else {
            return Ok(false);
        };
        let Some(latest) = surface.take_latest(self.uploaded_generation) else {
            return Ok(false);
        };

        let (width, height) = self.content_size;
        backend.update_texture(texture, width, height, &latest.pixels)?;
        surface.recycle(latest.pixels);
        trace!("layer {} uploaded generation {}", self.index, latest.generation);
        self.uploaded_generation = latest.generation;
        self.raw_transform = latest.transform;
        Ok(true)
    }

    /// Bind the texture and upload the sampling transform
    pub fn bind_for_draw(
        &self,
        backend: &mut dyn RenderBackend,
        sampler: ParamHandle,
        sample_transform: ParamHandle,
    ) {
        let Some(texture) = self.texture else {
            return;
        };
        backend.bind_texture(LAYER_TEXTURE_UNIT, texture);
        backend.set_sampler(sampler, LAYER_TEXTURE_UNIT);
        backend.set_matrix(
            sample_transform,
            &sampling_matrix(&self.raw_transform, &self.sampling_region),
        );
    }

    /// Upload projection * view * translate(region origin) * scale(region size)
    pub fn bind_transform(
        &self,
        backend: &mut dyn RenderBackend,
        position: ParamHandle,
        view: &Mat4,
        projection: &Mat4,
    ) {
        backend.set_matrix(
            position,
            &position_matrix(&self.display_region, view, projection),
        );
    }

    /// Release the producer surface, then the texture. Later calls do nothing.
    pub fn release(&mut self, backend: &mut dyn RenderBackend) {
        if self.released {
            return;
        }
        self.released = true;

        if let Some(surface) = self.surface.take() {
            surface.release();
        }
        if let Some(texture) = self.texture.take() {
            backend.delete_texture(texture);
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn texture(&self) -> Option<TextureId> {
        self.texture
    }

    pub fn surface(&self) -> Option<&LayerSurface> {
        self.surface.as_ref()
    }

    pub fn content_size(&self) -> (u32, u32) {
        self.content_size
    }

    pub fn display_region(&self) -> Rect {
        self.display_region
    }

    pub fn sampling_region(&self) -> Rect {
        self.sampling_region
    }

    /// Producer transform of the last uploaded frame
    pub fn raw_transform(&self) -> Mat4 {
        self.raw_transform
    }

    pub fn uploaded_generation(&self) -> u64 {
        self.uploaded_generation
    }

    pub fn is_released(&self) -> bool {
        self.released
    }
}
