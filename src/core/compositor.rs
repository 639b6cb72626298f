use glam::Mat4;
use log::{debug, info};

use super::effect_chain::EffectChain;
use super::layout::LayoutEngine;
use super::overlay_layer::OverlayLayer;
use super::surface::LayerSurface;
use crate::error::{CompositorError, Result};
use crate::math::{orthographic_projection, top_left_view, Color};
use crate::traits::{BufferId, Effect, LayoutStrategy, RenderBackend};

/// Unit quad as a triangle strip: (0,0) (1,0) (0,1) (1,1)
pub const QUAD_VERTICES: [f32; 8] = [0.0, 0.0, 1.0, 0.0, 0.0, 1.0, 1.0, 1.0];

const QUAD_COMPONENTS: u32 = 2;
const QUAD_VERTEX_COUNT: u32 = 4;

/// Registration of one layer slot
pub struct LayerSpec {
    pub effect: Box<dyn Effect>,
    /// Producer canvas size; defaults to the slot's display region size
    pub content_size: Option<(u32, u32)>,
}

impl LayerSpec {
    pub fn new(effect: Box<dyn Effect>) -> Self {
        Self {
            effect,
            content_size: None,
        }
    }

    pub fn with_content_size(mut self, width: u32, height: u32) -> Self {
        self.content_size = Some((width, height));
        self
    }
}

/// Draws every layer into the output surface.
///
/// Layers are registered before the render thread starts; everything after
/// [`prepare`](Self::prepare) must happen on the thread that owns `backend`.
pub struct Compositor {
    width: u32,
    height: u32,
    background: Color,
    layout: LayoutEngine,
    layers: Vec<OverlayLayer>,
    content_sizes: Vec<Option<(u32, u32)>>,
    effects: EffectChain,
    vertex_buffer: Option<BufferId>,
    projection: Mat4,
    view: Mat4,
    surfaces: Vec<LayerSurface>,
    prepared: bool,
    torn_down: bool,
}

impl Compositor {
    pub fn new(width: u32, height: u32, background: Color, layout: Box<dyn LayoutStrategy>) -> Self {
        Self {
            width,
            height,
            background,
            layout: LayoutEngine::new(layout),
            layers: Vec::new(),
            content_sizes: Vec::new(),
            effects: EffectChain::new(),
            vertex_buffer: None,
            projection: Mat4::IDENTITY,
            view: Mat4::IDENTITY,
            surfaces: Vec::new(),
            prepared: false,
            torn_down: false,
        }
    }

    /// Register a layer slot; returns its index (also its draw order)
    pub fn add_layer(&mut self, spec: LayerSpec) -> usize {
        let index = self.layers.len();
        self.layers.push(OverlayLayer::new(index));
        self.content_sizes.push(spec.content_size);
        self.effects.push(spec.effect);
        index
    }

    /// One-time GPU setup: effect programs, quad geometry, one texture per
    /// layer, and the projection/view pair.
    pub fn prepare(&mut self, backend: &mut dyn RenderBackend) -> Result<()> {
        if self.width == 0 || self.height == 0 {
            return Err(CompositorError::InvalidSize {
                width: self.width,
                height: self.height,
            });
        }

        self.effects.prepare(backend)?;
        if self.vertex_buffer.is_none() {
            self.vertex_buffer = Some(backend.create_vertex_buffer(&QUAD_VERTICES)?);
        }

        let regions = self
            .layout
            .relayout(self.width, self.height, self.layers.len())?
            .to_vec();

        self.surfaces.clear();
        for ((layer, region), content_size) in
            self.layers.iter_mut().zip(regions).zip(&self.content_sizes)
        {
            layer.set_display_region(region);
            let (width, height) = content_size.unwrap_or((
                (region.width().round() as u32).max(1),
                (region.height().round() as u32).max(1),
            ));
            let surface = layer.configure(backend, width, height)?;
            self.surfaces.push(surface);
        }

        self.update_matrices();
        self.effects.resolve_handles(backend)?;
        self.prepared = true;
        self.torn_down = false;

        info!(
            "compositor prepared: {}x{}, {} layers, {} distinct effects, layout '{}'",
            self.width,
            self.height,
            self.layers.len(),
            self.effects.distinct_len(),
            self.layout.strategy_name()
        );
        Ok(())
    }

    /// Pull the newest posted frame of every layer into its texture.
    /// Returns how many textures changed.
    pub fn update_textures(&mut self, backend: &mut dyn RenderBackend) -> Result<usize> {
        let mut updated = 0;
        for layer in &mut self.layers {
            if layer.update_texture(backend)? {
                updated += 1;
            }
        }
        Ok(updated)
    }

    /// Clear to the background and draw each layer into its region, in
    /// registration order.
    pub fn compose(&mut self, backend: &mut dyn RenderBackend) -> Result<()> {
        let vertex_buffer = match self.vertex_buffer {
            Some(buffer) if self.prepared => buffer,
            _ => return Err(CompositorError::NotConfigured { layer: 0 }),
        };

        backend.set_viewport(self.width, self.height);
        backend.clear(self.background);

        for (slot, layer) in self.layers.iter_mut().enumerate() {
            let region = self.layout.region(slot).ok_or(CompositorError::LayerCountMismatch {
                expected: slot + 1,
                actual: self.layout.regions().len(),
            })?;
            if layer.display_region() != region {
                layer.set_display_region(region);
            }

            let (Some(effect), Some(handles)) = (self.effects.effect(slot), self.effects.handles(slot))
            else {
                return Err(CompositorError::NotConfigured { layer: slot });
            };

            effect.activate(backend);
            effect.bind_uniform(backend);
            layer.bind_for_draw(backend, handles.sampler, handles.texture_matrix);
            layer.bind_transform(backend, handles.position_matrix, &self.view, &self.projection);
            backend.draw_triangle_strip(
                vertex_buffer,
                handles.position_attribute,
                QUAD_COMPONENTS,
                QUAD_VERTEX_COUNT,
            );
        }
        Ok(())
    }

    /// Adopt a new output size, re-partition the layout and recompute every
    /// layer's sampling region
    pub fn resize(&mut self, width: u32, height: u32) -> Result<()> {
        if width == 0 || height == 0 {
            return Err(CompositorError::InvalidSize { width, height });
        }
        self.width = width;
        self.height = height;
        self.update_matrices();

        if self.prepared {
            let regions = self.layout.relayout(width, height, self.layers.len())?;
            for (layer, region) in self.layers.iter_mut().zip(regions) {
                layer.set_display_region(*region);
            }
        }
        debug!("compositor resized to {}x{}", width, height);
        Ok(())
    }

    /// Release effects, then layers, then geometry. Later calls do nothing.
    pub fn teardown(&mut self, backend: &mut dyn RenderBackend) {
        if self.torn_down {
            return;
        }
        self.torn_down = true;
        self.prepared = false;

        self.effects.release(backend);
        for layer in &mut self.layers {
            layer.release(backend);
        }
        if let Some(buffer) = self.vertex_buffer.take() {
            backend.delete_buffer(buffer);
        }

        self.effects.clear();
        self.layers.clear();
        self.content_sizes.clear();
        self.surfaces.clear();
        debug!("compositor torn down");
    }

    fn update_matrices(&mut self) {
        self.projection = orthographic_projection(self.width as f32, self.height as f32);
        self.view = top_left_view(self.height as f32);
    }

    /// Producer handles, one per layer, valid after `prepare`
    pub fn surfaces(&self) -> &[LayerSurface] {
        &self.surfaces
    }

    pub fn layer(&self, index: usize) -> Option<&OverlayLayer> {
        self.layers.get(index)
    }

    pub fn layer_count(&self) -> usize {
        self.layers.len()
    }

    /// Generation of the last frame uploaded for each layer
    pub fn layer_generations(&self) -> Vec<u64> {
        self.layers.iter().map(|l| l.uploaded_generation()).collect()
    }

    pub fn effects(&self) -> &EffectChain {
        &self.effects
    }

    pub fn layout(&self) -> &LayoutEngine {
        &self.layout
    }

    pub fn background(&self) -> Color {
        self.background
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn projection(&self) -> Mat4 {
        self.projection
    }

    pub fn view(&self) -> Mat4 {
        self.view
    }

    pub fn is_prepared(&self) -> bool {
        self.prepared
    }
}
