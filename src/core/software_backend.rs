//! CPU implementation of [`RenderBackend`] for headless runs.
//!
//! Rasterizes textured quads with nearest sampling and src-over blending into
//! an RGBA8 target, and presents into a [`SoftwareSurface`] the host can read
//! back. Row 0 of every buffer is the top of the image.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use glam::{Mat4, Vec2, Vec4};
use log::{debug, trace, warn};

use super::canvas::Canvas;
use crate::error::{CompositorError, Result};
use crate::math::Color;
use crate::traits::{
    uniform_block_slot, BufferId, ParamHandle, ProgramDesc, ProgramId, RenderBackend, TextureId,
    MATRIX_SLOT, PARAMS_SLOT, SAMPLER_SLOT, TEXTURE_MATRIX_SLOT,
};

struct PresentedFrame {
    width: u32,
    height: u32,
    pixels: Vec<u8>,
    presents: u64,
    present_limit: Option<u64>,
    detached: bool,
}

/// Presentation target of a [`SoftwareBackend`], shareable with the host
#[derive(Clone)]
pub struct SoftwareSurface {
    frame: Arc<Mutex<PresentedFrame>>,
}

impl SoftwareSurface {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            frame: Arc::new(Mutex::new(PresentedFrame {
                width,
                height,
                pixels: Vec::new(),
                presents: 0,
                present_limit: None,
                detached: false,
            })),
        }
    }

    /// Tear the surface down; every later present fails
    pub fn detach(&self) {
        if let Ok(mut frame) = self.frame.lock() {
            frame.detached = true;
        }
    }

    pub fn is_detached(&self) -> bool {
        self.frame.lock().map(|f| f.detached).unwrap_or(true)
    }

    /// Let `limit` presents succeed, then detach
    pub fn set_present_limit(&self, limit: Option<u64>) {
        if let Ok(mut frame) = self.frame.lock() {
            frame.present_limit = limit;
        }
    }

    pub fn present_count(&self) -> u64 {
        self.frame.lock().map(|f| f.presents).unwrap_or(0)
    }

    /// Copy of the last presented frame
    pub fn snapshot(&self) -> Option<Canvas> {
        let frame = self.frame.lock().ok()?;
        if frame.presents == 0 {
            return None;
        }
        Canvas::from_pixels(frame.width, frame.height, frame.pixels.clone()).ok()
    }

    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        let frame = self.frame.lock().ok()?;
        if frame.presents == 0 || x >= frame.width || y >= frame.height {
            return None;
        }
        let offset = ((y * frame.width + x) * 4) as usize;
        let mut rgba = [0; 4];
        rgba.copy_from_slice(&frame.pixels[offset..offset + 4]);
        Some(rgba)
    }

    fn publish(&self, width: u32, height: u32, pixels: &[u8]) -> bool {
        let Ok(mut frame) = self.frame.lock() else {
            return false;
        };
        if frame
            .present_limit
            .is_some_and(|limit| frame.presents >= limit)
        {
            frame.detached = true;
        }
        if frame.detached {
            return false;
        }
        frame.width = width;
        frame.height = height;
        frame.pixels.clear();
        frame.pixels.extend_from_slice(pixels);
        frame.presents += 1;
        true
    }
}

struct Texture {
    width: u32,
    height: u32,
    pixels: Vec<u8>,
}

impl Texture {
    /// Nearest-neighbour lookup, clamped to the edge; straight 0..=1 RGBA
    fn sample(&self, uv: Vec2) -> [f32; 4] {
        if self.width == 0 || self.height == 0 {
            return [0.0; 4];
        }
        let x = ((uv.x * self.width as f32).floor() as i64).clamp(0, self.width as i64 - 1) as usize;
        let y = ((uv.y * self.height as f32).floor() as i64).clamp(0, self.height as i64 - 1) as usize;
        let offset = (y * self.width as usize + x) * 4;
        let texel = &self.pixels[offset..offset + 4];
        [
            texel[0] as f32 / 255.0,
            texel[1] as f32 / 255.0,
            texel[2] as f32 / 255.0,
            texel[3] as f32 / 255.0,
        ]
    }
}

#[derive(Clone, Copy)]
struct Uniforms {
    matrix: Mat4,
    texture_matrix: Mat4,
    sampler_unit: u32,
    params: Vec4,
}

impl Default for Uniforms {
    fn default() -> Self {
        Self {
            matrix: Mat4::IDENTITY,
            texture_matrix: Mat4::IDENTITY,
            sampler_unit: 0,
            params: Vec4::ZERO,
        }
    }
}

struct Program {
    desc: ProgramDesc,
    uniforms: Uniforms,
}

/// Headless CPU renderer
pub struct SoftwareBackend {
    width: u32,
    height: u32,
    target: Vec<u8>,
    viewport: (u32, u32),
    textures: HashMap<TextureId, Texture>,
    buffers: HashMap<BufferId, Vec<f32>>,
    programs: HashMap<ProgramId, Program>,
    units: HashMap<u32, TextureId>,
    current_program: Option<ProgramId>,
    next_id: u32,
    surface: SoftwareSurface,
    draw_calls: u64,
    invalid_deletes: u64,
    released: bool,
}

impl SoftwareBackend {
    pub fn new(width: u32, height: u32) -> Self {
        Self::with_surface(SoftwareSurface::new(width, height))
    }

    /// Backend presenting into `surface`, sized from it
    pub fn with_surface(surface: SoftwareSurface) -> Self {
        let (width, height) = surface
            .frame
            .lock()
            .map(|f| (f.width, f.height))
            .unwrap_or((0, 0));
        Self {
            width,
            height,
            target: vec![0; (width as usize) * (height as usize) * 4],
            viewport: (width, height),
            textures: HashMap::new(),
            buffers: HashMap::new(),
            programs: HashMap::new(),
            units: HashMap::new(),
            current_program: None,
            next_id: 1,
            surface,
            draw_calls: 0,
            invalid_deletes: 0,
            released: false,
        }
    }

    pub fn surface(&self) -> SoftwareSurface {
        self.surface.clone()
    }

    pub fn target_size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Pixel of the frame being composed
    pub fn target_pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let offset = ((y * self.width + x) * 4) as usize;
        let mut rgba = [0; 4];
        rgba.copy_from_slice(&self.target[offset..offset + 4]);
        Some(rgba)
    }

    pub fn draw_calls(&self) -> u64 {
        self.draw_calls
    }

    pub fn texture_count(&self) -> usize {
        self.textures.len()
    }

    pub fn program_count(&self) -> usize {
        self.programs.len()
    }

    pub fn buffer_count(&self) -> usize {
        self.buffers.len()
    }

    /// Deletes of handles that were never created or already deleted
    pub fn invalid_deletes(&self) -> u64 {
        self.invalid_deletes
    }

    pub fn is_released(&self) -> bool {
        self.released
    }

    fn allocate_id(&mut self) -> u32 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn current_uniforms(&mut self) -> Option<&mut Uniforms> {
        let program = self.current_program?;
        self.programs.get_mut(&program).map(|p| &mut p.uniforms)
    }

    fn note_invalid_delete(&mut self, what: &str, id: u32) {
        warn!("delete of unknown {} {}", what, id);
        self.invalid_deletes += 1;
    }

    /// Rasterize the parallelogram spanned by the strip's first three vertices
    fn fill_quad(&mut self, corners: [Vec2; 3], uniforms: Uniforms, cpu_fragment: fn([f32; 4], [f32; 4]) -> [f32; 4]) {
        let Some(texture) = self
            .units
            .get(&uniforms.sampler_unit)
            .and_then(|id| self.textures.get(id))
        else {
            trace!("no texture bound to unit {}; draw skipped", uniforms.sampler_unit);
            return;
        };

        let (vw, vh) = (
            self.viewport.0.min(self.width) as f32,
            self.viewport.1.min(self.height) as f32,
        );
        let to_pixel = |a: Vec2| {
            let clip = uniforms.matrix * Vec4::new(a.x, a.y, 0.0, 1.0);
            let ndc = Vec2::new(clip.x, clip.y) / clip.w;
            Vec2::new((ndc.x + 1.0) * 0.5 * vw, (1.0 - ndc.y) * 0.5 * vh)
        };

        let origin = to_pixel(corners[0]);
        let edge_s = to_pixel(corners[1]) - origin;
        let edge_t = to_pixel(corners[2]) - origin;
        let det = edge_s.x * edge_t.y - edge_s.y * edge_t.x;
        if det.abs() < f32::EPSILON {
            return;
        }

        let points = [origin, origin + edge_s, origin + edge_t, origin + edge_s + edge_t];
        let min = points.iter().fold(Vec2::splat(f32::MAX), |m, p| m.min(*p));
        let max = points.iter().fold(Vec2::splat(f32::MIN), |m, p| m.max(*p));
        let x0 = min.x.floor().max(0.0) as u32;
        let y0 = min.y.floor().max(0.0) as u32;
        let x1 = (max.x.ceil().min(vw)).max(0.0) as u32;
        let y1 = (max.y.ceil().min(vh)).max(0.0) as u32;

        let params = uniforms.params.to_array();
        for y in y0..y1 {
            for x in x0..x1 {
                let d = Vec2::new(x as f32 + 0.5, y as f32 + 0.5) - origin;
                let s = (d.x * edge_t.y - d.y * edge_t.x) / det;
                let t = (edge_s.x * d.y - edge_s.y * d.x) / det;
                if !(0.0..1.0).contains(&s) || !(0.0..1.0).contains(&t) {
                    continue;
                }

                let attribute = corners[0] + (corners[1] - corners[0]) * s + (corners[2] - corners[0]) * t;
                let uv = uniforms.texture_matrix * Vec4::new(attribute.x, attribute.y, 0.0, 1.0);
                let color = cpu_fragment(texture.sample(Vec2::new(uv.x, uv.y)), params);

                let offset = ((y * self.width + x) * 4) as usize;
                blend_over(&mut self.target[offset..offset + 4], color);
            }
        }
    }
}

/// Straight-alpha src-over
fn blend_over(dst: &mut [u8], src: [f32; 4]) {
    let alpha = src[3].clamp(0.0, 1.0);
    let dst_alpha = dst[3] as f32 / 255.0;
    for channel in 0..3 {
        let d = dst[channel] as f32 / 255.0;
        let out = src[channel].clamp(0.0, 1.0) * alpha + d * (1.0 - alpha);
        dst[channel] = (out * 255.0).round() as u8;
    }
    dst[3] = ((alpha + dst_alpha * (1.0 - alpha)) * 255.0).round() as u8;
}

impl RenderBackend for SoftwareBackend {
    fn create_texture(&mut self, width: u32, height: u32) -> Result<TextureId> {
        if width == 0 || height == 0 {
            return Err(CompositorError::InvalidSize { width, height });
        }
        let id = TextureId(self.allocate_id());
        self.textures.insert(
            id,
            Texture {
                width,
                height,
                pixels: vec![0; (width as usize) * (height as usize) * 4],
            },
        );
        Ok(id)
    }

    fn update_texture(&mut self, texture: TextureId, width: u32, height: u32, pixels: &[u8]) -> Result<()> {
        let expected = (width as usize) * (height as usize) * 4;
        if pixels.len() != expected {
            return Err(CompositorError::BufferSizeMismatch {
                expected,
                actual: pixels.len(),
            });
        }
        let target = self
            .textures
            .get_mut(&texture)
            .ok_or_else(|| CompositorError::Backend(format!("unknown texture {}", texture.0)))?;
        target.width = width;
        target.height = height;
        target.pixels.clear();
        target.pixels.extend_from_slice(pixels);
        Ok(())
    }

    fn delete_texture(&mut self, texture: TextureId) {
        if self.textures.remove(&texture).is_none() {
            self.note_invalid_delete("texture", texture.0);
        }
        self.units.retain(|_, bound| *bound != texture);
    }

    fn create_vertex_buffer(&mut self, vertices: &[f32]) -> Result<BufferId> {
        let id = BufferId(self.allocate_id());
        self.buffers.insert(id, vertices.to_vec());
        Ok(id)
    }

    fn delete_buffer(&mut self, buffer: BufferId) {
        if self.buffers.remove(&buffer).is_none() {
            self.note_invalid_delete("buffer", buffer.0);
        }
    }

    fn create_program(&mut self, desc: &ProgramDesc) -> Result<ProgramId> {
        let id = ProgramId(self.allocate_id());
        self.programs.insert(
            id,
            Program {
                desc: *desc,
                uniforms: Uniforms::default(),
            },
        );
        debug!("created software program '{}' as {}", desc.label, id.0);
        Ok(id)
    }

    fn delete_program(&mut self, program: ProgramId) {
        if self.programs.remove(&program).is_none() {
            self.note_invalid_delete("program", program.0);
        }
        if self.current_program == Some(program) {
            self.current_program = None;
        }
    }

    fn use_program(&mut self, program: ProgramId) {
        self.current_program = Some(program);
    }

    fn parameter_location(&self, program: ProgramId, name: &str) -> Option<ParamHandle> {
        if !self.programs.contains_key(&program) {
            return None;
        }
        uniform_block_slot(name)
    }

    fn bind_texture(&mut self, unit: u32, texture: TextureId) {
        self.units.insert(unit, texture);
    }

    fn set_sampler(&mut self, handle: ParamHandle, unit: u32) {
        if handle == SAMPLER_SLOT {
            if let Some(uniforms) = self.current_uniforms() {
                uniforms.sampler_unit = unit;
            }
        }
    }

    fn set_matrix(&mut self, handle: ParamHandle, matrix: &Mat4) {
        if let Some(uniforms) = self.current_uniforms() {
            match handle {
                MATRIX_SLOT => uniforms.matrix = *matrix,
                TEXTURE_MATRIX_SLOT => uniforms.texture_matrix = *matrix,
                _ => {}
            }
        }
    }

    fn set_vec4(&mut self, handle: ParamHandle, value: Vec4) {
        if handle == PARAMS_SLOT {
            if let Some(uniforms) = self.current_uniforms() {
                uniforms.params = value;
            }
        }
    }

    fn set_viewport(&mut self, width: u32, height: u32) {
        self.viewport = (width, height);
    }

    fn clear(&mut self, color: Color) {
        let rgba = color.to_rgba8();
        for pixel in self.target.chunks_exact_mut(4) {
            pixel.copy_from_slice(&rgba);
        }
    }

    fn draw_triangle_strip(&mut self, buffer: BufferId, _position: ParamHandle, components: u32, vertex_count: u32) {
        let Some(program) = self.current_program.and_then(|id| self.programs.get(&id)) else {
            warn!("draw without a program");
            return;
        };
        let (uniforms, cpu_fragment) = (program.uniforms, program.desc.cpu_fragment);

        let Some(vertices) = self.buffers.get(&buffer) else {
            warn!("draw from unknown buffer {}", buffer.0);
            return;
        };
        let stride = components as usize;
        if stride < 2 || vertex_count < 3 || vertices.len() < stride * 3 {
            warn!("software backend only draws quads from 2D strips");
            return;
        }
        let corner = |i: usize| Vec2::new(vertices[i * stride], vertices[i * stride + 1]);
        let corners = [corner(0), corner(1), corner(2)];

        self.draw_calls += 1;
        self.fill_quad(corners, uniforms, cpu_fragment);
    }

    fn resize_surface(&mut self, width: u32, height: u32) -> Result<()> {
        if width == 0 || height == 0 {
            return Err(CompositorError::InvalidSize { width, height });
        }
        self.width = width;
        self.height = height;
        self.viewport = (width, height);
        self.target = vec![0; (width as usize) * (height as usize) * 4];
        Ok(())
    }

    fn present(&mut self) -> bool {
        if self.released {
            return false;
        }
        self.surface.publish(self.width, self.height, &self.target)
    }

    fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        self.textures.clear();
        self.buffers.clear();
        self.programs.clear();
        self.units.clear();
        self.current_program = None;
        debug!("software backend released");
    }
}
