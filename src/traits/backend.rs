use glam::{Mat4, Vec4};

use crate::error::Result;
use crate::math::Color;

use super::effect::{
    MATRIX_UNIFORM, PARAMS_UNIFORM, POSITION_ATTRIBUTE, TEXTURE_MATRIX_UNIFORM,
    TEXTURE_SAMPLER_UNIFORM,
};

/// GPU texture owned by a backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureId(pub u32);

/// GPU vertex buffer owned by a backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferId(pub u32);

/// Linked shader program owned by a backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProgramId(pub u32);

/// Location of a uniform or attribute inside a program
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ParamHandle(pub u32);

/// CPU equivalent of a fragment stage: (sampled texel, effect params) -> output color.
/// All channels are straight (non-premultiplied) 0..=1 RGBA.
pub type CpuFragment = fn([f32; 4], [f32; 4]) -> [f32; 4];

/// Everything a backend needs to build one effect program
#[derive(Debug, Clone, Copy)]
pub struct ProgramDesc {
    pub label: &'static str,
    /// Fragment entry point inside the overlay WGSL module
    pub fragment_entry: &'static str,
    pub cpu_fragment: CpuFragment,
}

/// Handle-based GPU API the compositor drives.
///
/// Implementations are created on, and never leave, the render thread. State
/// follows the usual immediate-mode model: `use_program` selects the program
/// that subsequent `set_*` calls and the next draw apply to.
pub trait RenderBackend {
    fn create_texture(&mut self, width: u32, height: u32) -> Result<TextureId>;

    /// Replace the full contents of `texture` with tightly packed RGBA8 rows
    fn update_texture(&mut self, texture: TextureId, width: u32, height: u32, pixels: &[u8]) -> Result<()>;

    fn delete_texture(&mut self, texture: TextureId);

    fn create_vertex_buffer(&mut self, vertices: &[f32]) -> Result<BufferId>;

    fn delete_buffer(&mut self, buffer: BufferId);

    fn create_program(&mut self, desc: &ProgramDesc) -> Result<ProgramId>;

    fn delete_program(&mut self, program: ProgramId);

    fn use_program(&mut self, program: ProgramId);

    fn parameter_location(&self, program: ProgramId, name: &str) -> Option<ParamHandle>;

    fn bind_texture(&mut self, unit: u32, texture: TextureId);

    fn set_sampler(&mut self, handle: ParamHandle, unit: u32);

    fn set_matrix(&mut self, handle: ParamHandle, matrix: &Mat4);

    fn set_vec4(&mut self, handle: ParamHandle, value: Vec4);

    fn set_viewport(&mut self, width: u32, height: u32);

    fn clear(&mut self, color: Color);

    /// Draw `vertex_count` vertices from `buffer` as a triangle strip, feeding
    /// `components` floats per vertex into the `position` attribute
    fn draw_triangle_strip(&mut self, buffer: BufferId, position: ParamHandle, components: u32, vertex_count: u32);

    fn resize_surface(&mut self, width: u32, height: u32) -> Result<()>;

    /// Swap the composed frame to the presentation surface. `false` means the
    /// surface is gone and the session cannot continue.
    fn present(&mut self) -> bool;

    /// Drop the context and presentation surface. Idempotent.
    fn release(&mut self);
}

pub const MATRIX_SLOT: ParamHandle = ParamHandle(0);
pub const TEXTURE_MATRIX_SLOT: ParamHandle = ParamHandle(1);
pub const SAMPLER_SLOT: ParamHandle = ParamHandle(2);
pub const POSITION_SLOT: ParamHandle = ParamHandle(3);
pub const PARAMS_SLOT: ParamHandle = ParamHandle(4);

/// Slot layout of the per-draw uniform block shared by the built-in backends
pub fn uniform_block_slot(name: &str) -> Option<ParamHandle> {
    match name {
        MATRIX_UNIFORM => Some(MATRIX_SLOT),
        TEXTURE_MATRIX_UNIFORM => Some(TEXTURE_MATRIX_SLOT),
        TEXTURE_SAMPLER_UNIFORM => Some(SAMPLER_SLOT),
        POSITION_ATTRIBUTE => Some(POSITION_SLOT),
        PARAMS_UNIFORM => Some(PARAMS_SLOT),
        _ => None,
    }
}
