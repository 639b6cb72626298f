//! Built-in layer effects.

use glam::Vec4;

use crate::error::Result;
use crate::math::Color;
use crate::traits::{
    CpuFragment, Effect, EffectKind, ParamHandle, ProgramDesc, ProgramId, RenderBackend,
    PARAMS_UNIFORM,
};

/// Program lifecycle shared by the built-in effects
#[derive(Debug)]
struct ShaderProgram {
    desc: ProgramDesc,
    program: Option<ProgramId>,
}

impl ShaderProgram {
    fn new(label: &'static str, fragment_entry: &'static str, cpu_fragment: CpuFragment) -> Self {
        Self {
            desc: ProgramDesc {
                label,
                fragment_entry,
                cpu_fragment,
            },
            program: None,
        }
    }

    fn prepare(&mut self, backend: &mut dyn RenderBackend) -> Result<()> {
        if self.program.is_none() {
            self.program = Some(backend.create_program(&self.desc)?);
        }
        Ok(())
    }

    fn activate(&self, backend: &mut dyn RenderBackend) {
        if let Some(program) = self.program {
            backend.use_program(program);
        }
    }

    fn parameter_handle(&self, backend: &dyn RenderBackend, name: &str) -> Option<ParamHandle> {
        self.program
            .and_then(|program| backend.parameter_location(program, name))
    }

    fn release(&mut self, backend: &mut dyn RenderBackend) {
        if let Some(program) = self.program.take() {
            backend.delete_program(program);
        }
    }
}

fn passthrough(texel: [f32; 4], _params: [f32; 4]) -> [f32; 4] {
    texel
}

fn grayscale(texel: [f32; 4], _params: [f32; 4]) -> [f32; 4] {
    let luma = 0.299 * texel[0] + 0.587 * texel[1] + 0.114 * texel[2];
    [luma, luma, luma, texel[3]]
}

/// Multiplies rgb by the tint color, blended by the tint's alpha
fn tint(texel: [f32; 4], params: [f32; 4]) -> [f32; 4] {
    let mix = |c: f32, t: f32| c + (c * t - c) * params[3];
    [
        mix(texel[0], params[0]),
        mix(texel[1], params[1]),
        mix(texel[2], params[2]),
        texel[3],
    ]
}

/// Draws the layer texture unchanged
#[derive(Debug)]
pub struct PassthroughEffect {
    shader: ShaderProgram,
}

impl PassthroughEffect {
    pub fn new() -> Self {
        Self {
            shader: ShaderProgram::new("passthrough", "fs_passthrough", passthrough),
        }
    }
}

impl Default for PassthroughEffect {
    fn default() -> Self {
        Self::new()
    }
}

impl Effect for PassthroughEffect {
    fn kind(&self) -> EffectKind {
        EffectKind::Passthrough
    }

    fn prepare(&mut self, backend: &mut dyn RenderBackend) -> Result<()> {
        self.shader.prepare(backend)
    }

    fn activate(&self, backend: &mut dyn RenderBackend) {
        self.shader.activate(backend);
    }

    fn parameter_handle(&self, backend: &dyn RenderBackend, name: &str) -> Option<ParamHandle> {
        self.shader.parameter_handle(backend, name)
    }

    fn bind_uniform(&self, _backend: &mut dyn RenderBackend) {}

    fn release(&mut self, backend: &mut dyn RenderBackend) {
        self.shader.release(backend);
    }
}

/// Luma-weighted grayscale
#[derive(Debug)]
pub struct GrayscaleEffect {
    shader: ShaderProgram,
}

impl GrayscaleEffect {
    pub fn new() -> Self {
        Self {
            shader: ShaderProgram::new("grayscale", "fs_grayscale", grayscale),
        }
    }
}

impl Default for GrayscaleEffect {
    fn default() -> Self {
        Self::new()
    }
}

impl Effect for GrayscaleEffect {
    fn kind(&self) -> EffectKind {
        EffectKind::Grayscale
    }

    fn prepare(&mut self, backend: &mut dyn RenderBackend) -> Result<()> {
        self.shader.prepare(backend)
    }

    fn activate(&self, backend: &mut dyn RenderBackend) {
        self.shader.activate(backend);
    }

    fn parameter_handle(&self, backend: &dyn RenderBackend, name: &str) -> Option<ParamHandle> {
        self.shader.parameter_handle(backend, name)
    }

    fn bind_uniform(&self, _backend: &mut dyn RenderBackend) {}

    fn release(&mut self, backend: &mut dyn RenderBackend) {
        self.shader.release(backend);
    }
}

/// Multiplicative color tint. All tint slots share the first instance's color.
#[derive(Debug)]
pub struct TintEffect {
    shader: ShaderProgram,
    color: Color,
}

impl TintEffect {
    pub fn new(color: Color) -> Self {
        Self {
            shader: ShaderProgram::new("tint", "fs_tint", tint),
            color,
        }
    }

    pub fn color(&self) -> Color {
        self.color
    }
}

impl Effect for TintEffect {
    fn kind(&self) -> EffectKind {
        EffectKind::Tint
    }

    fn prepare(&mut self, backend: &mut dyn RenderBackend) -> Result<()> {
        self.shader.prepare(backend)
    }

    fn activate(&self, backend: &mut dyn RenderBackend) {
        self.shader.activate(backend);
    }

    fn parameter_handle(&self, backend: &dyn RenderBackend, name: &str) -> Option<ParamHandle> {
        self.shader.parameter_handle(backend, name)
    }

    fn bind_uniform(&self, backend: &mut dyn RenderBackend) {
        if let Some(handle) = self.parameter_handle(backend, PARAMS_UNIFORM) {
            backend.set_vec4(handle, Vec4::from_array(self.color.to_array()));
        }
    }

    fn release(&mut self, backend: &mut dyn RenderBackend) {
        self.shader.release(backend);
    }
}

/// Instantiate a built-in effect; `Custom` kinds have no built-in implementation
pub fn builtin_effect(kind: EffectKind, tint_color: Color) -> Option<Box<dyn Effect>> {
    match kind {
        EffectKind::Passthrough => Some(Box::new(PassthroughEffect::new())),
        EffectKind::Grayscale => Some(Box::new(GrayscaleEffect::new())),
        EffectKind::Tint => Some(Box::new(TintEffect::new(tint_color))),
        EffectKind::Custom(_) => None,
    }
}
