use serde::{Deserialize, Serialize};

use super::backend::{ParamHandle, RenderBackend};
use crate::error::Result;

pub const TEXTURE_SAMPLER_UNIFORM: &str = "sTexture";
pub const TEXTURE_MATRIX_UNIFORM: &str = "uTextureMatrix";
pub const MATRIX_UNIFORM: &str = "uMatrix";
pub const POSITION_ATTRIBUTE: &str = "aPosition";
pub const PARAMS_UNIFORM: &str = "uParams";

/// Identity of an effect type. Slots whose effects share a kind share one program.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EffectKind {
    Passthrough,
    Grayscale,
    Tint,
    /// Effect implemented outside this crate, keyed by a caller-chosen id
    #[serde(skip)]
    Custom(u32),
}

/// Post-processing effect applied while drawing one layer slot.
///
/// The compositor drives the lifecycle: `prepare` once on the render thread,
/// then per draw `activate`, handle lookups and `bind_uniform`, and finally
/// `release`, which must tolerate repeated calls.
pub trait Effect: Send {
    fn kind(&self) -> EffectKind;

    fn prepare(&mut self, backend: &mut dyn RenderBackend) -> Result<()>;

    fn activate(&self, backend: &mut dyn RenderBackend);

    fn parameter_handle(&self, backend: &dyn RenderBackend, name: &str) -> Option<ParamHandle>;

    /// Upload effect-specific uniforms for the next draw
    fn bind_uniform(&self, backend: &mut dyn RenderBackend);

    fn release(&mut self, backend: &mut dyn RenderBackend);
}
