pub mod canvas;
pub mod compositor;
pub mod content;
pub mod effect_chain;
pub mod effects;
pub mod layout;
pub mod overlay_layer;
pub mod refresh_driver;
pub mod render_thread;
pub mod software_backend;
pub mod surface;
pub mod wgpu_backend;

pub use canvas::{Canvas, DrawOp};
pub use compositor::{Compositor, LayerSpec, QUAD_VERTICES};
pub use content::ScrollingContent;
pub use effect_chain::{EffectChain, SlotHandles};
pub use effects::{builtin_effect, GrayscaleEffect, PassthroughEffect, TintEffect};
pub use layout::{Columns, FullScreen, Grid, LayoutEngine, LayoutKind, Rows, Split};
pub use overlay_layer::{sampling_region, OverlayLayer};
pub use refresh_driver::{RefreshDriver, DEFAULT_REFRESH_PERIOD};
pub use render_thread::{FrameStats, RenderHandle, RenderMessage, RenderState, RenderThread};
pub use software_backend::{SoftwareBackend, SoftwareSurface};
pub use surface::{FrameAvailableListener, LayerSurface};
pub use wgpu_backend::WgpuBackend;
