//! Compositor configuration, loadable from JSON.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::{builtin_effect, Compositor, LayerSpec};
use crate::error::{CompositorError, Result};
use crate::math::Color;
use crate::traits::EffectKind;

pub use crate::core::LayoutKind;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompositorConfig {
    pub width: u32,
    pub height: u32,
    /// `#RRGGBB` or `#AARRGGBB`
    pub background: Color,
    pub layer_count: usize,
    pub layout: LayoutKind,
    /// Effect per slot, cycled when shorter than `layer_count`
    pub effects: Vec<EffectKind>,
    /// Color used by `tint` effects; alpha is the strength
    pub tint: Color,
    pub refresh_hz: u32,
}

impl Default for CompositorConfig {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            background: Color::from_rgba8(0x53, 0x24, 0x21, 0xff),
            layer_count: 2,
            layout: LayoutKind::Split {
                ratio: 0.5,
                vertical: true,
            },
            effects: vec![EffectKind::Passthrough],
            tint: Color::from_rgba8(0xff, 0x99, 0x33, 0xcc),
            refresh_hz: 60,
        }
    }
}

impl CompositorConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| CompositorError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .map_err(|e| CompositorError::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_json_str(&json)
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| CompositorError::Config(e.to_string()))
    }

    pub fn validate(&self) -> Result<()> {
        if self.width == 0 || self.height == 0 {
            return Err(CompositorError::InvalidSize {
                width: self.width,
                height: self.height,
            });
        }
        if self.layer_count == 0 {
            return Err(CompositorError::Config("layer_count must be at least 1".into()));
        }
        if self.refresh_hz == 0 {
            return Err(CompositorError::Config("refresh_hz must be at least 1".into()));
        }
        if let LayoutKind::Split { ratio, .. } = self.layout {
            if !(0.0..=1.0).contains(&ratio) {
                return Err(CompositorError::Config(format!(
                    "split ratio {} is outside [0, 1]",
                    ratio
                )));
            }
        }
        Ok(())
    }

    pub fn effect_for(&self, slot: usize) -> EffectKind {
        if self.effects.is_empty() {
            EffectKind::Passthrough
        } else {
            self.effects[slot % self.effects.len()]
        }
    }

    pub fn refresh_period(&self) -> Duration {
        Duration::from_secs_f64(1.0 / f64::from(self.refresh_hz.max(1)))
    }

    /// Compositor with one layer per slot, each using its configured effect
    pub fn build_compositor(&self) -> Result<Compositor> {
        self.validate()?;
        let mut compositor =
            Compositor::new(self.width, self.height, self.background, self.layout.build());
        for slot in 0..self.layer_count {
            let kind = self.effect_for(slot);
            let effect = builtin_effect(kind, self.tint).ok_or_else(|| {
                CompositorError::Config(format!("no built-in implementation for effect {:?}", kind))
            })?;
            compositor.add_layer(LayerSpec::new(effect));
        }
        Ok(compositor)
    }
}
