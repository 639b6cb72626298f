// cli.rs - Command-line interface configuration
use std::path::PathBuf;

use clap::{Parser, ValueEnum};

use crate::config::{CompositorConfig, LayoutKind};
use crate::error::Result;
use crate::math::Color;
use crate::traits::EffectKind;

#[derive(Parser, Debug, Clone)]
#[command(name = "overlay-compositor")]
#[command(about = "Composites scrolling overlay layers on a dedicated render thread", long_about = None)]
pub struct Cli {
    /// JSON configuration file; other flags override its values
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Number of overlay layers
    #[arg(long)]
    pub layers: Option<usize>,

    #[arg(long, value_enum)]
    pub layout: Option<LayoutArg>,

    /// Background color as #RRGGBB or #AARRGGBB
    #[arg(long)]
    pub background: Option<Color>,

    /// Effect per layer slot; repeat to assign several (cycled over the layers)
    #[arg(long = "effect", value_enum)]
    pub effects: Vec<EffectArg>,

    #[arg(long)]
    pub refresh_hz: Option<u32>,

    #[arg(long)]
    pub width: Option<u32>,

    #[arg(long)]
    pub height: Option<u32>,

    /// Render with the CPU backend, without a window
    #[arg(long, default_value = "false")]
    pub headless: bool,

    /// Frames to present before exiting in headless mode
    #[arg(long, default_value_t = 120)]
    pub frames: u64,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayoutArg {
    FullScreen,
    Columns,
    Rows,
    Grid,
    Split,
}

impl From<LayoutArg> for LayoutKind {
    fn from(arg: LayoutArg) -> Self {
        match arg {
            LayoutArg::FullScreen => LayoutKind::FullScreen,
            LayoutArg::Columns => LayoutKind::Columns,
            LayoutArg::Rows => LayoutKind::Rows,
            LayoutArg::Grid => LayoutKind::Grid,
            LayoutArg::Split => LayoutKind::Split {
                ratio: 0.5,
                vertical: true,
            },
        }
    }
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum EffectArg {
    Passthrough,
    Grayscale,
    Tint,
}

impl From<EffectArg> for EffectKind {
    fn from(arg: EffectArg) -> Self {
        match arg {
            EffectArg::Passthrough => EffectKind::Passthrough,
            EffectArg::Grayscale => EffectKind::Grayscale,
            EffectArg::Tint => EffectKind::Tint,
        }
    }
}

impl Cli {
    /// Load the config file (or defaults) and apply flag overrides
    pub fn resolve(&self) -> Result<CompositorConfig> {
        let mut config = match &self.config {
            Some(path) => CompositorConfig::from_json_file(path)?,
            None => CompositorConfig::default(),
        };

        if let Some(layers) = self.layers {
            config.layer_count = layers;
        }
        if let Some(layout) = self.layout {
            config.layout = layout.into();
        }
        if let Some(background) = self.background {
            config.background = background;
        }
        if !self.effects.is_empty() {
            config.effects = self.effects.iter().map(|&e| e.into()).collect();
        }
        if let Some(hz) = self.refresh_hz {
            config.refresh_hz = hz;
        }
        if let Some(width) = self.width {
            config.width = width;
        }
        if let Some(height) = self.height {
            config.height = height;
        }

        config.validate()?;
        Ok(config)
    }
}
