pub mod cli;
pub mod config;
pub mod core;
pub mod error;
pub mod math;
pub mod traits;

pub use config::CompositorConfig;
pub use error::{CompositorError, Result};
