//! Error types for the compositor.

use thiserror::Error;

/// Errors produced while configuring or running the compositor.
#[derive(Debug, Error)]
pub enum CompositorError {
    /// `start()` was called before a ready/finished listener was registered.
    #[error("renderer listener is not set; register one before calling start()")]
    MissingListener,

    #[error("render thread has already been started")]
    AlreadyStarted,

    #[error("layer {layer} is already configured")]
    AlreadyConfigured { layer: usize },

    #[error("layer {layer} has no texture; prepare() has not run")]
    NotConfigured { layer: usize },

    #[error("layout produced {actual} regions for {expected} layers")]
    LayerCountMismatch { expected: usize, actual: usize },

    #[error("invalid size {width}x{height}")]
    InvalidSize { width: u32, height: u32 },

    /// The producer tried to post into a surface whose layer was released.
    #[error("surface for layer {layer} has been released")]
    SurfaceReleased { layer: usize },

    #[error("pixel buffer size mismatch: expected {expected} bytes, got {actual}")]
    BufferSizeMismatch { expected: usize, actual: usize },

    #[error("render backend error: {0}")]
    Backend(String),

    /// Presenting frame `frame` failed; the session is over.
    #[error("present failed on frame {frame}")]
    PresentFailed { frame: u64 },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("layer content refresh failed: {0}")]
    Content(String),

    #[error("failed to spawn thread: {0}")]
    ThreadSpawn(#[from] std::io::Error),

    #[error("shared frame state lock was poisoned")]
    LockPoisoned,
}

pub type Result<T> = std::result::Result<T, CompositorError>;
