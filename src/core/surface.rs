use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use glam::Mat4;

use super::canvas::Canvas;
use crate::error::{CompositorError, Result};

/// Called with the layer index whenever a new frame is posted
pub type FrameAvailableListener = Box<dyn Fn(usize) + Send + Sync>;

#[derive(Default)]
struct PostedFrame {
    /// Latest posted pixels (and their transform) not yet pulled by the render thread
    pending: Option<(Vec<u8>, Mat4)>,
    /// Buffer handed back by the consumer for the next `lock_canvas`
    spare: Option<Vec<u8>>,
    /// Attached to every frame posted from now on
    transform: Mat4,
    generation: u64,
}

/// Newest posted frame, as pulled by the render thread
pub(crate) struct LatestFrame {
    pub generation: u64,
    pub pixels: Vec<u8>,
    pub transform: Mat4,
}

struct SurfaceShared {
    layer: usize,
    width: u32,
    height: u32,
    frame: Mutex<PostedFrame>,
    listener: Mutex<Option<FrameAvailableListener>>,
    released: AtomicBool,
}

/// Producer side of a layer's texture.
///
/// Cloneable and thread-safe: the refresh driver draws into a canvas from
/// [`lock_canvas`](Self::lock_canvas) and publishes it with [`post`](Self::post);
/// the render thread pulls the newest posted frame into the GPU texture.
/// Frames posted faster than they are pulled replace each other, so only the
/// latest content is ever uploaded.
#[derive(Clone)]
pub struct LayerSurface {
    shared: Arc<SurfaceShared>,
}

impl LayerSurface {
    pub(crate) fn new(layer: usize, width: u32, height: u32) -> Self {
        Self {
            shared: Arc::new(SurfaceShared {
                layer,
                width,
                height,
                frame: Mutex::new(PostedFrame::default()),
                listener: Mutex::new(None),
                released: AtomicBool::new(false),
            }),
        }
    }

    pub fn layer(&self) -> usize {
        self.shared.layer
    }

    pub fn size(&self) -> (u32, u32) {
        (self.shared.width, self.shared.height)
    }

    pub fn is_released(&self) -> bool {
        self.shared.released.load(Ordering::Acquire)
    }

    /// Number of frames posted so far
    pub fn generation(&self) -> u64 {
        self.shared.frame.lock().map(|f| f.generation).unwrap_or(0)
    }

    /// Transparent canvas sized to the layer's content
    pub fn lock_canvas(&self) -> Result<Canvas> {
        self.ensure_live()?;
        let (width, height) = self.size();

        let spare = self
            .shared
            .frame
            .lock()
            .map_err(|_| CompositorError::LockPoisoned)?
            .spare
            .take();

        match spare {
            Some(mut pixels) => {
                pixels.fill(0);
                Canvas::from_pixels(width, height, pixels)
            }
            None => Ok(Canvas::new(width, height)),
        }
    }

    /// Publish `canvas` as the layer's newest content and notify the listener
    pub fn post(&self, canvas: Canvas) -> Result<()> {
        self.ensure_live()?;
        if canvas.dimensions() != self.size() {
            let (width, height) = self.size();
            return Err(CompositorError::BufferSizeMismatch {
                expected: (width as usize) * (height as usize) * 4,
                actual: canvas.pixels().len(),
            });
        }

        {
            let mut frame = self
                .shared
                .frame
                .lock()
                .map_err(|_| CompositorError::LockPoisoned)?;
            let transform = frame.transform;
            if let Some((stale, _)) = frame.pending.replace((canvas.into_pixels(), transform)) {
                frame.spare = Some(stale);
            }
            frame.generation += 1;
        }

        // Notify outside the frame lock; the listener only enqueues a message.
        if let Ok(listener) = self.shared.listener.lock() {
            if let Some(notify) = listener.as_ref() {
                notify(self.shared.layer);
            }
        }
        Ok(())
    }

    /// Texture transform reported with every later frame, e.g. the producer's
    /// rotation. Its scale and translation are replaced by the layer's
    /// sampling rectangle when drawn.
    pub fn set_transform(&self, transform: Mat4) -> Result<()> {
        self.ensure_live()?;
        self.shared
            .frame
            .lock()
            .map_err(|_| CompositorError::LockPoisoned)?
            .transform = transform;
        Ok(())
    }

    pub fn transform(&self) -> Mat4 {
        self.shared
            .frame
            .lock()
            .map(|f| f.transform)
            .unwrap_or(Mat4::IDENTITY)
    }

    fn ensure_live(&self) -> Result<()> {
        if self.is_released() {
            Err(CompositorError::SurfaceReleased {
                layer: self.shared.layer,
            })
        } else {
            Ok(())
        }
    }

    pub(crate) fn set_frame_available_listener(&self, listener: Option<FrameAvailableListener>) {
        if let Ok(mut slot) = self.shared.listener.lock() {
            *slot = listener;
        }
    }

    /// Take the pending frame if one was posted after generation `seen`
    pub(crate) fn take_latest(&self, seen: u64) -> Option<LatestFrame> {
        let mut frame = self.shared.frame.lock().ok()?;
        if frame.generation <= seen {
            return None;
        }
        let generation = frame.generation;
        frame.pending.take().map(|(pixels, transform)| LatestFrame {
            generation,
            pixels,
            transform,
        })
    }

    /// Hand an uploaded buffer back for reuse by the producer
    pub(crate) fn recycle(&self, pixels: Vec<u8>) {
        if let Ok(mut frame) = self.shared.frame.lock() {
            if frame.spare.is_none() {
                frame.spare = Some(pixels);
            }
        }
    }

    /// Detach from the render thread; later posts fail with `SurfaceReleased`
    pub(crate) fn release(&self) {
        if self.shared.released.swap(true, Ordering::AcqRel) {
            return;
        }
        self.set_frame_available_listener(None);
        if let Ok(mut frame) = self.shared.frame.lock() {
            frame.pending = None;
            frame.spare = None;
        }
    }
}

impl fmt::Debug for LayerSurface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LayerSurface")
            .field("layer", &self.shared.layer)
            .field("width", &self.shared.width)
            .field("height", &self.shared.height)
            .field("released", &self.is_released())
            .finish()
    }
}
