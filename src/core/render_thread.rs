//! Dedicated thread owning the GPU context.
//!
//! All GPU work is serialized through one message loop. Producers and the
//! host talk to it only through a [`RenderHandle`], which posts messages and
//! never touches GPU state. Consecutive render requests are coalesced into a
//! single compose pass.

use std::marker::PhantomData;
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use crossbeam::channel::{self, Receiver, Sender};
use log::{debug, error, info, trace, warn};

use super::compositor::Compositor;
use super::surface::LayerSurface;
use crate::error::{CompositorError, Result};
use crate::traits::{RenderBackend, RendererListener};

const THREAD_NAME: &str = "overlay-renderer";

/// Messages handled by the render loop, in arrival order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderMessage {
    /// New content is available on some layer
    RenderNow,
    Resize(u32, u32),
    Shutdown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderState {
    Uninitialized,
    ContextReady,
    Running,
    ShuttingDown,
    Terminated,
}

/// Counters updated under the frame lock once per compose+present cycle
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FrameStats {
    pub frames_presented: u64,
    /// Render-now messages received, including coalesced ones
    pub renders_requested: u64,
    /// Generation of the last uploaded frame, per layer
    pub layer_generations: Vec<u64>,
}

struct Shared {
    state: Mutex<RenderState>,
    frame: Mutex<FrameStats>,
    surfaces: Mutex<Vec<LayerSurface>>,
}

impl Shared {
    fn new() -> Self {
        Self {
            state: Mutex::new(RenderState::Uninitialized),
            frame: Mutex::new(FrameStats::default()),
            surfaces: Mutex::new(Vec::new()),
        }
    }

    fn set_state(&self, state: RenderState) {
        if let Ok(mut current) = self.state.lock() {
            trace!("render state {:?} -> {:?}", *current, state);
            *current = state;
        }
    }
}

/// Builder for the render thread.
///
/// `factory` runs on the new thread and creates the backend there, so the
/// GPU context is never observed by any other thread.
pub struct RenderThread<B, F> {
    compositor: Option<Compositor>,
    factory: Option<F>,
    listener: Option<Arc<dyn RendererListener>>,
    _backend: PhantomData<fn() -> B>,
}

impl<B, F> RenderThread<B, F>
where
    B: RenderBackend + 'static,
    F: FnOnce() -> Result<B> + Send + 'static,
{
    pub fn new(compositor: Compositor, factory: F) -> Self {
        Self {
            compositor: Some(compositor),
            factory: Some(factory),
            listener: None,
            _backend: PhantomData,
        }
    }

    pub fn set_listener(&mut self, listener: Arc<dyn RendererListener>) {
        self.listener = Some(listener);
    }

    /// Spawn the render thread.
    ///
    /// Fails without spawning anything when no listener is registered.
    /// Readiness is reported through [`RendererListener::on_ready`]; layer
    /// surfaces are available from the handle only after that.
    pub fn start(&mut self) -> Result<RenderHandle> {
        let listener = self.listener.clone().ok_or(CompositorError::MissingListener)?;
        let (Some(compositor), Some(factory)) = (self.compositor.take(), self.factory.take()) else {
            return Err(CompositorError::AlreadyStarted);
        };

        let (sender, receiver) = channel::unbounded();
        let shared = Arc::new(Shared::new());

        let worker = Worker {
            compositor,
            listener,
            receiver,
            sender: sender.clone(),
            shared: shared.clone(),
        };

        let thread = thread::Builder::new()
            .name(THREAD_NAME.to_string())
            .spawn(move || worker.run(factory))?;

        Ok(RenderHandle {
            inner: Arc::new(HandleInner {
                sender,
                shared,
                thread: Mutex::new(Some(thread)),
            }),
        })
    }
}

/// Cloneable, thread-safe handle to a running render thread.
///
/// Messages sent after the thread has terminated are dropped. Dropping the
/// last clone requests shutdown; it does not wait for the thread.
#[derive(Clone)]
pub struct RenderHandle {
    inner: Arc<HandleInner>,
}

struct HandleInner {
    sender: Sender<RenderMessage>,
    shared: Arc<Shared>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for HandleInner {
    fn drop(&mut self) {
        // The worker and surface listeners keep their own senders alive
        if self.sender.send(RenderMessage::Shutdown).is_ok() {
            debug!("last render handle dropped; shutting down");
        }
    }
}

impl RenderHandle {
    /// Request a compose pass because `layer` has new content
    pub fn notify_content_available(&self, layer: usize) {
        trace!("content available on layer {}", layer);
        self.send(RenderMessage::RenderNow);
    }

    /// Stop after any already-queued render requests
    pub fn request_shutdown(&self) {
        self.send(RenderMessage::Shutdown);
    }

    pub fn resize(&self, width: u32, height: u32) {
        self.send(RenderMessage::Resize(width, height));
    }

    fn send(&self, message: RenderMessage) {
        if self.inner.sender.send(message).is_err() {
            debug!("renderer terminated; dropping {:?}", message);
        }
    }

    pub fn state(&self) -> RenderState {
        self.inner
            .shared
            .state
            .lock()
            .map(|state| *state)
            .unwrap_or(RenderState::Terminated)
    }

    pub fn frame_stats(&self) -> FrameStats {
        self.inner
            .shared
            .frame
            .lock()
            .map(|stats| stats.clone())
            .unwrap_or_default()
    }

    /// Producer surfaces, one per layer. Empty before ready and after finish.
    pub fn surfaces(&self) -> Vec<LayerSurface> {
        self.inner
            .shared
            .surfaces
            .lock()
            .map(|surfaces| surfaces.clone())
            .unwrap_or_default()
    }

    pub fn surface(&self, layer: usize) -> Option<LayerSurface> {
        self.surfaces().into_iter().nth(layer)
    }

    /// Wait for the thread to exit. Returns false if it panicked. Must not be
    /// called from a listener callback.
    pub fn join(&self) -> bool {
        let thread = match self.inner.thread.lock() {
            Ok(mut slot) => slot.take(),
            Err(_) => return false,
        };
        match thread {
            Some(thread) => thread.join().is_ok(),
            None => true,
        }
    }
}

struct Worker {
    compositor: Compositor,
    listener: Arc<dyn RendererListener>,
    receiver: Receiver<RenderMessage>,
    sender: Sender<RenderMessage>,
    shared: Arc<Shared>,
}

impl Worker {
    fn run<B, F>(mut self, factory: F)
    where
        B: RenderBackend,
        F: FnOnce() -> Result<B>,
    {
        info!("render thread starting");
        let mut backend = match factory() {
            Ok(backend) => backend,
            Err(err) => {
                error!("failed to create render backend: {}", err);
                self.finish::<B>(None);
                return;
            }
        };
        self.shared.set_state(RenderState::ContextReady);

        if let Err(err) = self.compositor.prepare(&mut backend) {
            error!("compositor setup failed: {}", err);
            self.finish(Some(&mut backend));
            return;
        }
        self.publish_surfaces();

        self.shared.set_state(RenderState::Running);
        info!("render thread ready");
        self.listener.on_ready();

        self.message_loop(&mut backend);
        self.finish(Some(&mut backend));
    }

    /// Route every surface's frame-available signal into this thread's queue
    fn publish_surfaces(&self) {
        let surfaces = self.compositor.surfaces().to_vec();
        for surface in &surfaces {
            let sender = self.sender.clone();
            surface.set_frame_available_listener(Some(Box::new(move |layer| {
                if sender.send(RenderMessage::RenderNow).is_err() {
                    debug!("renderer terminated; dropping frame signal from layer {}", layer);
                }
            })));
        }
        if let Ok(mut published) = self.shared.surfaces.lock() {
            *published = surfaces;
        }
    }

    fn message_loop<B: RenderBackend>(&mut self, backend: &mut B) {
        let mut deferred: Option<RenderMessage> = None;
        loop {
            let message = match deferred.take() {
                Some(message) => message,
                None => match self.receiver.recv() {
                    Ok(message) => message,
                    Err(_) => RenderMessage::Shutdown,
                },
            };

            match message {
                RenderMessage::RenderNow => {
                    let mut requests = 1;
                    // Drain queued renders up to the next non-render message
                    while let Ok(next) = self.receiver.try_recv() {
                        if next == RenderMessage::RenderNow {
                            requests += 1;
                        } else {
                            deferred = Some(next);
                            break;
                        }
                    }
                    if requests > 1 {
                        trace!("coalesced {} render requests", requests);
                    }

                    if let Err(err) = self.render_frame(backend, requests) {
                        match err {
                            CompositorError::PresentFailed { .. } => {
                                error!("present failed, shutting down renderer: {}", err)
                            }
                            _ => error!("render pass failed, shutting down renderer: {}", err),
                        }
                        return;
                    }
                }
                RenderMessage::Resize(width, height) => {
                    if let Err(err) = self.resize(backend, width, height) {
                        error!("resize to {}x{} failed, shutting down renderer: {}", width, height, err);
                        return;
                    }
                }
                RenderMessage::Shutdown => {
                    info!("render thread received shutdown");
                    return;
                }
            }
        }
    }

    /// One compose+present cycle under the frame lock
    fn render_frame<B: RenderBackend>(&mut self, backend: &mut B, requests: u64) -> Result<()> {
        let mut stats = self
            .shared
            .frame
            .lock()
            .map_err(|_| CompositorError::LockPoisoned)?;
        stats.renders_requested += requests;

        self.compositor.update_textures(backend)?;
        self.compositor.compose(backend)?;
        if !backend.present() {
            return Err(CompositorError::PresentFailed {
                frame: stats.frames_presented + 1,
            });
        }

        stats.frames_presented += 1;
        stats.layer_generations = self.compositor.layer_generations();
        Ok(())
    }

    fn resize<B: RenderBackend>(&mut self, backend: &mut B, width: u32, height: u32) -> Result<()> {
        let _frame = self
            .shared
            .frame
            .lock()
            .map_err(|_| CompositorError::LockPoisoned)?;
        backend.resize_surface(width, height)?;
        self.compositor.resize(width, height)
    }

    fn finish<B: RenderBackend>(&mut self, backend: Option<&mut B>) {
        self.shared.set_state(RenderState::ShuttingDown);
        match backend {
            Some(backend) => {
                self.compositor.teardown(backend);
                backend.release();
            }
            None => warn!("no render backend to release"),
        }
        if let Ok(mut surfaces) = self.shared.surfaces.lock() {
            surfaces.clear();
        }

        self.shared.set_state(RenderState::Terminated);
        info!("render thread finished");
        self.listener.on_finished();
    }
}
