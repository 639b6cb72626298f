use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam::channel::{self, RecvTimeoutError, Sender};
use log::{debug, error, info, warn};

use super::surface::LayerSurface;
use crate::error::{CompositorError, Result};
use crate::traits::LayerContent;

/// ~60 Hz
pub const DEFAULT_REFRESH_PERIOD: Duration = Duration::from_millis(16);

struct Binding {
    surface: LayerSurface,
    content: Box<dyn LayerContent>,
}

impl Binding {
    fn tick(&mut self) -> Result<()> {
        let mut canvas = self.surface.lock_canvas()?;
        self.content.refresh(&mut canvas)?;
        self.surface.post(canvas)
    }
}

struct Worker {
    stop: Sender<()>,
    thread: JoinHandle<()>,
}

/// Periodic loop repainting every bound layer, in bind order, on its own
/// thread.
///
/// Not synchronized with the render thread: each post fires the layer's
/// frame-available signal and that is the only coupling. A failing refresh
/// stops the loop for good.
pub struct RefreshDriver {
    period: Duration,
    bindings: Vec<Binding>,
    worker: Option<Worker>,
    released: bool,
}

impl RefreshDriver {
    pub fn new(period: Duration) -> Self {
        Self {
            period,
            bindings: Vec::new(),
            worker: None,
            released: false,
        }
    }

    /// Driver ticking `hz` times per second
    pub fn with_rate(hz: u32) -> Self {
        Self::new(Duration::from_secs_f64(1.0 / f64::from(hz.max(1))))
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Attach `content` to `surface`. Ignored once the driver is running.
    pub fn bind(&mut self, surface: LayerSurface, content: Box<dyn LayerContent>) {
        if self.worker.is_some() || self.released {
            warn!(
                "refresh driver already started; binding for layer {} ignored",
                surface.layer()
            );
            return;
        }
        self.bindings.push(Binding { surface, content });
    }

    pub fn start(&mut self) -> Result<()> {
        if self.worker.is_some() || self.released {
            return Err(CompositorError::AlreadyStarted);
        }

        let (stop, stop_rx) = channel::bounded::<()>(1);
        let mut bindings = std::mem::take(&mut self.bindings);
        let period = self.period;

        let thread = thread::Builder::new()
            .name("overlay-refresh".to_string())
            .spawn(move || {
                info!(
                    "refresh driver started: {} layers every {:?}",
                    bindings.len(),
                    period
                );
                loop {
                    let tick_start = Instant::now();
                    for binding in &mut bindings {
                        if let Err(err) = binding.tick() {
                            let layer = binding.surface.layer();
                            match err {
                                CompositorError::SurfaceReleased { .. } => {
                                    info!("layer {} released, refresh driver stopping", layer)
                                }
                                _ => error!(
                                    "refresh of layer {} failed, refresh driver stopping: {}",
                                    layer, err
                                ),
                            }
                            return;
                        }
                    }

                    let wait = period.saturating_sub(tick_start.elapsed());
                    match stop_rx.recv_timeout(wait) {
                        Err(RecvTimeoutError::Timeout) => continue,
                        _ => break,
                    }
                }
                debug!("refresh driver stopped");
            })?;

        self.worker = Some(Worker { stop, thread });
        Ok(())
    }

    /// Whether the loop thread is still ticking
    pub fn is_running(&self) -> bool {
        self.worker
            .as_ref()
            .is_some_and(|worker| !worker.thread.is_finished())
    }

    /// Stop the loop and wait for it; observed within one tick. Later calls do nothing.
    pub fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        self.bindings.clear();

        if let Some(worker) = self.worker.take() {
            // Fails only if the loop already ended on its own
            let _ = worker.stop.try_send(());
            if worker.thread.join().is_err() {
                warn!("refresh driver thread panicked");
            }
        }
    }
}

impl Default for RefreshDriver {
    fn default() -> Self {
        Self::new(DEFAULT_REFRESH_PERIOD)
    }
}

impl Drop for RefreshDriver {
    fn drop(&mut self) {
        self.release();
    }
}
