use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use clap::Parser;
use crossbeam::channel::{self, RecvTimeoutError, Sender};
use log::{error, info, warn};
use winit::{
    application::ApplicationHandler,
    event::*,
    event_loop::{ActiveEventLoop, EventLoop, EventLoopProxy},
    keyboard::{KeyCode, PhysicalKey},
    window::{Window, WindowId},
};

use overlay_compositor::cli::Cli;
use overlay_compositor::core::{
    LayerSurface, RefreshDriver, RenderHandle, RenderThread, ScrollingContent, SoftwareBackend,
    SoftwareSurface, WgpuBackend,
};
use overlay_compositor::traits::RendererListener;
use overlay_compositor::CompositorConfig;

const SCROLL_STEP: i32 = 20;
const READY_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RendererEvent {
    Ready,
    Finished,
}

/// Forwards renderer lifecycle into the winit event loop
struct ProxyListener {
    proxy: Mutex<EventLoopProxy<RendererEvent>>,
}

impl ProxyListener {
    fn send(&self, event: RendererEvent) {
        if let Ok(proxy) = self.proxy.lock() {
            if proxy.send_event(event).is_err() {
                warn!("event loop closed; {:?} dropped", event);
            }
        }
    }
}

impl RendererListener for ProxyListener {
    fn on_ready(&self) {
        self.send(RendererEvent::Ready);
    }

    fn on_finished(&self) {
        self.send(RendererEvent::Finished);
    }
}

/// Forwards renderer lifecycle into a channel (headless mode)
struct ChannelListener(Sender<RendererEvent>);

impl ChannelListener {
    fn send(&self, event: RendererEvent) {
        if self.0.send(event).is_err() {
            warn!("lifecycle receiver gone; {:?} dropped", event);
        }
    }
}

impl RendererListener for ChannelListener {
    fn on_ready(&self) {
        self.send(RendererEvent::Ready);
    }

    fn on_finished(&self) {
        self.send(RendererEvent::Finished);
    }
}

/// Bind one scrolling demo content per layer, each with its own hue
fn start_driver(config: &CompositorConfig, surfaces: Vec<LayerSurface>) -> Result<RefreshDriver> {
    let mut driver = RefreshDriver::new(config.refresh_period());
    let count = surfaces.len().max(1);
    for (i, surface) in surfaces.into_iter().enumerate() {
        let content = ScrollingContent::new(SCROLL_STEP).with_hue(i as f32 / count as f32);
        driver.bind(surface, Box::new(content));
    }
    driver.start().context("failed to start refresh driver")?;
    Ok(driver)
}

struct App {
    config: CompositorConfig,
    proxy: EventLoopProxy<RendererEvent>,
    window: Option<Arc<Window>>,
    renderer: Option<RenderHandle>,
    driver: Option<RefreshDriver>,
}

impl App {
    fn new(config: CompositorConfig, proxy: EventLoopProxy<RendererEvent>) -> Self {
        Self {
            config,
            proxy,
            window: None,
            renderer: None,
            driver: None,
        }
    }

    fn start_renderer(&mut self, window: Arc<Window>) -> Result<RenderHandle> {
        let size = window.inner_size();
        let config = CompositorConfig {
            width: size.width.max(1),
            height: size.height.max(1),
            ..self.config.clone()
        };
        let compositor = config
            .build_compositor()
            .context("invalid compositor configuration")?;

        let mut thread = RenderThread::new(compositor, move || WgpuBackend::new(window));
        thread.set_listener(Arc::new(ProxyListener {
            proxy: Mutex::new(self.proxy.clone()),
        }));
        thread.start().context("failed to start render thread")
    }

    fn shutdown(&mut self, event_loop: &ActiveEventLoop) {
        if let Some(mut driver) = self.driver.take() {
            driver.release();
        }
        match &self.renderer {
            // The loop exits once the renderer reports it has finished
            Some(renderer) => renderer.request_shutdown(),
            None => event_loop.exit(),
        }
    }
}

impl ApplicationHandler<RendererEvent> for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }

        let window = match event_loop.create_window(
            Window::default_attributes()
                .with_title("Overlay Compositor")
                .with_inner_size(winit::dpi::LogicalSize::new(
                    self.config.width,
                    self.config.height,
                )),
        ) {
            Ok(w) => Arc::new(w),
            Err(e) => {
                error!("Failed to create window: {}", e);
                event_loop.exit();
                return;
            }
        };

        match self.start_renderer(window.clone()) {
            Ok(renderer) => self.renderer = Some(renderer),
            Err(e) => {
                error!("{:#}", e);
                event_loop.exit();
                return;
            }
        }
        self.window = Some(window);
    }

    fn user_event(&mut self, event_loop: &ActiveEventLoop, event: RendererEvent) {
        match event {
            RendererEvent::Ready => {
                let Some(renderer) = &self.renderer else {
                    return;
                };
                match start_driver(&self.config, renderer.surfaces()) {
                    Ok(driver) => self.driver = Some(driver),
                    Err(e) => {
                        error!("{:#}", e);
                        self.shutdown(event_loop);
                    }
                }
            }
            RendererEvent::Finished => {
                if let Some(mut driver) = self.driver.take() {
                    driver.release();
                }
                if let Some(renderer) = self.renderer.take() {
                    renderer.join();
                    let stats = renderer.frame_stats();
                    info!(
                        "presented {} frames for {} render requests",
                        stats.frames_presented, stats.renders_requested
                    );
                }
                event_loop.exit();
            }
        }
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        _window_id: WindowId,
        event: WindowEvent,
    ) {
        match event {
            WindowEvent::CloseRequested
            | WindowEvent::KeyboardInput {
                event:
                    KeyEvent {
                        state: ElementState::Pressed,
                        physical_key: PhysicalKey::Code(KeyCode::Escape),
                        ..
                    },
                ..
            } => self.shutdown(event_loop),
            WindowEvent::Resized(size) if size.width > 0 && size.height > 0 => {
                if let Some(renderer) = &self.renderer {
                    renderer.resize(size.width, size.height);
                }
            }
            _ => {}
        }
    }
}

fn run_windowed(config: CompositorConfig) -> Result<()> {
    let event_loop = EventLoop::<RendererEvent>::with_user_event().build()?;
    let mut app = App::new(config, event_loop.create_proxy());

    println!("Overlay Compositor - Escape to quit");
    event_loop.run_app(&mut app)?;
    Ok(())
}

/// Run the full pipeline on the CPU backend until `frames` presents
fn run_headless(config: CompositorConfig, frames: u64) -> Result<()> {
    let compositor = config
        .build_compositor()
        .context("invalid compositor configuration")?;
    let surface = SoftwareSurface::new(config.width, config.height);
    let backend_surface = surface.clone();

    let (events, lifecycle) = channel::unbounded();
    let mut thread = RenderThread::new(compositor, move || {
        Ok(SoftwareBackend::with_surface(backend_surface))
    });
    thread.set_listener(Arc::new(ChannelListener(events)));
    let renderer = thread.start().context("failed to start render thread")?;

    match lifecycle.recv_timeout(READY_TIMEOUT) {
        Ok(RendererEvent::Ready) => {}
        Ok(RendererEvent::Finished) => bail!("renderer finished during setup"),
        Err(_) => bail!("renderer did not become ready within {:?}", READY_TIMEOUT),
    }

    let mut driver = start_driver(&config, renderer.surfaces())?;
    let started = Instant::now();
    let mut finished = false;
    while surface.present_count() < frames {
        match lifecycle.recv_timeout(Duration::from_millis(10)) {
            Ok(RendererEvent::Finished) | Err(RecvTimeoutError::Disconnected) => {
                finished = true;
                break;
            }
            Ok(RendererEvent::Ready) | Err(RecvTimeoutError::Timeout) => {}
        }
    }

    driver.release();
    if !finished {
        renderer.request_shutdown();
    }
    renderer.join();

    let stats = renderer.frame_stats();
    println!(
        "Presented {} frames ({} render requests) in {:.2}s",
        stats.frames_presented,
        stats.renders_requested,
        started.elapsed().as_secs_f32()
    );
    if stats.frames_presented < frames {
        bail!(
            "renderer stopped after {} of {} frames",
            stats.frames_presented,
            frames
        );
    }
    Ok(())
}

fn main() -> Result<()> {
    env_logger::init();

    let cli = Cli::parse();
    let config = cli.resolve().context("invalid configuration")?;

    if cli.headless {
        run_headless(config, cli.frames)
    } else {
        run_windowed(config)
    }
}
