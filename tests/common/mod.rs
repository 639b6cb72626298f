#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crossbeam::channel::{self, Receiver, Sender};
use glam::{Mat4, Vec4};
use overlay_compositor::core::{Canvas, DrawOp, LayerSurface};
use overlay_compositor::error::{CompositorError, Result};
use overlay_compositor::math::Color;
use overlay_compositor::traits::{
    uniform_block_slot, BufferId, ParamHandle, ProgramDesc, ProgramId, RenderBackend,
    RendererListener, TextureId,
};

/// Every call a [`MockBackend`] receives, in order
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    CreateTexture { id: TextureId, width: u32, height: u32 },
    UpdateTexture(TextureId),
    DeleteTexture(TextureId),
    CreateBuffer(BufferId),
    DeleteBuffer(BufferId),
    CreateProgram { id: ProgramId, label: &'static str },
    DeleteProgram(ProgramId),
    UseProgram(ProgramId),
    BindTexture { unit: u32, texture: TextureId },
    SetSampler { handle: ParamHandle, unit: u32 },
    SetMatrix { handle: ParamHandle, matrix: Mat4 },
    SetVec4 { handle: ParamHandle, value: Vec4 },
    SetViewport(u32, u32),
    Clear(Color),
    Draw { buffer: BufferId, components: u32, vertex_count: u32 },
    ResizeSurface(u32, u32),
    Present,
    Release,
}

/// Shared view of a mock backend's call log, usable after the backend moved threads
#[derive(Clone, Default)]
pub struct CallLog(Arc<Mutex<Vec<Call>>>);

impl CallLog {
    pub fn calls(&self) -> Vec<Call> {
        self.0.lock().unwrap().clone()
    }

    pub fn count(&self, matches: impl Fn(&Call) -> bool) -> usize {
        self.0.lock().unwrap().iter().filter(|c| matches(c)).count()
    }

    pub fn clear(&self) {
        self.0.lock().unwrap().clear();
    }

    fn push(&self, call: Call) {
        self.0.lock().unwrap().push(call);
    }
}

/// Mock GPU backend that records calls and can be told to fail presents
pub struct MockBackend {
    log: CallLog,
    next_id: u32,
    programs: Vec<ProgramId>,
    fail_present_after: Option<u64>,
    presents: u64,
}

impl MockBackend {
    pub fn new() -> (Self, CallLog) {
        let log = CallLog::default();
        (
            Self {
                log: log.clone(),
                next_id: 1,
                programs: Vec::new(),
                fail_present_after: None,
                presents: 0,
            },
            log,
        )
    }

    /// Presents after the first `frames` return false
    pub fn failing_after(frames: u64) -> (Self, CallLog) {
        let (mut backend, log) = Self::new();
        backend.fail_present_after = Some(frames);
        (backend, log)
    }

    fn next(&mut self) -> u32 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }
}

impl RenderBackend for MockBackend {
    fn create_texture(&mut self, width: u32, height: u32) -> Result<TextureId> {
        let id = TextureId(self.next());
        self.log.push(Call::CreateTexture { id, width, height });
        Ok(id)
    }

    fn update_texture(&mut self, texture: TextureId, width: u32, height: u32, pixels: &[u8]) -> Result<()> {
        let expected = (width * height * 4) as usize;
        if pixels.len() != expected {
            return Err(CompositorError::BufferSizeMismatch { expected, actual: pixels.len() });
        }
        self.log.push(Call::UpdateTexture(texture));
        Ok(())
    }

    fn delete_texture(&mut self, texture: TextureId) {
        self.log.push(Call::DeleteTexture(texture));
    }

    fn create_vertex_buffer(&mut self, _vertices: &[f32]) -> Result<BufferId> {
        let id = BufferId(self.next());
        self.log.push(Call::CreateBuffer(id));
        Ok(id)
    }

    fn delete_buffer(&mut self, buffer: BufferId) {
        self.log.push(Call::DeleteBuffer(buffer));
    }

    fn create_program(&mut self, desc: &ProgramDesc) -> Result<ProgramId> {
        let id = ProgramId(self.next());
        self.programs.push(id);
        self.log.push(Call::CreateProgram { id, label: desc.label });
        Ok(id)
    }

    fn delete_program(&mut self, program: ProgramId) {
        self.programs.retain(|p| *p != program);
        self.log.push(Call::DeleteProgram(program));
    }

    fn use_program(&mut self, program: ProgramId) {
        self.log.push(Call::UseProgram(program));
    }

    fn parameter_location(&self, program: ProgramId, name: &str) -> Option<ParamHandle> {
        if self.programs.contains(&program) {
            uniform_block_slot(name)
        } else {
            None
        }
    }

    fn bind_texture(&mut self, unit: u32, texture: TextureId) {
        self.log.push(Call::BindTexture { unit, texture });
    }

    fn set_sampler(&mut self, handle: ParamHandle, unit: u32) {
        self.log.push(Call::SetSampler { handle, unit });
    }

    fn set_matrix(&mut self, handle: ParamHandle, matrix: &Mat4) {
        self.log.push(Call::SetMatrix { handle, matrix: *matrix });
    }

    fn set_vec4(&mut self, handle: ParamHandle, value: Vec4) {
        self.log.push(Call::SetVec4 { handle, value });
    }

    fn set_viewport(&mut self, width: u32, height: u32) {
        self.log.push(Call::SetViewport(width, height));
    }

    fn clear(&mut self, color: Color) {
        self.log.push(Call::Clear(color));
    }

    fn draw_triangle_strip(&mut self, buffer: BufferId, _position: ParamHandle, components: u32, vertex_count: u32) {
        self.log.push(Call::Draw { buffer, components, vertex_count });
    }

    fn resize_surface(&mut self, width: u32, height: u32) -> Result<()> {
        self.log.push(Call::ResizeSurface(width, height));
        Ok(())
    }

    fn present(&mut self) -> bool {
        self.log.push(Call::Present);
        if self.fail_present_after.is_some_and(|limit| self.presents >= limit) {
            return false;
        }
        self.presents += 1;
        true
    }

    fn release(&mut self) {
        self.log.push(Call::Release);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    Ready,
    Finished,
}

/// Listener forwarding lifecycle callbacks into a channel
pub struct ChannelListener(Sender<Lifecycle>);

impl ChannelListener {
    pub fn new() -> (Arc<Self>, Receiver<Lifecycle>) {
        let (tx, rx) = channel::unbounded();
        (Arc::new(Self(tx)), rx)
    }
}

impl RendererListener for ChannelListener {
    fn on_ready(&self) {
        let _ = self.0.send(Lifecycle::Ready);
    }

    fn on_finished(&self) {
        let _ = self.0.send(Lifecycle::Finished);
    }
}

pub const TIMEOUT: Duration = Duration::from_secs(5);

pub fn expect_event(rx: &Receiver<Lifecycle>, expected: Lifecycle) {
    match rx.recv_timeout(TIMEOUT) {
        Ok(event) => assert_eq!(event, expected, "unexpected lifecycle event"),
        Err(_) => panic!("timed out waiting for {:?}", expected),
    }
}

/// Poll `condition` until it holds or the timeout passes
pub fn wait_until(condition: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + TIMEOUT;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(1));
    }
    condition()
}

/// Fill the whole layer with one color and post it
pub fn post_solid(surface: &LayerSurface, rgba: [u8; 4]) {
    let mut canvas: Canvas = surface.lock_canvas().unwrap();
    canvas.draw(&DrawOp::Clear(rgba));
    surface.post(canvas).unwrap();
}
