mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{expect_event, post_solid, wait_until, Call, ChannelListener, Lifecycle, MockBackend};
use crossbeam::channel::Receiver;
use overlay_compositor::core::{
    Canvas, Columns, Compositor, FullScreen, LayerSpec, PassthroughEffect, RefreshDriver, RenderHandle,
    RenderState, RenderThread, ScrollingContent, SoftwareBackend, SoftwareSurface,
};
use overlay_compositor::error::{CompositorError, Result};
use overlay_compositor::math::Color;
use overlay_compositor::traits::LayerContent;

const QUIET: Duration = Duration::from_millis(100);

fn compositor(width: u32, height: u32, layers: usize) -> Compositor {
    let mut compositor = Compositor::new(width, height, Color::BLACK, Box::new(FullScreen));
    for _ in 0..layers {
        compositor.add_layer(LayerSpec::new(Box::new(PassthroughEffect::new())));
    }
    compositor
}

/// Start a software-backed renderer and wait until it is ready
fn start_software(
    layers: usize,
    width: u32,
    height: u32,
    present_limit: Option<u64>,
) -> (RenderHandle, SoftwareSurface, Receiver<Lifecycle>) {
    let surface = SoftwareSurface::new(width, height);
    surface.set_present_limit(present_limit);
    let backend_surface = surface.clone();

    let mut thread = RenderThread::new(compositor(width, height, layers), move || {
        Ok(SoftwareBackend::with_surface(backend_surface))
    });
    let (listener, events) = ChannelListener::new();
    thread.set_listener(listener);
    let handle = thread.start().unwrap();
    expect_event(&events, Lifecycle::Ready);
    (handle, surface, events)
}

fn stop(handle: &RenderHandle, events: &Receiver<Lifecycle>) {
    handle.request_shutdown();
    expect_event(events, Lifecycle::Finished);
    assert!(handle.join());
}

// ============================================================================
// Startup
// ============================================================================

#[test]
fn test_start_without_listener_fails_synchronously() {
    let mut thread = RenderThread::new(compositor(4, 4, 1), || Ok(SoftwareBackend::new(4, 4)));
    assert!(matches!(thread.start(), Err(CompositorError::MissingListener)));

    // Nothing was consumed; a listener makes the same builder usable
    let (listener, events) = ChannelListener::new();
    thread.set_listener(listener);
    let handle = thread.start().unwrap();
    expect_event(&events, Lifecycle::Ready);
    stop(&handle, &events);
}

#[test]
fn test_start_twice_fails() {
    let mut thread = RenderThread::new(compositor(4, 4, 1), || Ok(SoftwareBackend::new(4, 4)));
    let (listener, events) = ChannelListener::new();
    thread.set_listener(listener);
    let handle = thread.start().unwrap();
    assert!(matches!(thread.start(), Err(CompositorError::AlreadyStarted)));
    expect_event(&events, Lifecycle::Ready);
    stop(&handle, &events);
}

#[test]
fn test_ready_publishes_one_surface_per_layer() {
    let (handle, _surface, events) = start_software(3, 8, 8, None);
    assert_eq!(handle.state(), RenderState::Running);

    let surfaces = handle.surfaces();
    assert_eq!(surfaces.len(), 3);
    for (i, surface) in surfaces.iter().enumerate() {
        assert_eq!(surface.layer(), i);
        assert_eq!(surface.size(), (8, 8));
    }
    assert!(handle.surface(3).is_none());

    stop(&handle, &events);
    assert_eq!(handle.state(), RenderState::Terminated);
    assert!(handle.surfaces().is_empty());
    assert!(surfaces.iter().all(|s| s.is_released()));
}

#[test]
fn test_backend_failure_finishes_without_ready() {
    let mut thread = RenderThread::new(compositor(4, 4, 1), || {
        Err::<SoftwareBackend, _>(CompositorError::Backend("no adapter".into()))
    });
    let (listener, events) = ChannelListener::new();
    thread.set_listener(listener);
    let handle = thread.start().unwrap();

    expect_event(&events, Lifecycle::Finished);
    assert!(handle.join());
    assert_eq!(handle.state(), RenderState::Terminated);
    assert!(events.recv_timeout(QUIET).is_err());
}

// ============================================================================
// Rendering
// ============================================================================

#[test]
fn test_posting_content_triggers_a_frame() {
    let (handle, surface, events) = start_software(1, 4, 4, None);
    assert_eq!(handle.frame_stats().frames_presented, 0);

    post_solid(&handle.surface(0).unwrap(), [0, 255, 0, 255]);
    assert!(wait_until(|| handle.frame_stats().frames_presented >= 1));
    assert_eq!(surface.pixel(1, 1), Some([0, 255, 0, 255]));
    assert_eq!(handle.frame_stats().layer_generations, vec![1]);

    stop(&handle, &events);
}

#[test]
fn test_render_requests_are_coalesced() {
    let (handle, surface, events) = start_software(1, 4, 4, None);
    let layer = handle.surface(0).unwrap();

    for value in 1..=100u8 {
        post_solid(&layer, [value, 0, 0, 255]);
    }
    stop(&handle, &events);

    let stats = handle.frame_stats();
    assert_eq!(stats.renders_requested, 100);
    assert!((1..=100).contains(&stats.frames_presented));
    assert_eq!(stats.frames_presented, surface.present_count());
    // The last frame always reflects the newest content
    assert_eq!(stats.layer_generations, vec![100]);
    assert_eq!(surface.pixel(0, 0), Some([100, 0, 0, 255]));
}

#[test]
fn test_explicit_notifications_are_counted() {
    let (handle, _surface, events) = start_software(2, 4, 4, None);
    for layer in 0..10 {
        handle.notify_content_available(layer % 2);
    }
    stop(&handle, &events);
    assert_eq!(handle.frame_stats().renders_requested, 10);
}

#[test]
fn test_resize_changes_output_size() {
    let (handle, surface, events) = start_software(1, 4, 4, None);
    let layer = handle.surface(0).unwrap();

    post_solid(&layer, [0, 0, 255, 255]);
    assert!(wait_until(|| handle.frame_stats().frames_presented >= 1));

    handle.resize(8, 2);
    post_solid(&layer, [0, 0, 255, 255]);
    assert!(wait_until(|| handle.frame_stats().frames_presented >= 2));

    let frame = surface.snapshot().unwrap();
    assert_eq!(frame.dimensions(), (8, 2));
    assert_eq!(frame.pixel(7, 1), [0, 0, 255, 255]);
    stop(&handle, &events);
}

#[test]
fn test_invalid_resize_shuts_down() {
    let (handle, _surface, events) = start_software(1, 4, 4, None);
    handle.resize(0, 0);
    expect_event(&events, Lifecycle::Finished);
    assert!(handle.join());
    assert_eq!(handle.state(), RenderState::Terminated);
}

// ============================================================================
// Failure and shutdown
// ============================================================================

#[test]
fn test_present_failure_finishes_exactly_once() {
    let (handle, surface, events) = start_software(1, 4, 4, Some(3));
    let layer = handle.surface(0).unwrap();

    for frame in 1..=3 {
        post_solid(&layer, [255, 255, 255, 255]);
        assert!(wait_until(|| handle.frame_stats().frames_presented >= frame));
    }
    post_solid(&layer, [255, 255, 255, 255]);

    expect_event(&events, Lifecycle::Finished);
    assert!(handle.join());
    assert_eq!(handle.state(), RenderState::Terminated);
    assert_eq!(handle.frame_stats().frames_presented, 3);
    assert_eq!(surface.present_count(), 3);

    // Everything after termination is a no-op
    handle.notify_content_available(0);
    handle.resize(16, 16);
    handle.request_shutdown();
    assert!(matches!(
        layer.lock_canvas(),
        Err(CompositorError::SurfaceReleased { layer: 0 })
    ));
    assert!(events.recv_timeout(QUIET).is_err());
}

#[test]
fn test_shutdown_twice_finishes_once() {
    let (handle, _surface, events) = start_software(2, 4, 4, None);
    handle.request_shutdown();
    handle.request_shutdown();

    expect_event(&events, Lifecycle::Finished);
    assert!(handle.join());
    assert!(handle.join());
    assert!(events.recv_timeout(QUIET).is_err());
}

#[test]
fn test_dropping_last_handle_shuts_down() {
    let (handle, _surface, events) = start_software(1, 4, 4, None);
    let layer = handle.surface(0).unwrap();
    let other = handle.clone();

    drop(handle);
    assert!(events.recv_timeout(QUIET).is_err());
    assert_eq!(other.state(), RenderState::Running);

    drop(other);
    expect_event(&events, Lifecycle::Finished);
    assert!(wait_until(|| layer.lock_canvas().is_err()));
    assert!(matches!(
        layer.lock_canvas(),
        Err(CompositorError::SurfaceReleased { layer: 0 })
    ));
}

#[test]
fn test_host_detach_finishes_renderer() {
    let (handle, surface, events) = start_software(1, 4, 4, None);
    let layer = handle.surface(0).unwrap();

    post_solid(&layer, [40, 40, 40, 255]);
    assert!(wait_until(|| handle.frame_stats().frames_presented >= 1));

    surface.detach();
    post_solid(&layer, [80, 80, 80, 255]);

    expect_event(&events, Lifecycle::Finished);
    assert!(handle.join());
    assert_eq!(handle.state(), RenderState::Terminated);
    assert_eq!(handle.frame_stats().frames_presented, 1);
    assert_eq!(surface.present_count(), 1);
    assert!(events.recv_timeout(QUIET).is_err());
}

#[test]
fn test_shutdown_waits_for_queued_renders() {
    let (handle, surface, events) = start_software(1, 2, 2, None);
    let layer = handle.surface(0).unwrap();
    post_solid(&layer, [9, 9, 9, 255]);
    stop(&handle, &events);
    assert!(surface.present_count() >= 1);
}

#[test]
fn test_resources_released_after_teardown() {
    let (backend, log) = MockBackend::new();
    let mut thread = RenderThread::new(compositor(4, 4, 2), move || Ok(backend));
    let (listener, events) = ChannelListener::new();
    thread.set_listener(listener);
    let handle = thread.start().unwrap();
    expect_event(&events, Lifecycle::Ready);
    stop(&handle, &events);

    let calls = log.calls();
    let created = log.count(|c| matches!(c, Call::CreateTexture { .. }));
    let deleted = log.count(|c| matches!(c, Call::DeleteTexture(_)));
    assert_eq!(created, 2);
    assert_eq!(deleted, 2);
    assert_eq!(log.count(|c| matches!(c, Call::DeleteProgram(_))), 1);
    assert_eq!(calls.last(), Some(&Call::Release));
}

#[test]
fn test_mock_present_failure_reports_frame() {
    let (backend, log) = MockBackend::failing_after(1);
    let mut compositor = Compositor::new(4, 4, Color::BLACK, Box::new(Columns));
    compositor.add_layer(LayerSpec::new(Box::new(PassthroughEffect::new())));
    let mut thread = RenderThread::new(compositor, move || Ok(backend));
    let (listener, events) = ChannelListener::new();
    thread.set_listener(listener);
    let handle = thread.start().unwrap();
    expect_event(&events, Lifecycle::Ready);

    handle.notify_content_available(0);
    assert!(wait_until(|| handle.frame_stats().frames_presented == 1));
    handle.notify_content_available(0);
    expect_event(&events, Lifecycle::Finished);
    assert!(handle.join());

    assert_eq!(log.count(|c| *c == Call::Present), 2);
    assert_eq!(log.count(|c| *c == Call::Release), 1);
}

// ============================================================================
// End to end
// ============================================================================

#[test]
fn test_refresh_driver_feeds_renderer() {
    let (handle, surface, events) = start_software(2, 32, 16, None);

    let mut driver = RefreshDriver::with_rate(200);
    for (i, layer) in handle.surfaces().into_iter().enumerate() {
        driver.bind(layer, Box::new(ScrollingContent::new(4).with_hue(i as f32 * 0.5)));
    }
    driver.start().unwrap();

    assert!(wait_until(|| surface.present_count() >= 5));
    driver.release();
    assert!(!driver.is_running());
    stop(&handle, &events);

    let stats = handle.frame_stats();
    assert!(stats.frames_presented >= 5);
    assert!(stats.layer_generations.iter().all(|&g| g > 0));
}

struct Broken;

impl LayerContent for Broken {
    fn refresh(&mut self, _canvas: &mut Canvas) -> Result<()> {
        Err(CompositorError::Content("broken".into()))
    }
}

#[test]
fn test_renderer_outlives_failed_driver() {
    let (handle, surface, events) = start_software(1, 4, 4, None);
    let layer = handle.surface(0).unwrap();

    let mut driver = RefreshDriver::with_rate(200);
    driver.bind(layer.clone(), Box::new(Broken));
    driver.start().unwrap();
    assert!(wait_until(|| !driver.is_running()));
    assert_eq!(handle.frame_stats().frames_presented, 0);

    // The layer stays usable for another producer
    post_solid(&layer, [0, 0, 255, 255]);
    assert!(wait_until(|| handle.frame_stats().frames_presented >= 1));
    assert_eq!(handle.state(), RenderState::Running);
    assert!(surface.snapshot().is_some());

    driver.release();
    stop(&handle, &events);
}

#[test]
fn test_handles_are_shareable_across_threads() {
    let (handle, _surface, events) = start_software(1, 4, 4, None);
    let notifiers: Vec<_> = (0..4)
        .map(|_| {
            let handle = handle.clone();
            std::thread::spawn(move || {
                for _ in 0..25 {
                    handle.notify_content_available(0);
                }
            })
        })
        .collect();
    for notifier in notifiers {
        notifier.join().unwrap();
    }
    stop(&handle, &events);
    assert_eq!(handle.frame_stats().renders_requested, 100);
}

fn assert_send_sync<T: Send + Sync>() {}

#[test]
fn test_handle_is_send_and_sync() {
    assert_send_sync::<RenderHandle>();
    assert_send_sync::<Arc<ChannelListener>>();
}
