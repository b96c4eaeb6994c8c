// =============================================================================
// TEXTURED MESH RENDERER
// =============================================================================
//
// Renders a textured, rotating model with Vulkan, keeping several frames in
// flight and rebuilding the presentation chain whenever the window changes.
//
// ARCHITECTURE OVERVIEW:
// ┌─────────────────────────────────────────────────────────────────┐
// │  App (winit event loop, input, resize tracking)                 │
// │    └── FrameSyncEngine (wait, acquire, write, submit, present)  │
// │          └── Renderer (frame slots + surface generation)        │
// │                └── backend (device, swapchain, render graph,    │
// │                    pipeline, command table, buffers, images)    │
// └─────────────────────────────────────────────────────────────────┘
//
// FRAME FLOW:
// 1. Apply any pending resize or shader reload
// 2. Advance the model and compose the uniform block
// 3. Wait for the current slot's fence, acquire an image
// 4. Write the slot's uniforms, submit the pre-recorded commands
// 5. Present, advance the slot
//
// =============================================================================

mod backend;
mod config;
mod frame;
mod hot_reload;
mod renderer;
mod scene;
mod uniforms;

use anyhow::{Context, Result};
use backend::device::DeviceConfig;
use backend::VulkanDevice;
use config::Config;
use frame::{FrameSyncEngine, RebuildOutcome, ResizeState};
use hot_reload::ShaderWatcher;
use raw_window_handle::HasRawDisplayHandle;
use renderer::Renderer;
use scene::{Camera, Model};
use std::fs::OpenOptions;
use std::io::Write;
use std::sync::Arc;
use std::time::Instant;
use uniforms::UniformBlock;
use winit::{
    application::ApplicationHandler,
    event::WindowEvent,
    event_loop::{ActiveEventLoop, ControlFlow, EventLoop},
    window::{Fullscreen, Window, WindowAttributes},
};

// =============================================================================
// ENTRY POINT
// =============================================================================

fn main() -> Result<()> {
    let config = Config::load();

    init_logging(&config)?;
    log::info!("Starting textured mesh renderer");
    log::info!(
        "Window: {}x{} ({})",
        config.window.width,
        config.window.height,
        if config.window.fullscreen { "fullscreen" } else { "windowed" }
    );
    log::info!(
        "Present mode: {}, frames in flight: {}",
        config.graphics.present_mode,
        config.graphics.frames_in_flight
    );

    let event_loop = EventLoop::new()?;
    let mut app = App::new(config);
    event_loop.run_app(&mut app)?;

    if app.failed {
        anyhow::bail!("Renderer stopped after a fatal error");
    }
    Ok(())
}

/// env_logger at Info (RUST_LOG overrides), optionally piped to a file
fn init_logging(config: &Config) -> Result<()> {
    use env_logger::{Builder, Target};
    use log::LevelFilter;

    let mut builder = Builder::new();
    builder.filter_level(LevelFilter::Info);
    builder.parse_default_env();

    if config.debug.log_to_file {
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&config.debug.log_file)
            .with_context(|| format!("Failed to open log file {:?}", config.debug.log_file))?;

        writeln!(file, "=== Textured Mesh Renderer Log ===")?;
        writeln!(file, "Started: {:?}", std::time::SystemTime::now())?;
        writeln!(file)?;

        builder.target(Target::Pipe(Box::new(file)));
    }

    builder.init();
    Ok(())
}

// =============================================================================
// APPLICATION STATE
// =============================================================================

/// Window, renderer and per-frame bookkeeping.
///
/// The renderer is dropped before the window so the surface never outlives
/// its window.
struct App {
    config: Config,

    // ─────────────────────────────────────────────────────────────────────────
    // RENDERING
    // ─────────────────────────────────────────────────────────────────────────
    renderer: Option<Renderer>,
    engine: FrameSyncEngine,
    shader_watcher: Option<ShaderWatcher>,

    // ─────────────────────────────────────────────────────────────────────────
    // SCENE
    // ─────────────────────────────────────────────────────────────────────────
    model: Model,
    camera: Camera,

    // ─────────────────────────────────────────────────────────────────────────
    // WINDOW
    // ─────────────────────────────────────────────────────────────────────────
    window: Option<Arc<Window>>,
    is_fullscreen: bool,
    resize: ResizeState,

    // ─────────────────────────────────────────────────────────────────────────
    // TIMING
    // ─────────────────────────────────────────────────────────────────────────
    last_tick: Instant,
    fps: FpsCounter,

    failed: bool,
}

impl App {
    fn new(config: Config) -> Self {
        let now = Instant::now();
        Self {
            engine: FrameSyncEngine::new(config.graphics.frames_in_flight),
            model: Model::new(config.scene.rotation_speed),
            camera: Camera::from_config(&config.scene),
            is_fullscreen: config.window.fullscreen,
            resize: ResizeState::new(config.window.width, config.window.height),
            renderer: None,
            shader_watcher: None,
            window: None,
            last_tick: now,
            fps: FpsCounter::new(now),
            failed: false,
            config,
        }
    }

    // =========================================================================
    // INITIALIZATION
    // =========================================================================

    fn init_vulkan(&mut self, window: &Window) -> Result<()> {
        let device_config = DeviceConfig::for_display(
            &self.config.window.title,
            self.config.validation_enabled(),
            window.raw_display_handle(),
        )?;
        let device = VulkanDevice::new(&device_config, window)?;

        let size = window.inner_size();
        self.resize = ResizeState::new(size.width, size.height);

        let renderer = Renderer::new(
            device,
            &self.config,
            &self.model,
            ash::vk::Extent2D {
                width: size.width,
                height: size.height,
            },
        )?;
        self.renderer = Some(renderer);

        if self.config.debug.hot_reload_shaders {
            let shaders = [
                self.config.assets.vertex_shader.clone(),
                self.config.assets.fragment_shader.clone(),
            ];
            match ShaderWatcher::new(&shaders) {
                Ok(watcher) => self.shader_watcher = Some(watcher),
                Err(e) => log::warn!("Shader hot reload disabled: {:?}", e),
            }
        }

        Ok(())
    }

    // =========================================================================
    // FRAME
    // =========================================================================

    /// Render one frame. Returns false if nothing was presented.
    fn render_frame(&mut self) -> Result<bool> {
        let Some(renderer) = self.renderer.as_mut() else {
            return Ok(false);
        };

        let changed = self
            .shader_watcher
            .as_ref()
            .map(|w| !w.take_changes().is_empty())
            .unwrap_or(false);
        if changed {
            log::info!("Shader change detected, rebuilding pipeline");
            self.resize.request_reload();
        }

        if let Some(request) = self.resize.take_rebuild() {
            renderer.set_pixel_size(request.width, request.height);
            // Shaders are reloaded even when the surface rebuild is deferred
            if renderer.rebuild(request.reload_shaders)? == RebuildOutcome::Deferred {
                self.resize.request();
            }
        }

        if self.resize.is_minimized() || !renderer.has_surface() {
            return Ok(false);
        }

        let now = Instant::now();
        self.model.update(now.duration_since(self.last_tick).as_secs_f32());
        self.last_tick = now;

        let extent = renderer.extent();
        let view_projection = self.camera.view_projection(extent.width, extent.height);
        let block = UniformBlock::compose(&view_projection, self.model.transform());

        let outcome = self.engine.tick(renderer, &block)?;
        if outcome.surface_deferred() {
            self.resize.request();
        }
        log::trace!(
            "Frame {} (next slot {}): {:?}",
            self.engine.frame_number(),
            self.engine.current_slot(),
            outcome
        );

        Ok(outcome.presented())
    }

    // =========================================================================
    // FULLSCREEN / TITLE
    // =========================================================================

    /// Borderless toggle; the Resized event that follows drives the rebuild
    fn toggle_fullscreen(&mut self) {
        let Some(window) = self.window.as_ref() else {
            return;
        };
        self.is_fullscreen = !self.is_fullscreen;
        window.set_fullscreen(self.is_fullscreen.then_some(Fullscreen::Borderless(None)));
        log::info!("Fullscreen {}", if self.is_fullscreen { "on" } else { "off" });
    }

    fn update_title(&mut self) {
        let Some((fps, frame_ms)) = self.fps.record(Instant::now()) else {
            return;
        };
        if !self.config.debug.show_fps {
            return;
        }
        if let Some(window) = self.window.as_ref() {
            let images = self.renderer.as_ref().map(Renderer::image_count).unwrap_or(0);
            window.set_title(&format!(
                "{} | {:.0} fps, {:.2} ms | {} images, {} in flight",
                self.config.window.title,
                fps,
                frame_ms,
                images,
                self.engine.frames_in_flight()
            ));
        }
    }

    fn shutdown(&mut self, event_loop: &ActiveEventLoop) {
        if let Some(ref renderer) = self.renderer {
            if let Err(e) = renderer.wait_idle() {
                log::error!("Failed waiting for device idle: {:?}", e);
            }
        }
        event_loop.exit();
    }

    fn fail(&mut self, event_loop: &ActiveEventLoop, error: anyhow::Error) {
        log::error!("Fatal error: {:?}", error);
        self.failed = true;
        self.shutdown(event_loop);
    }
}

// =============================================================================
// EVENT HANDLING
// =============================================================================

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }

        let mut window_attributes = WindowAttributes::default()
            .with_title(&self.config.window.title)
            .with_inner_size(winit::dpi::PhysicalSize::new(
                self.config.window.width,
                self.config.window.height,
            ));

        if self.config.window.fullscreen {
            window_attributes = window_attributes.with_fullscreen(Some(Fullscreen::Borderless(None)));
        }

        let window = match event_loop.create_window(window_attributes) {
            Ok(w) => Arc::new(w),
            Err(e) => {
                self.fail(event_loop, anyhow::Error::new(e).context("Failed to create window"));
                return;
            }
        };

        if let Err(e) = self.init_vulkan(&window) {
            self.fail(event_loop, e.context("Failed to initialize Vulkan"));
            return;
        }

        self.window = Some(window);
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        _id: winit::window::WindowId,
        event: WindowEvent,
    ) {
        match event {
            // ─────────────────────────────────────────────────────────────────
            // CLOSE REQUEST
            // ─────────────────────────────────────────────────────────────────
            WindowEvent::CloseRequested => {
                log::info!("Close requested, shutting down...");
                self.shutdown(event_loop);
            }

            // ─────────────────────────────────────────────────────────────────
            // WINDOW RESIZED (physical pixels)
            // ─────────────────────────────────────────────────────────────────
            WindowEvent::Resized(size) => {
                log::debug!("Window resized to {}x{}", size.width, size.height);
                self.resize.on_resize(size.width, size.height);
            }

            // ─────────────────────────────────────────────────────────────────
            // REDRAW REQUESTED
            // ─────────────────────────────────────────────────────────────────
            WindowEvent::RedrawRequested => match self.render_frame() {
                Ok(true) => self.update_title(),
                Ok(false) => {}
                Err(e) => self.fail(event_loop, e),
            },

            // ─────────────────────────────────────────────────────────────────
            // KEYBOARD INPUT
            // ─────────────────────────────────────────────────────────────────
            WindowEvent::KeyboardInput { event, .. } => {
                use winit::keyboard::{KeyCode, PhysicalKey};

                if event.state.is_pressed() {
                    if let PhysicalKey::Code(key) = event.physical_key {
                        match key {
                            KeyCode::Escape => {
                                log::info!("ESC pressed, exiting...");
                                self.shutdown(event_loop);
                            }
                            KeyCode::F11 => self.toggle_fullscreen(),
                            _ => {}
                        }
                    }
                }
            }

            _ => {}
        }
    }

    /// Redraw continuously, except while minimized where we sleep until the
    /// next event.
    fn about_to_wait(&mut self, event_loop: &ActiveEventLoop) {
        if self.resize.is_minimized() {
            event_loop.set_control_flow(ControlFlow::Wait);
            return;
        }

        event_loop.set_control_flow(ControlFlow::Poll);
        if let Some(ref window) = self.window {
            window.request_redraw();
        }
    }
}

// =============================================================================
// FPS COUNTER
// =============================================================================

/// Averages presented frames over one-second windows
struct FpsCounter {
    window_start: Instant,
    last_frame: Instant,
    frames: u32,
}

impl FpsCounter {
    fn new(now: Instant) -> Self {
        Self {
            window_start: now,
            last_frame: now,
            frames: 0,
        }
    }

    /// Count a presented frame. Once a second has elapsed, returns the
    /// average rate and the latest frame time in milliseconds.
    fn record(&mut self, now: Instant) -> Option<(f32, f32)> {
        let frame_ms = now.duration_since(self.last_frame).as_secs_f32() * 1000.0;
        self.last_frame = now;
        self.frames += 1;

        let elapsed = now.duration_since(self.window_start).as_secs_f32();
        if elapsed < 1.0 {
            return None;
        }

        let fps = self.frames as f32 / elapsed;
        self.frames = 0;
        self.window_start = now;
        Some((fps, frame_ms))
    }
}

// =============================================================================
// CLEANUP
// =============================================================================

impl Drop for App {
    fn drop(&mut self) {
        log::info!("Cleaning up...");
        self.shader_watcher = None;
        // Renderer (and with it the device) before the window
        self.renderer = None;
        self.window = None;
        log::info!("Cleanup complete");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn fps_reports_once_per_second() {
        let start = Instant::now();
        let mut fps = FpsCounter::new(start);

        for i in 1..60 {
            assert!(fps.record(start + Duration::from_millis(i * 16)).is_none());
        }
        let (rate, frame_ms) = fps.record(start + Duration::from_millis(1000)).unwrap();
        assert!((rate - 60.0).abs() < 0.01);
        assert!((frame_ms - 56.0).abs() < 0.01);

        // Window restarts after reporting
        assert!(fps.record(start + Duration::from_millis(1016)).is_none());
    }
}
