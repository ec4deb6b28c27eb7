//! Window event loop of the interactive viewer.
//!
//! The loop owns one [`Context`] (window, surface, device) and one
//! [`Viewer`]. Frames are drawn on demand: input that changes the picture
//! requests a redraw, nothing animates on its own.
//!
//! # Controls
//!
//! - drop a `.gltf`, `.glb` or `.obj` file on the window to load it
//! - drag with the left mouse button to orbit, scroll to zoom
//! - `[` / `]` lower / raise the roughness, `-` / `=` the light factor
//! - `Esc` quits

use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use winit::{
    application::ApplicationHandler,
    dpi::{LogicalSize, PhysicalPosition},
    event::{ElementState, KeyEvent, MouseButton, MouseScrollDelta, WindowEvent},
    event_loop::{ActiveEventLoop, EventLoop, EventLoopProxy},
    keyboard::{Key, NamedKey},
    window::Window,
};

use crate::{config::ViewerConfig, context::Context, device::RenderDevice, render::Viewer};

const ROUGHNESS_STEP: f32 = 0.05;
const LIGHT_FACTOR_STEP: f32 = 0.5;
/// Scroll lines per pixel of touchpad scrolling.
const PIXELS_PER_LINE: f64 = 20.0;

#[derive(Debug)]
pub enum ViewerEvent {
    Load(PathBuf),
}

struct AppState {
    ctx: Context,
    viewer: Viewer,
    cursor: PhysicalPosition<f64>,
    dragging: bool,
}

impl AppState {
    fn load(&mut self, path: &Path) {
        if !self.viewer.load_file(path, true, &mut self.ctx.device) {
            log::warn!("Nothing to show in {}", path.display());
        }
        self.ctx.window().request_redraw();
    }

    fn resize(&mut self, width: u32, height: u32) {
        if width == 0 || height == 0 {
            return;
        }
        self.ctx.resize(width, height);
        self.viewer.resize(width, height);
    }

    fn handle_key(&mut self, event: &KeyEvent) -> bool {
        if event.state != ElementState::Pressed {
            return false;
        }
        let params = &mut self.viewer.params;
        match event.logical_key.as_ref() {
            Key::Character("[") => params.adjust_roughness(-ROUGHNESS_STEP),
            Key::Character("]") => params.adjust_roughness(ROUGHNESS_STEP),
            Key::Character("-") => params.adjust_light_factor(-LIGHT_FACTOR_STEP),
            Key::Character("=") => params.adjust_light_factor(LIGHT_FACTOR_STEP),
            _ => return false,
        }
        log::info!(
            "roughness {:.2}, light factor {:.1}",
            params.roughness,
            params.light_factor
        );
        true
    }
}

pub struct App {
    async_runtime: tokio::runtime::Runtime,
    proxy: EventLoopProxy<ViewerEvent>,
    config: ViewerConfig,
    state: Option<AppState>,
}

impl App {
    fn new(event_loop: &EventLoop<ViewerEvent>, config: ViewerConfig) -> anyhow::Result<Self> {
        Ok(Self {
            async_runtime: tokio::runtime::Runtime::new()?,
            proxy: event_loop.create_proxy(),
            config,
            state: None,
        })
    }
}

impl ApplicationHandler<ViewerEvent> for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.state.is_some() {
            return;
        }
        let window_attributes = Window::default_attributes()
            .with_title(self.config.title.clone())
            .with_inner_size(LogicalSize::new(self.config.width, self.config.height));
        let window = match event_loop.create_window(window_attributes) {
            Ok(window) => Arc::new(window),
            Err(e) => {
                log::error!("Could not create window: {}", e);
                event_loop.exit();
                return;
            }
        };

        let ctx = match self.async_runtime.block_on(Context::new(window)) {
            Ok(ctx) => ctx,
            Err(e) => {
                log::error!("Could not initialise the GPU: {:#}", e);
                event_loop.exit();
                return;
            }
        };
        let mut viewer = Viewer::new(&self.config, ctx.device.max_texture_dimension());
        let (width, height) = ctx.size();
        viewer.resize(width, height);

        if let Some(path) = self.config.startup_file.clone() {
            if let Err(e) = self.proxy.send_event(ViewerEvent::Load(path)) {
                log::error!("{}", e);
            }
        }
        ctx.window().request_redraw();
        self.state = Some(AppState {
            ctx,
            viewer,
            cursor: PhysicalPosition::new(0.0, 0.0),
            dragging: false,
        });
    }

    fn user_event(&mut self, _event_loop: &ActiveEventLoop, event: ViewerEvent) {
        let Some(state) = &mut self.state else {
            return;
        };
        match event {
            ViewerEvent::Load(path) => state.load(&path),
        }
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        _window_id: winit::window::WindowId,
        event: WindowEvent,
    ) {
        let Some(state) = &mut self.state else {
            return;
        };

        match event {
            WindowEvent::CloseRequested => event_loop.exit(),
            WindowEvent::Resized(size) => {
                state.resize(size.width, size.height);
                state.ctx.window().request_redraw();
            }
            WindowEvent::DroppedFile(path) => state.load(&path),
            WindowEvent::MouseInput {
                state: button_state,
                button: MouseButton::Left,
                ..
            } => state.dragging = button_state.is_pressed(),
            WindowEvent::CursorMoved { position, .. } => {
                if state.dragging {
                    let dx = (position.x - state.cursor.x) as f32;
                    let dy = (position.y - state.cursor.y) as f32;
                    state.viewer.camera.orbit(dx, dy);
                    state.ctx.window().request_redraw();
                }
                state.cursor = position;
            }
            WindowEvent::MouseWheel { delta, .. } => {
                let lines = match delta {
                    MouseScrollDelta::LineDelta(_, y) => y,
                    MouseScrollDelta::PixelDelta(p) => (p.y / PIXELS_PER_LINE) as f32,
                };
                state.viewer.camera.zoom(lines);
                state.ctx.window().request_redraw();
            }
            WindowEvent::KeyboardInput { event, .. } => {
                if event.logical_key == Key::Named(NamedKey::Escape) {
                    event_loop.exit();
                } else if state.handle_key(&event) {
                    state.ctx.window().request_redraw();
                }
            }
            WindowEvent::RedrawRequested => {
                let AppState { ctx, viewer, .. } = &mut *state;
                let clear_color = self.config.clear_color;
                match ctx.render_frame(|device| viewer.render(device, clear_color)) {
                    Ok(()) => {}
                    // Reconfigure the surface if it's lost or outdated
                    Err(wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated) => {
                        let size = ctx.window().inner_size();
                        state.resize(size.width, size.height);
                        state.ctx.window().request_redraw();
                    }
                    Err(e) => log::error!("Unable to render {}", e),
                }
            }
            _ => {}
        }
    }

    fn exiting(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(state) = &mut self.state {
            state.viewer.release(&mut state.ctx.device);
        }
    }
}

/// Opens the viewer window and runs until it is closed.
pub fn run(config: ViewerConfig) -> anyhow::Result<()> {
    let event_loop: EventLoop<ViewerEvent> = EventLoop::with_user_event().build()?;
    let mut app = App::new(&event_loop, config)?;
    event_loop.run_app(&mut app)?;
    Ok(())
}
