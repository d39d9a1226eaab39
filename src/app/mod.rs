mod input_state;
mod camera_controller;

use super::renderer::Renderer;
use color_eyre::{Report, Result};
use glam::Mat4;
use std::sync::Arc;
use std::time::Instant;
use winit::application::ApplicationHandler;
use winit::event::{DeviceEvent, DeviceId, ElementState, KeyEvent, StartCause, WindowEvent};
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::keyboard::{KeyCode, PhysicalKey};
use winit::window::{Window, WindowId};
use crate::app::camera_controller::{apply_cursor_mode, CameraController};
use crate::app::input_state::InputState;
use crate::renderer::config::RenderConfig;
use crate::renderer::state::RenderState;

pub struct App {
    renderer: Option<Renderer>,
    window: Option<Arc<Window>>,
    config: Option<RenderConfig>,
    camera_controller: CameraController,

    // State
    render_state: RenderState,
    input_state: InputState,
    prev_frame_time: Instant,
    delta_time_secs: f32,
    close_requested: bool,

    // First error raised inside an event callback, returned from `run`
    fatal: Option<Report>,
}

impl App {
    pub fn new(config: RenderConfig) -> Self {
        Self {
            renderer: None,
            window: None,
            config: Some(config),
            camera_controller: CameraController::new(Mat4::IDENTITY),

            render_state: RenderState::new(Mat4::IDENTITY),
            input_state: InputState::default(),
            prev_frame_time: Instant::now(),
            delta_time_secs: 0.0,
            close_requested: false,

            fatal: None,
        }
    }

    pub fn run(&mut self) -> Result<()> {
        let event_loop = EventLoop::new()?;
        event_loop.set_control_flow(ControlFlow::Poll);
        event_loop.run_app(self)?;

        // Renderer first, it presents to the window's surface
        self.renderer = None;
        self.window = None;

        match self.fatal.take() {
            Some(report) => Err(report),
            None => Ok(()),
        }
    }

    fn fail(&mut self, event_loop: &ActiveEventLoop, report: Report) {
        log::error!("Fatal error, shutting down: {report}");
        self.fatal.get_or_insert(report);
        event_loop.exit();
    }

    fn create_renderer(&mut self, event_loop: &ActiveEventLoop) -> Result<()> {
        let attributes = Window::default_attributes().with_title("sunspire");
        let window = Arc::new(event_loop.create_window(attributes)?);
        let config = self.config.take().unwrap_or_default();

        self.renderer = Some(Renderer::new(window.clone(), config)?);
        self.window = Some(window);
        Ok(())
    }

    fn redraw(&mut self) -> Result<()> {
        if self.input_state.mouse_look_just_toggled {
            if let Some(window) = &self.window {
                apply_cursor_mode(window, self.input_state.mouse_look);
            }
        }
        self.camera_controller.process_input(&self.input_state, self.delta_time_secs);
        self.input_state.reset_frame();
        self.render_state.camera_to_world = self.camera_controller.camera_to_world();

        if let Some(renderer) = self.renderer.as_mut() {
            renderer.draw(&self.render_state)?;
        }
        Ok(())
    }
}

impl ApplicationHandler for App {
    fn new_events(&mut self, _event_loop: &ActiveEventLoop, _cause: StartCause) {
        let curr_frame_time = Instant::now();
        self.delta_time_secs = curr_frame_time.duration_since(self.prev_frame_time).as_secs_f32();
        self.prev_frame_time = curr_frame_time;
    }

    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.renderer.is_none() && self.fatal.is_none() {
            if let Err(e) = self.create_renderer(event_loop) {
                self.fail(event_loop, e);
            }
        }
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        window_id: WindowId,
        event: WindowEvent
    ) {
        if self.window.as_ref().map(|w| w.id()) != Some(window_id) {
            return;
        }

        self.input_state.process_window_events(&event);

        match event {
            WindowEvent::CloseRequested => {
                self.close_requested = true;
            }
            WindowEvent::Resized(_) | WindowEvent::ScaleFactorChanged { .. } => {
                if let Some(renderer) = self.renderer.as_mut() {
                    renderer.request_resize();
                }
            }
            WindowEvent::RedrawRequested => {
                if let Err(e) = self.redraw() {
                    self.fail(event_loop, e);
                }
            }
            WindowEvent::KeyboardInput {
                event:
                KeyEvent {
                    physical_key: PhysicalKey::Code(code),
                    state,
                    ..
                },
                ..
            } => match (code, state) {
                (KeyCode::Escape, ElementState::Pressed) => {
                    self.close_requested = true;
                }
                (code, ElementState::Released) => {
                    if self.render_state.toggles.on_key_released(code) {
                        log::info!("Render mode: {:?}", self.render_state.mode());
                    }
                }
                _ => {}
            },
            _ => {}
        }
    }

    fn device_event(&mut self, _event_loop: &ActiveEventLoop, _device_id: DeviceId, event: DeviceEvent) {
        self.input_state.process_device_events(&event);
    }

    fn about_to_wait(&mut self, event_loop: &ActiveEventLoop) {
        if self.close_requested {
            event_loop.exit();
            return;
        }

        if let Some(window) = &self.window {
            window.request_redraw();
        }
    }

    fn exiting(&mut self, _event_loop: &ActiveEventLoop) {
        self.renderer = None;
    }
}
