use glam::Vec2;
use winit::event::{DeviceEvent, ElementState, KeyEvent, MouseButton, WindowEvent};
use winit::keyboard::{KeyCode, PhysicalKey};

#[derive(Debug, Default)]
pub struct InputState {
    /// Raw mouse motion accumulated since the last frame while mouse-look is active
    pub mouse_delta: Vec2,
    pub mouse_look: bool,
    pub mouse_look_just_toggled: bool,

    pub forward: bool,
    pub backward: bool,
    pub strafe_left: bool,
    pub strafe_right: bool,
    pub levitate: bool,
    pub sink: bool,
    pub fast: bool,
    pub slow: bool,
}

impl InputState {
    pub fn process_window_events(&mut self, event: &WindowEvent) {
        match event {
            WindowEvent::MouseInput {
                state: ElementState::Pressed,
                button: MouseButton::Right,
                ..
            } => {
                self.toggle_mouse_look();
            }
            WindowEvent::KeyboardInput {
                event:
                KeyEvent {
                    physical_key: PhysicalKey::Code(code),
                    state,
                    ..
                },
                ..
            } => {
                self.on_key(*code, *state == ElementState::Pressed);
            }
            WindowEvent::Focused(false) => {
                // Releases are not delivered to unfocused windows
                self.release_movement();
            }
            _ => {}
        }
    }

    pub fn process_device_events(&mut self, event: &DeviceEvent) {
        if let DeviceEvent::MouseMotion { delta: (dx, dy) } = event {
            self.on_mouse_motion(Vec2::new(*dx as f32, *dy as f32));
        }
    }

    pub fn toggle_mouse_look(&mut self) {
        self.mouse_look = !self.mouse_look;
        self.mouse_look_just_toggled = true;
        self.mouse_delta = Vec2::ZERO;
    }

    pub fn on_mouse_motion(&mut self, delta: Vec2) {
        if self.mouse_look {
            self.mouse_delta += delta;
        }
    }

    /// Track a movement key. Returns whether the key moves the camera.
    pub fn on_key(&mut self, code: KeyCode, pressed: bool) -> bool {
        let held = match code {
            KeyCode::KeyW => &mut self.forward,
            KeyCode::KeyS => &mut self.backward,
            KeyCode::KeyA => &mut self.strafe_left,
            KeyCode::KeyD => &mut self.strafe_right,
            KeyCode::KeyE => &mut self.levitate,
            KeyCode::KeyQ => &mut self.sink,
            KeyCode::ShiftLeft | KeyCode::ShiftRight => &mut self.fast,
            KeyCode::ControlLeft | KeyCode::ControlRight => &mut self.slow,
            _ => return false,
        };
        *held = pressed;
        true
    }

    /// Reset the input states for the next frame.
    pub fn reset_frame(&mut self) {
        self.mouse_delta = Vec2::ZERO;
        self.mouse_look_just_toggled = false;
    }

    fn release_movement(&mut self) {
        *self = Self {
            mouse_delta: self.mouse_delta,
            mouse_look: self.mouse_look,
            mouse_look_just_toggled: self.mouse_look_just_toggled,
            ..Default::default()
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn movement_keys_follow_press_and_release() {
        let mut input = InputState::default();
        assert!(input.on_key(KeyCode::KeyW, true));
        assert!(input.on_key(KeyCode::ShiftRight, true));
        assert!(input.forward && input.fast);

        input.on_key(KeyCode::KeyW, false);
        assert!(!input.forward && input.fast);
        assert!(!input.on_key(KeyCode::Digit1, true));
    }

    #[test]
    fn motion_only_accumulates_during_mouse_look() {
        let mut input = InputState::default();
        input.on_mouse_motion(Vec2::new(5.0, 5.0));
        assert_eq!(input.mouse_delta, Vec2::ZERO);

        input.toggle_mouse_look();
        input.on_mouse_motion(Vec2::new(2.0, -1.0));
        input.on_mouse_motion(Vec2::new(1.0, -1.0));
        assert_eq!(input.mouse_delta, Vec2::new(3.0, -2.0));

        input.reset_frame();
        assert_eq!(input.mouse_delta, Vec2::ZERO);
        assert!(input.mouse_look && !input.mouse_look_just_toggled);
    }

    #[test]
    fn losing_focus_releases_held_keys_but_keeps_mouse_look() {
        let mut input = InputState::default();
        input.toggle_mouse_look();
        input.on_key(KeyCode::KeyA, true);
        input.on_key(KeyCode::ControlLeft, true);

        input.process_window_events(&WindowEvent::Focused(false));
        assert!(!input.strafe_left && !input.slow);
        assert!(input.mouse_look);
    }
}
