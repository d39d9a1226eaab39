use glam::{Mat4, Vec2, Vec3};
use winit::window::{CursorGrabMode, Window};
use crate::app::input_state::InputState;

pub const BASE_SPEED: f32 = 1.7;
pub const FAST_MULTIPLIER: f32 = 7.0;
pub const SLOW_MULTIPLIER: f32 = 0.05;
/// Radians per pixel of mouse motion
pub const MOUSE_SENSITIVITY: f32 = 0.01;

/// Free-flying camera. Rotation and movement are applied in the camera's local frame.
pub struct CameraController {
    camera_to_world: Mat4,
}

impl CameraController {
    pub fn new(camera_to_world: Mat4) -> Self {
        Self { camera_to_world }
    }

    pub fn camera_to_world(&self) -> Mat4 {
        self.camera_to_world
    }

    pub fn process_input(
        &mut self,
        input_state: &InputState,
        delta_time: f32,
    ) {
        if input_state.mouse_look {
            self.rotate(input_state.mouse_delta * MOUSE_SENSITIVITY);
        }

        let mut speed = BASE_SPEED;
        if input_state.fast {
            speed *= FAST_MULTIPLIER;
        }
        if input_state.slow {
            speed *= SLOW_MULTIPLIER;
        }
        let step = delta_time * speed;

        let mut direction = Vec3::ZERO;
        for (held, axis) in [
            (input_state.forward, Vec3::NEG_Z),
            (input_state.backward, Vec3::Z),
            (input_state.strafe_left, Vec3::NEG_X),
            (input_state.strafe_right, Vec3::X),
            (input_state.levitate, Vec3::Y),
            (input_state.sink, Vec3::NEG_Y),
        ] {
            if held {
                direction += axis;
            }
        }
        if direction != Vec3::ZERO {
            self.camera_to_world *= Mat4::from_translation(direction * step);
        }
    }

    /// Pitch about the local X axis, then yaw about the rotated local Y axis
    fn rotate(&mut self, angles: Vec2) {
        if angles == Vec2::ZERO {
            return;
        }
        self.camera_to_world = self.camera_to_world
            * Mat4::from_rotation_x(-angles.y)
            * Mat4::from_rotation_y(-angles.x);
    }
}

/// Hide and capture the cursor while mouse-look is active
pub fn apply_cursor_mode(window: &Window, mouse_look: bool) {
    window.set_cursor_visible(!mouse_look);

    let result = if mouse_look {
        window
            .set_cursor_grab(CursorGrabMode::Locked)
            .or_else(|_| window.set_cursor_grab(CursorGrabMode::Confined))
    } else {
        window.set_cursor_grab(CursorGrabMode::None)
    };
    if let Err(e) = result {
        log::error!("Failed to set cursor grab mode: {e}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPS: f32 = 1e-5;

    fn position(controller: &CameraController) -> Vec3 {
        controller.camera_to_world().w_axis.truncate()
    }

    #[test]
    fn forward_moves_along_negative_z_at_base_speed() {
        let mut controller = CameraController::new(Mat4::IDENTITY);
        let input = InputState {
            forward: true,
            ..Default::default()
        };
        controller.process_input(&input, 2.0);
        assert!(position(&controller).abs_diff_eq(Vec3::new(0.0, 0.0, -3.4), EPS));
    }

    #[test]
    fn modifiers_scale_speed() {
        let mut fast = CameraController::new(Mat4::IDENTITY);
        fast.process_input(&InputState { strafe_right: true, fast: true, ..Default::default() }, 1.0);
        assert!(position(&fast).abs_diff_eq(Vec3::new(1.7 * 7.0, 0.0, 0.0), EPS));

        let mut slow = CameraController::new(Mat4::IDENTITY);
        slow.process_input(&InputState { levitate: true, slow: true, ..Default::default() }, 1.0);
        assert!(position(&slow).abs_diff_eq(Vec3::new(0.0, 1.7 * 0.05, 0.0), EPS));
    }

    #[test]
    fn opposing_keys_cancel() {
        let mut controller = CameraController::new(Mat4::IDENTITY);
        let input = InputState {
            levitate: true,
            sink: true,
            strafe_left: true,
            strafe_right: true,
            ..Default::default()
        };
        controller.process_input(&input, 1.0);
        assert_eq!(controller.camera_to_world(), Mat4::IDENTITY);
    }

    #[test]
    fn movement_follows_camera_orientation() {
        // Yawed a quarter turn to the left, forward points along world -X
        let yaw = Mat4::from_rotation_y(std::f32::consts::FRAC_PI_2);
        let mut controller = CameraController::new(yaw);
        controller.process_input(&InputState { forward: true, ..Default::default() }, 1.0);
        assert!(position(&controller).abs_diff_eq(Vec3::new(-1.7, 0.0, 0.0), EPS));
    }

    #[test]
    fn mouse_motion_rotates_only_during_mouse_look() {
        let mut controller = CameraController::new(Mat4::IDENTITY);
        let mut input = InputState {
            mouse_delta: Vec2::new(10.0, 0.0),
            ..Default::default()
        };
        controller.process_input(&input, 0.0);
        assert_eq!(controller.camera_to_world(), Mat4::IDENTITY);

        input.mouse_look = true;
        controller.process_input(&input, 0.0);
        // Moving right yaws clockwise seen from above
        let forward = controller.camera_to_world().transform_vector3(Vec3::NEG_Z);
        let expected = Mat4::from_rotation_y(-0.1).transform_vector3(Vec3::NEG_Z);
        assert!(forward.abs_diff_eq(expected, EPS));
        assert!(forward.x > 0.0);
    }

    #[test]
    fn mouse_up_pitches_camera_up() {
        let mut controller = CameraController::new(Mat4::IDENTITY);
        let input = InputState {
            mouse_look: true,
            mouse_delta: Vec2::new(0.0, -20.0),
            ..Default::default()
        };
        controller.process_input(&input, 0.0);
        let forward = controller.camera_to_world().transform_vector3(Vec3::NEG_Z);
        assert!(forward.y > 0.0);
        assert!((forward.length() - 1.0).abs() < EPS);
    }
}
