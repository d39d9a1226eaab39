use ash::vk;
use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3, Vec4};
use crate::renderer::camera;

pub const MAIN_LIGHT_POSITION: Vec3 = Vec3::new(-0.2972, 7.3100, -11.9532);
pub const SHADOW_FOCUS: Vec3 = Vec3::new(0.0, 0.0, -48.0);
pub const BRAZIER_COLOR: Vec4 = Vec4::new(0.9882, 0.4549, 0.0196, 1.0);
pub const BRAZIER_COUNT: usize = 21;

const BRAZIER_POSITIONS: [[f32; 3]; BRAZIER_COUNT] = [
    // Main room, around the statue
    [8.0377, -1.1000, -15.8845],
    [5.6632, -1.1000, -12.2500],
    [2.1255, -1.1000, -10.1000],
    [-2.0867, -1.1000, -10.2500],
    [-5.7367, -1.1000, -12.2000],
    [-7.8244, -1.1000, -15.8500],
    [3.0632, -1.1000, -25.8500],
    [-3.0632, -1.1000, -25.8500],
    // Side room
    [-7.4867, -1.1000, -36.0500],
    [-2.4367, -3.1000, -46.5500],
    [2.3632, -3.1000, -46.5500],
    [-0.0514, -3.9000, -49.6000],
    // Back hallway
    [-7.2367, -3.1000, -61.2500],
    [7.1088, -3.1000, -61.2500],
    [-2.0867, -3.1000, -66.5500],
    [2.0867, -3.1000, -66.5500],
    [-2.0867, -3.1000, -68.9000],
    [2.0867, -3.1000, -68.9000],
    [0.0000, -4.1000, -76.0000],
    [-1.6867, -3.1000, -88.8500],
    [1.6867, -3.1000, -88.8500],
];

/// Camera matrices, read by every geometry pipeline
#[repr(C)]
#[derive(Debug, Default, Copy, Clone, Pod, Zeroable)]
pub struct SceneUniform {
    pub camera: Mat4,
    pub projection: Mat4,
    pub proj_cam: Mat4,
    pub cam_pos: Vec4,
}

impl SceneUniform {
    pub fn new(camera_to_world: Mat4, extent: vk::Extent2D) -> Self {
        let aspect = extent.width as f32 / extent.height.max(1) as f32;
        let projection = camera::projection(camera::FOV_Y_DEG, aspect);
        let camera = camera_to_world.inverse();
        Self {
            camera,
            projection,
            proj_cam: projection * camera,
            cam_pos: camera_to_world.w_axis.truncate().extend(1.0),
        }
    }
}

/// The main, shadow casting light
#[repr(C)]
#[derive(Debug, Default, Copy, Clone, Pod, Zeroable)]
pub struct LightUniform {
    pub position: Vec4,
    pub color: Vec4,
    /// Nonzero when the shadow map holds this frame's depth from the light
    pub shadowed: u32,
    _padding: [u32; 3],
}

impl LightUniform {
    pub fn main_light(shadowed: bool) -> Self {
        Self {
            position: MAIN_LIGHT_POSITION.extend(0.0),
            color: Vec4::ONE,
            shadowed: shadowed as u32,
            _padding: [0; 3],
        }
    }
}

#[repr(C)]
#[derive(Debug, Default, Copy, Clone, Pod, Zeroable)]
pub struct DebugUniform {
    pub channel: i32,
}

#[repr(C)]
#[derive(Debug, Default, Copy, Clone, Pod, Zeroable)]
pub struct PointLight {
    pub position: Vec4,
    pub color: Vec4,
}

/// Brazier lights resolved by the deferred shading subpass
#[repr(C)]
#[derive(Debug, Copy, Clone, Pod, Zeroable)]
pub struct MultipleLights {
    pub lights: [PointLight; BRAZIER_COUNT],
}

impl MultipleLights {
    pub fn braziers() -> Self {
        Self {
            lights: BRAZIER_POSITIONS.map(|p| PointLight {
                position: Vec3::from(p).extend(0.0),
                color: BRAZIER_COLOR,
            }),
        }
    }
}

/// Light-space view projection used by the shadow prepass and for shadow lookups
#[repr(C)]
#[derive(Debug, Default, Copy, Clone, Pod, Zeroable)]
pub struct DepthMvp {
    pub light_proj_view: Mat4,
}

impl DepthMvp {
    pub fn from_light(position: Vec3) -> Self {
        let projection = camera::projection(90.0, 1.0);
        let view = Mat4::look_at_rh(position, SHADOW_FOCUS, Vec3::Y);
        Self {
            light_proj_view: projection * view,
        }
    }
}

/// Everything written into the uniform buffers at the start of a frame
#[derive(Debug, Clone, Copy)]
pub struct FrameUniformSnapshot {
    pub scene: SceneUniform,
    pub light: LightUniform,
    pub debug: DebugUniform,
    pub lights: MultipleLights,
    pub depth_mvp: DepthMvp,
}

impl FrameUniformSnapshot {
    pub fn new(
        camera_to_world: Mat4,
        extent: vk::Extent2D,
        debug_channel: u8,
        shadowed: bool,
    ) -> Self {
        Self {
            scene: SceneUniform::new(camera_to_world, extent),
            light: LightUniform::main_light(shadowed),
            debug: DebugUniform {
                channel: debug_channel as i32,
            },
            lights: MultipleLights::braziers(),
            depth_mvp: DepthMvp::from_light(MAIN_LIGHT_POSITION),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::mem::size_of;

    #[test]
    fn uniform_sizes_fit_inline_updates() {
        assert_eq!(size_of::<SceneUniform>(), 3 * 64 + 16);
        assert_eq!(size_of::<LightUniform>(), 48);
        assert_eq!(size_of::<DebugUniform>(), 4);
        assert_eq!(size_of::<MultipleLights>(), BRAZIER_COUNT * 32);
        assert_eq!(size_of::<DepthMvp>(), 64);
    }

    #[test]
    fn scene_uniform_inverts_camera_and_keeps_its_position() {
        let camera_to_world = Mat4::from_translation(Vec3::new(1.0, 2.0, 3.0));
        let scene = SceneUniform::new(camera_to_world, vk::Extent2D { width: 1280, height: 720 });

        assert_eq!(scene.cam_pos, Vec4::new(1.0, 2.0, 3.0, 1.0));
        let origin = scene.camera.transform_point3(Vec3::new(1.0, 2.0, 3.0));
        assert!(origin.length() < 1e-5);
        assert!(scene.proj_cam.abs_diff_eq(scene.projection * scene.camera, 1e-6));
    }

    #[test]
    fn braziers_share_the_fire_color() {
        let lights = MultipleLights::braziers();
        assert!(lights.lights.iter().all(|l| l.color == BRAZIER_COLOR));
        assert_eq!(lights.lights[18].position, Vec4::new(0.0, -4.1, -76.0, 0.0));
    }

    #[test]
    fn shadow_focus_lands_in_the_middle_of_the_shadow_map() {
        let depth = DepthMvp::from_light(MAIN_LIGHT_POSITION);
        let clip = depth.light_proj_view * SHADOW_FOCUS.extend(1.0);
        let ndc = clip.truncate() / clip.w;
        assert!(ndc.x.abs() < 1e-4 && ndc.y.abs() < 1e-4);
        assert!((0.0..=1.0).contains(&ndc.z));
    }
}
