use glam::Mat4;

pub const NEAR: f32 = 0.1;
pub const FAR: f32 = 100.0;
pub const FOV_Y_DEG: f32 = 60.0;

/// Right-handed perspective with a [0, 1] depth range and Y pointing down in clip space
pub fn projection(fov_y_deg: f32, aspect_ratio: f32) -> Mat4 {
    let mut proj = Mat4::perspective_rh(
        fov_y_deg.to_radians(),
        aspect_ratio,
        NEAR,
        FAR,
    );
    proj.y_axis.y *= -1.0;
    proj
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;

    #[test]
    fn up_maps_to_negative_clip_y() {
        let proj = projection(FOV_Y_DEG, 1.0);
        let clip = proj * Vec3::new(0.0, 1.0, -5.0).extend(1.0);
        assert!(clip.y < 0.0);
    }

    #[test]
    fn near_and_far_map_to_unit_depth_range() {
        let proj = projection(FOV_Y_DEG, 16.0 / 9.0);
        let near = proj.project_point3(Vec3::new(0.0, 0.0, -NEAR));
        let far = proj.project_point3(Vec3::new(0.0, 0.0, -FAR));
        assert!(near.z.abs() < 1e-5);
        assert!((far.z - 1.0).abs() < 1e-5);
    }
}
