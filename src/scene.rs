// Scene: the model's geometry and animation, and the camera

use glam::{Mat4, Vec3};

use crate::config::SceneConfig;

/// View and projection for one frame
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViewProjection {
    pub view: Mat4,
    pub projection: Mat4,
}

pub struct Camera {
    pub eye: Vec3,
    pub target: Vec3,
    pub up: Vec3,
    pub fov_y: f32,
    pub near: f32,
    pub far: f32,
}

impl Camera {
    pub fn from_config(config: &SceneConfig) -> Self {
        Self {
            eye: Vec3::from(config.eye),
            target: Vec3::ZERO,
            up: Vec3::Y,
            fov_y: config.fov_degrees.to_radians(),
            near: 0.1,
            far: 100.0,
        }
    }

    /// 0..1 depth, Y flipped for Vulkan clip space
    pub fn view_projection(&self, width: u32, height: u32) -> ViewProjection {
        let aspect = width.max(1) as f32 / height.max(1) as f32;
        let mut projection = Mat4::perspective_rh(self.fov_y, aspect, self.near, self.far);
        projection.y_axis.y *= -1.0;

        ViewProjection {
            view: Mat4::look_at_rh(self.eye, self.target, self.up),
            projection,
        }
    }
}

/// Two overlapping quads with per-vertex color and uv
pub struct Model {
    pub positions: Vec<f32>,
    pub colors: Vec<f32>,
    pub uvs: Vec<f32>,
    pub indices: Vec<u32>,
    angle: f32,
    rotation_speed: f32,
}

impl Model {
    pub fn new(rotation_speed_degrees: f32) -> Self {
        #[rustfmt::skip]
        let positions = vec![
             0.0,  0.5, 0.0,
             0.5,  0.0, 0.0,
            -0.5,  0.0, 0.0,
             0.0, -0.5, 0.0,

             0.3,  0.5, 0.2,
             1.8,  0.0, 0.2,
            -0.8,  0.0, 0.2,
             0.3, -0.5, 0.2,
        ];

        #[rustfmt::skip]
        let colors = vec![
            1.0, 0.0, 0.0,
            0.0, 1.0, 0.0,
            0.0, 0.0, 1.0,
            1.0, 0.0, 0.0,

            1.0, 0.0, 0.0,
            0.0, 1.0, 0.0,
            0.0, 0.0, 1.0,
            1.0, 0.0, 0.0,
        ];

        #[rustfmt::skip]
        let uvs = vec![
            0.0, 1.0,
            0.0, 0.0,
            1.0, 1.0,
            1.0, 0.0,
            0.0, 1.0,
            0.0, 0.0,
            1.0, 1.0,
            1.0, 0.0,
        ];

        Self {
            positions,
            colors,
            uvs,
            indices: vec![0, 2, 1, 1, 2, 3, 4, 6, 5, 5, 6, 7],
            angle: 0.0,
            rotation_speed: rotation_speed_degrees.to_radians(),
        }
    }

    #[cfg(test)]
    pub fn vertex_count(&self) -> usize {
        self.positions.len() / 3
    }

    /// Advance the rotation about Z by `dt` seconds
    pub fn update(&mut self, dt: f32) {
        self.angle = (self.angle + self.rotation_speed * dt) % std::f32::consts::TAU;
    }

    pub fn transform(&self) -> Mat4 {
        Mat4::from_rotation_z(self.angle)
    }

    #[cfg(test)]
    pub fn angle(&self) -> f32 {
        self.angle
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec4;

    #[test]
    fn streams_describe_the_same_vertices() {
        let model = Model::new(45.0);
        assert_eq!(model.vertex_count(), 8);
        assert_eq!(model.colors.len() / 3, 8);
        assert_eq!(model.uvs.len() / 2, 8);
        assert!(model.indices.iter().all(|&i| (i as usize) < model.vertex_count()));
        assert_eq!(model.indices.len(), 12);
    }

    #[test]
    fn update_rotates_at_configured_speed() {
        let mut model = Model::new(90.0);
        model.update(0.5);
        assert!((model.angle() - 45f32.to_radians()).abs() < 1e-5);

        let p = model.transform() * Vec4::new(1.0, 0.0, 0.0, 1.0);
        assert!((p.x - p.y).abs() < 1e-5);
        assert!(p.z.abs() < 1e-6);
    }

    #[test]
    fn angle_wraps_around() {
        let mut model = Model::new(360.0);
        model.update(1.25);
        assert!((model.angle() - 90f32.to_radians()).abs() < 1e-4);
    }

    #[test]
    fn projection_maps_near_plane_to_zero_depth() {
        let camera = Camera::from_config(&SceneConfig::default());
        let vp = camera.view_projection(800, 600);
        let near = vp.projection * Vec4::new(0.0, 0.0, -camera.near, 1.0);
        assert!((near.z / near.w).abs() < 1e-5);
    }

    #[test]
    fn projection_flips_y() {
        let camera = Camera::from_config(&SceneConfig::default());
        let vp = camera.view_projection(800, 600);
        assert!(vp.projection.y_axis.y < 0.0);
    }

    #[test]
    fn zero_height_does_not_divide_by_zero() {
        let camera = Camera::from_config(&SceneConfig::default());
        let vp = camera.view_projection(800, 0);
        assert!(vp.projection.x_axis.x.is_finite());
    }
}
