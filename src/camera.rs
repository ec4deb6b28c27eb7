//! Orbit camera and point light placed relative to the loaded scene.

use std::f32::consts::PI;

use cgmath::{
    Deg, EuclideanSpace, InnerSpace, Matrix4, Point3, Vector2, Vector3, perspective,
};

use crate::data_structures::range::Range3;

#[rustfmt::skip]
pub const OPENGL_TO_WGPU_MATRIX: Matrix4<f32> = Matrix4::new(
    1.0, 0.0, 0.0, 0.0,
    0.0, 1.0, 0.0, 0.0,
    0.0, 0.0, 0.5, 0.5,
    0.0, 0.0, 0.0, 1.0,
);

/// Keeps the orbit away from the poles where `look_at` degenerates.
const MAX_ELEVATION: f32 = PI / 2.0 - 1e-3;

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Camera {
    pub position: Point3<f32>,
    pub center: Point3<f32>,
    pub up: Vector3<f32>,
    pub fovy: Deg<f32>,
    pub z_near: f32,
    pub z_far: f32,
    /// Drawable size in pixels.
    pub viewport: Vector2<f32>,
}

impl Default for Camera {
    fn default() -> Self {
        Self {
            position: Point3::new(0.0, 0.0, 5.0),
            center: Point3::origin(),
            up: Vector3::unit_y(),
            fovy: Deg(60.0),
            z_near: 0.1,
            z_far: 100.0,
            viewport: Vector2::new(800.0, 600.0),
        }
    }
}

impl Camera {
    pub fn view(&self) -> Matrix4<f32> {
        Matrix4::look_at_rh(self.position, self.center, self.up)
    }

    pub fn projection(&self) -> Matrix4<f32> {
        let aspect = self.viewport.x / self.viewport.y.max(1.0);
        OPENGL_TO_WGPU_MATRIX * perspective(self.fovy, aspect, self.z_near, self.z_far)
    }

    pub fn distance(&self) -> f32 {
        (self.position - self.center).magnitude()
    }

    pub fn resize(&mut self, width: u32, height: u32) {
        self.viewport = Vector2::new(width as f32, height as f32);
    }

    /// Rotates the eye around the centre by a pointer drag of `dx`, `dy` pixels.
    ///
    /// A drag across the full viewport turns by half a revolution.
    pub fn orbit(&mut self, dx: f32, dy: f32) {
        let d = self.position - self.center;
        let distance = d.magnitude();
        if distance <= f32::EPSILON {
            return;
        }
        let mut azimuth = d.x.atan2(d.z);
        let mut elevation = d.y.atan2(Vector2::new(d.x, d.z).magnitude());
        azimuth -= dx / self.viewport.x.max(1.0) * PI;
        elevation = (elevation + dy / self.viewport.y.max(1.0) * PI)
            .clamp(-MAX_ELEVATION, MAX_ELEVATION);
        let offset = Vector3::new(
            distance * elevation.cos() * azimuth.sin(),
            distance * elevation.sin(),
            distance * elevation.cos() * azimuth.cos(),
        );
        self.position = self.center + offset;
    }

    /// Moves towards the centre for positive `scroll`, away for negative.
    pub fn zoom(&mut self, scroll: f32) {
        let d = self.position - self.center;
        self.position = self.center + d * 0.99f32.powf(scroll);
    }

    /// Centres on `range` and backs off along +Z far enough to see all of it.
    ///
    /// Returns false and leaves the camera alone for an empty range.
    pub fn frame(&mut self, range: &Range3, distance_factor: f32) -> bool {
        let (Some(center), Some(size)) = (range.center(), range.size()) else {
            return false;
        };
        let aspect_fit = size.x / self.viewport.x.max(1.0) * self.viewport.y;
        let mut distance = aspect_fit.max(size.y) * distance_factor;
        if distance <= f32::EPSILON {
            // a point or a flat sliver seen edge-on
            distance = distance_factor.max(f32::EPSILON);
        }
        self.center = center;
        self.position = center + Vector3::unit_z() * distance;
        self.z_near = 0.1 * distance;
        self.z_far = 10.0 * distance;
        true
    }
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Light {
    pub position: Point3<f32>,
    pub color: Vector3<f32>,
}

impl Default for Light {
    fn default() -> Self {
        Self {
            position: Point3::new(0.5, 0.7, 1.0),
            color: Vector3::new(1.0, 1.0, 1.0),
        }
    }
}

impl Light {
    /// Puts the light up and to the right of `range`, bright enough to reach it.
    pub fn place_for(&mut self, range: &Range3) {
        let (Some(center), Some(size)) = (range.center(), range.size()) else {
            return;
        };
        let reach = 2.0 * size.magnitude();
        self.position = center + Vector3::new(0.5, 0.7, 1.0).normalize() * reach;
        self.color = Vector3::new(1.0, 1.0, 1.0) * reach * reach;
    }

    /// Colour scaled by the user's light factor.
    pub fn radiance(&self, factor: f32) -> Vector3<f32> {
        self.color * factor
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPS: f32 = 1e-4;

    fn unit_box() -> Range3 {
        Range3::from_corners(Point3::new(-1.0, -1.0, -1.0), Point3::new(1.0, 1.0, 1.0))
    }

    #[test]
    fn frames_bounds_along_z() {
        let mut camera = Camera::default();
        camera.resize(800, 600);
        assert!(camera.frame(&unit_box(), 1.5));
        // max(2 * 600 / 800, 2) * 1.5
        assert!((camera.distance() - 3.0).abs() < EPS);
        assert_eq!(camera.center, Point3::new(0.0, 0.0, 0.0));
        assert!((camera.z_near - 0.3).abs() < EPS);
        assert!((camera.z_far - 30.0).abs() < EPS);
    }

    #[test]
    fn empty_range_leaves_camera_untouched() {
        let mut camera = Camera::default();
        let before = camera;
        assert!(!camera.frame(&Range3::new(), 1.5));
        assert_eq!(camera, before);
    }

    #[test]
    fn orbit_keeps_distance() {
        let mut camera = Camera::default();
        camera.frame(&unit_box(), 1.5);
        let distance = camera.distance();
        camera.orbit(200.0, -120.0);
        assert!((camera.distance() - distance).abs() < EPS);
        assert!(camera.position.x < 0.0);
        assert!(camera.position.y < 0.0);
    }

    #[test]
    fn zoom_scales_distance() {
        let mut camera = Camera::default();
        camera.zoom(10.0);
        assert!((camera.distance() - 5.0 * 0.99f32.powi(10)).abs() < EPS);
        camera.zoom(-10.0);
        assert!((camera.distance() - 5.0).abs() < EPS);
    }

    #[test]
    fn light_reach_grows_with_scene() {
        let mut light = Light::default();
        light.place_for(&unit_box());
        let reach = 2.0 * Vector3::new(2.0f32, 2.0, 2.0).magnitude();
        assert!(((light.position - Point3::origin()).magnitude() - reach).abs() < EPS);
        assert!((light.color.x - reach * reach).abs() < 1e-2);
        assert!((light.radiance(0.5).y - reach * reach * 0.5).abs() < 1e-2);
    }
}
