//! Frame composition for the model viewer.
//!
//! [`Viewer`] holds everything one frame needs: the imported meshes and
//! their textures, the scene bounds, camera, light and the user's shading
//! parameters. It talks to the GPU only through [`RenderDevice`], so the same
//! frame runs against [`WgpuDevice`](crate::device::wgpu_device::WgpuDevice)
//! in the window and against
//! [`HeadlessDevice`](crate::device::headless::HeadlessDevice) in tests.
//!
//! Meshes and textures are uploaded lazily by the first frame that draws
//! them.

use std::path::Path;

use cgmath::{EuclideanSpace, Matrix4, SquareMatrix};

use crate::{
    camera::{Camera, Light},
    config::{ViewerConfig, ViewerParams},
    data_structures::{program::Program, range::Range3},
    device::{Capability, Rect, RenderDevice, ShaderParams},
    pipelines::basic::BASIC_SHADER,
    resources::{
        AnySceneDecoder,
        import::{ImportContext, import_scene},
        source::SceneDecoder,
    },
};

/// Texture unit the diffuse map is bound to.
pub const DIFFUSE_SLOT: u32 = 0;

pub struct Viewer {
    pub scene: ImportContext,
    pub bounds: Range3,
    pub camera: Camera,
    pub light: Light,
    pub params: ViewerParams,
    pub distance_factor: f32,
    program: Program,
}

impl Viewer {
    pub fn new(config: &ViewerConfig, max_texture_dimension: u32) -> Self {
        Self::with_import_context(config, ImportContext::new(max_texture_dimension))
    }

    pub fn with_import_context(config: &ViewerConfig, scene: ImportContext) -> Self {
        let mut camera = Camera::default();
        camera.resize(config.width, config.height);
        Self {
            scene,
            bounds: Range3::new(),
            camera,
            light: Light::default(),
            params: config.params,
            distance_factor: config.distance_factor,
            program: Program::from_source("basic", BASIC_SHADER, BASIC_SHADER),
        }
    }

    /// Imports a glTF or OBJ file, picking the format from its extension.
    pub fn load_file(
        &mut self,
        path: &Path,
        clear_previous: bool,
        device: &mut dyn RenderDevice,
    ) -> bool {
        self.load_with(path, clear_previous, device, &AnySceneDecoder)
    }

    /// Imports `path` through `decoder`, then reframes camera and light.
    ///
    /// Returns false when nothing with extent was imported; the previous
    /// framing is kept in that case.
    pub fn load_with(
        &mut self,
        path: &Path,
        clear_previous: bool,
        device: &mut dyn RenderDevice,
        decoder: &dyn SceneDecoder,
    ) -> bool {
        if clear_previous {
            self.scene.clear(device);
            self.bounds = Range3::new();
        }
        let range = import_scene(path, &mut self.scene, decoder);
        if range.is_empty() {
            return false;
        }
        self.bounds.merge(&range);
        self.camera.frame(&self.bounds, self.distance_factor);
        self.light.place_for(&self.bounds);
        true
    }

    pub fn resize(&mut self, width: u32, height: u32) {
        self.camera.resize(width, height);
    }

    /// Draws every mesh into the bound framebuffer.
    pub fn render(&mut self, device: &mut dyn RenderDevice, clear_color: [f32; 4]) {
        let camera = &self.camera;
        device.set_viewport(Rect::new(
            0,
            0,
            camera.viewport.x as u32,
            camera.viewport.y as u32,
        ));
        device.set_capability(Capability::DepthTest, true);
        device.clear(clear_color, true);

        let Some(program) = self.program.use_program(device) else {
            return;
        };
        let mut params = ShaderParams::new();
        params
            .set("viewport", camera.viewport)
            .set("z_near", camera.z_near)
            .set("z_far", camera.z_far)
            .set("camera_position", camera.position.to_vec())
            .set("view", camera.view())
            .set("projection", camera.projection())
            .set("light_position", self.light.position.to_vec())
            .set("light_color", self.light.radiance(self.params.light_factor));

        for mesh in self.scene.meshes.iter_mut() {
            let diffuse = mesh.material.diffuse_texture;
            // Without a map the previous binding stays; the shader ignores it.
            if let Some(texture) = diffuse.and_then(|id| self.scene.textures.get_mut(id)) {
                texture.bind(device, DIFFUSE_SLOT);
            }
            params
                .set("roughness", self.params.roughness)
                .set("diffuse_enabled", diffuse.is_some());
            mesh.render(device, program, &mut params, Matrix4::identity());
        }
    }

    /// Frees every device object the viewer created.
    pub fn release(&mut self, device: &mut dyn RenderDevice) {
        self.scene.clear(device);
        self.program.release(device);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::headless::HeadlessDevice;

    #[test]
    fn empty_frame_clears_and_builds_program_once() {
        let mut device = HeadlessDevice::new();
        let mut viewer = Viewer::new(&ViewerConfig::default(), device.max_texture_dimension());
        viewer.render(&mut device, [0.3, 0.3, 0.5, 1.0]);
        viewer.render(&mut device, [0.3, 0.3, 0.5, 1.0]);
        let stats = device.stats();
        assert_eq!(stats.clears, 2);
        assert_eq!(stats.programs_created, 1);
        assert_eq!(stats.draws, 0);
        assert!(device.ambient_state().depth_test);
        assert_eq!(device.ambient_state().viewport, Rect::new(0, 0, 800, 600));
    }

    #[test]
    fn failed_load_keeps_framing() {
        let mut device = HeadlessDevice::new();
        let mut viewer = Viewer::new(&ViewerConfig::default(), device.max_texture_dimension());
        let camera = viewer.camera;
        let missing = |_: &Path| -> anyhow::Result<crate::resources::source::SourceScene> {
            anyhow::bail!("no such scene")
        };
        assert!(!viewer.load_with(Path::new("nowhere.obj"), true, &mut device, &missing));
        assert_eq!(viewer.camera, camera);
        assert!(viewer.bounds.is_empty());
    }
}
