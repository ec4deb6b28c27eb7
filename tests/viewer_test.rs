mod common;

use std::path::Path;

use common::test_utils::{CountingDecoder, node, quad_mesh, solid_rgba};
use view_ngin::{
    cgmath::{Matrix4, Vector3},
    config::ViewerConfig,
    device::{RenderDevice, headless::HeadlessDevice},
    render::Viewer,
    resources::{
        import::ImportContext,
        source::{SourceMaterial, SourceScene, TextureKind},
    },
};

const CLEAR: [f32; 4] = [0.3, 0.3, 0.5, 1.0];

fn two_quads() -> SourceScene {
    SourceScene {
        root: node(
            "root",
            Matrix4::from_scale(1.0),
            vec![0],
            vec![node(
                "offset",
                Matrix4::from_translation(Vector3::new(2.0, 0.0, 0.0)),
                vec![1],
                vec![],
            )],
        ),
        meshes: vec![quad_mesh("textured", 0), quad_mesh("plain", 1)],
        materials: vec![
            SourceMaterial::new("wood").with_texture(TextureKind::Diffuse, "wood.png"),
            SourceMaterial::new("paint"),
        ],
    }
}

fn viewer_with_textures(device: &HeadlessDevice) -> Viewer {
    let images = CountingDecoder::new().with_image("scenes/wood.png", solid_rgba(4, 4, [120, 80, 40, 255]));
    let ctx = ImportContext::with_image_decoder(device.max_texture_dimension(), Box::new(images));
    Viewer::with_import_context(&ViewerConfig::default(), ctx)
}

fn load(viewer: &mut Viewer, device: &mut HeadlessDevice, scene: SourceScene, clear: bool) -> bool {
    let decoder = move |_: &Path| -> anyhow::Result<SourceScene> { Ok(scene.clone()) };
    viewer.load_with(Path::new("scenes/model.gltf"), clear, device, &decoder)
}

#[test]
fn first_frame_uploads_and_draws_every_mesh() {
    let mut device = HeadlessDevice::new();
    let mut viewer = viewer_with_textures(&device);
    assert!(load(&mut viewer, &mut device, two_quads(), true));

    // importing alone touches nothing on the device
    assert_eq!(device.stats().buffers_created, 0);
    assert_eq!(device.stats().images_created, 0);

    viewer.render(&mut device, CLEAR);
    let stats = device.stats();
    assert_eq!(stats.draws, 2);
    assert_eq!(stats.images_created, 1);
    assert_eq!(stats.programs_created, 1);

    let draws = device.draws();
    assert!(draws[0].bound_image.is_some());
    assert_eq!(draws[0].params.float("diffuse_enabled"), Some(1.0));
    assert_eq!(draws[1].params.float("diffuse_enabled"), Some(0.0));
    assert_eq!(draws[0].params.float("roughness"), Some(viewer.params.roughness));
    assert!(draws.iter().all(|d| d.framebuffer.is_none()));
}

#[test]
fn later_frames_reuse_device_objects() {
    let mut device = HeadlessDevice::new();
    let mut viewer = viewer_with_textures(&device);
    load(&mut viewer, &mut device, two_quads(), true);

    viewer.render(&mut device, CLEAR);
    let after_first = device.stats();
    viewer.params.adjust_roughness(0.2);
    viewer.render(&mut device, CLEAR);
    let after_second = device.stats();

    assert_eq!(after_second.buffers_created, after_first.buffers_created);
    assert_eq!(after_second.images_created, after_first.images_created);
    assert_eq!(after_second.programs_created, 1);
    assert_eq!(after_second.draws, 4);
    let roughness = device.draws()[3].params.float("roughness").unwrap();
    assert!((roughness - 0.7).abs() < 1e-6);
}

#[test]
fn loading_frames_camera_on_scene_bounds() {
    let mut device = HeadlessDevice::new();
    let mut viewer = viewer_with_textures(&device);
    load(&mut viewer, &mut device, two_quads(), true);

    let min = viewer.bounds.min().unwrap();
    let max = viewer.bounds.max().unwrap();
    assert_eq!([min.x, min.y, min.z], [0.0, 0.0, 0.0]);
    assert_eq!([max.x, max.y, max.z], [3.0, 1.0, 0.0]);

    let camera = viewer.camera;
    assert_eq!(camera.center, viewer.bounds.center().unwrap());
    assert!(camera.z_near > 0.0 && camera.z_near < camera.z_far);
    assert!(camera.distance() > 0.0);
}

#[test]
fn reloading_replaces_or_extends_the_scene() {
    let mut device = HeadlessDevice::new();
    let mut viewer = viewer_with_textures(&device);
    load(&mut viewer, &mut device, two_quads(), true);
    viewer.render(&mut device, CLEAR);
    let live = device.stats().live_buffers();
    assert!(live > 0);

    let shifted = SourceScene {
        root: node(
            "root",
            Matrix4::from_translation(Vector3::new(0.0, -4.0, 0.0)),
            vec![0],
            vec![],
        ),
        meshes: vec![quad_mesh("below", 0)],
        materials: vec![SourceMaterial::new("m")],
    };
    assert!(load(&mut viewer, &mut device, shifted.clone(), false));
    assert_eq!(viewer.scene.meshes.len(), 3);
    assert_eq!(viewer.bounds.min().unwrap().y, -4.0);
    assert_eq!(viewer.bounds.max().unwrap().x, 3.0);

    assert!(load(&mut viewer, &mut device, shifted, true));
    assert_eq!(viewer.scene.meshes.len(), 1);
    assert!(viewer.scene.textures.is_empty());
    assert_eq!(device.stats().live_buffers(), 0);
    assert_eq!(device.stats().live_images(), 0);
    assert_eq!(viewer.bounds.max().unwrap().y, -3.0);
}

#[test]
fn release_frees_program_and_scene() {
    let mut device = HeadlessDevice::new();
    let mut viewer = viewer_with_textures(&device);
    load(&mut viewer, &mut device, two_quads(), true);
    viewer.render(&mut device, CLEAR);
    viewer.release(&mut device);

    let stats = device.stats();
    assert_eq!(stats.programs_destroyed, 1);
    assert_eq!(stats.live_buffers(), 0);
    assert_eq!(stats.live_images(), 0);
}
