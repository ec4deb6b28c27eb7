mod common;

use common::test_utils::{CountingDecoder, solid_rgba, temp_dir, write_png};
use view_ngin::{
    data_structures::{framebuffer::RenderTarget, texture::Texture, texture_library::TextureLibrary},
    device::{
        Capability, ColorSpace, ElementType, Rect, RenderDevice, headless::HeadlessDevice,
    },
    resources::image::FileImageDecoder,
};

#[test]
fn configure_twice_with_same_parameters_is_a_no_op() {
    let mut device = HeadlessDevice::new();
    let mut target = RenderTarget::new();
    target.configure(&mut device, 64, 32, ElementType::U8, 4, true);
    let after_first = device.stats();
    assert_eq!(after_first.framebuffers_created, 1);
    assert_eq!(after_first.depth_surfaces_created, 1);

    target.configure(&mut device, 64, 32, ElementType::U8, 4, true);
    assert_eq!(device.stats(), after_first);

    target.configure(&mut device, 128, 32, ElementType::U8, 4, true);
    let stats = device.stats();
    assert_eq!(stats.framebuffers_created, 2);
    assert_eq!(stats.framebuffers_destroyed, 1);
    assert_eq!(stats.live_images(), 2);
    assert_eq!((target.width(), target.height()), (128, 32));
}

#[test]
fn configure_leaves_bindings_alone() {
    let mut device = HeadlessDevice::new();
    let mut texture = Texture::new();
    texture.create(2, 2, 4, ElementType::U8, vec![255; 16], ColorSpace::Srgb);
    texture.bind(&mut device, 0);
    let bound = device.bound_image(0);
    assert!(bound.is_some());

    let mut target = RenderTarget::new();
    target.configure(&mut device, 16, 16, ElementType::F32, 4, false);
    assert_eq!(device.bound_image(0), bound);
    assert!(target.depth().is_none());
}

#[test]
fn pass_restores_ambient_state() {
    let mut device = HeadlessDevice::new();
    device.set_viewport(Rect::new(5, 5, 300, 200));
    device.set_capability(Capability::ScissorTest, true);
    device.set_capability(Capability::DepthTest, true);
    let before = device.ambient_state();

    let mut target = RenderTarget::new();
    target.configure(&mut device, 32, 16, ElementType::U8, 4, true);
    assert_eq!(device.ambient_state(), before);

    target.render_into(&mut device, true, |device| {
        let inside = device.ambient_state();
        assert_eq!(inside.viewport, Rect::new(0, 0, 32, 16));
        assert!(!inside.scissor_test);
        assert!(inside.draw_framebuffer.is_some());
        device.set_capability(Capability::CullFace, true);
        device.clear([0.0, 0.0, 0.0, 1.0], true);
    });

    assert_eq!(device.ambient_state(), before);
    assert!(!target.is_in_use());
}

#[test]
fn nested_begin_keeps_the_outer_snapshot() {
    let mut device = HeadlessDevice::new();
    let outer = device.ambient_state();
    let mut target = RenderTarget::new();
    target.configure(&mut device, 8, 8, ElementType::U8, 4, false);

    target.begin(&mut device, true);
    target.begin(&mut device, false);
    assert!(target.is_in_use());
    target.end(&mut device);
    assert_eq!(device.ambient_state(), outer);
}

#[test]
fn readback_has_one_value_per_channel_and_pixel() {
    let mut device = HeadlessDevice::new();
    let mut target = RenderTarget::new();

    target.configure(&mut device, 4, 3, ElementType::U8, 4, false);
    assert_eq!(target.read_pixels::<u8>(&mut device).len(), 4 * 3 * 4);

    target.configure(&mut device, 4, 3, ElementType::F32, 3, false);
    assert_eq!(target.read_pixels::<f32>(&mut device).len(), 4 * 3 * 3);

    target.configure(&mut device, 5, 2, ElementType::F32, 1, true);
    assert_eq!(target.read_pixels::<f32>(&mut device).len(), 5 * 2);
}

#[test]
fn unconfigured_target_reads_nothing() {
    let mut device = HeadlessDevice::new();
    let target = RenderTarget::new();
    assert!(target.read_pixels::<u8>(&mut device).is_empty());
    assert_eq!(device.stats().readbacks, 0);
}

#[test]
fn released_target_frees_every_device_object() {
    let mut device = HeadlessDevice::new();
    let mut target = RenderTarget::new();
    target.configure(&mut device, 8, 8, ElementType::U8, 4, true);
    target.release(&mut device);
    let stats = device.stats();
    assert_eq!(stats.live_images(), 0);
    assert_eq!(stats.framebuffers_destroyed, 1);
    assert!(target.framebuffer().is_none());
}

#[test]
fn png_is_scaled_to_target_width_keeping_aspect() {
    let dir = temp_dir("scaled-png");
    let path = dir.join("banner.png");
    write_png(&path, 8, 4, [10, 20, 30, 255]);

    let mut texture = Texture::new();
    assert!(texture.load(
        &path.to_string_lossy(),
        ColorSpace::Srgb,
        Some(4),
        &FileImageDecoder,
        4096,
    ));
    assert_eq!((texture.width(), texture.height()), (4, 2));
    assert_eq!(texture.channels(), 4);
    assert_eq!(texture.element(), Some(ElementType::U8));
    assert!(texture.is_dirty());

    let mut device = HeadlessDevice::new();
    texture.create_or_update_device(&mut device);
    assert!(!texture.is_dirty());
    assert_eq!(device.stats().images_created, 1);

    std::fs::remove_dir_all(dir).ok();
}

#[test]
fn oversized_image_is_clamped_to_device_limit() {
    let decoder = CountingDecoder::new().with_image("big.png", solid_rgba(64, 16, [0; 4]));
    let mut texture = Texture::new();
    assert!(texture.load("big.png", ColorSpace::Linear, None, &decoder, 32));
    assert_eq!((texture.width(), texture.height()), (32, 8));
}

#[test]
fn missing_file_leaves_texture_untouched() {
    let mut texture = Texture::new();
    assert!(!texture.load(
        "does/not/exist.png",
        ColorSpace::Srgb,
        None,
        &FileImageDecoder,
        4096,
    ));
    assert_eq!(texture.width(), 0);
    assert!(texture.name().is_empty());
}

#[test]
fn library_retries_paths_that_failed() {
    let decoder = CountingDecoder::new();
    let calls = decoder.calls();
    let mut library = TextureLibrary::new(1024);
    assert!(library.test_and_load("a.png", ColorSpace::Srgb, &decoder).is_none());
    assert!(library.test_and_load("a.png", ColorSpace::Srgb, &decoder).is_none());
    assert_eq!(calls.get(), 2);
    assert!(library.is_empty());

    let decoder = decoder.with_image("a.png", solid_rgba(1, 1, [1; 4]));
    let id = library.test_and_load("a.png", ColorSpace::Srgb, &decoder);
    assert!(id.is_some());
    assert_eq!(library.search("a.png"), id);
    assert_eq!(library.test_and_load("a.png", ColorSpace::Srgb, &decoder), id);
    assert_eq!(calls.get(), 3);
}
