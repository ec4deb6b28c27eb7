//! Textures with lazily created, dirty-tracked device images.
//!
//! A [`Texture`] holds its pixels on the host until the first time it is bound
//! (or explicitly materialized) and only then talks to the [`RenderDevice`].
//! The device image is reallocated only when the [`TextureShape`] changes;
//! re-uploading data of the same shape goes through the in-place update path
//! so existing bindings of the image stay valid.
//!
//! - [`Texture::load`] decodes a file, optionally resampling it to a target
//!   width and to the device's size limit
//! - [`Texture::create`] / [`Texture::create_volume`] install caller data
//! - [`Texture::create_or_update_device`] and [`Texture::bind`] materialize it

use std::{path::Path, sync::Arc};

use crate::{
    device::{
        ColorSpace, ElementType, ImageDesc, ImageDimension, ImageHandle, PixelFormat,
        RenderDevice, SamplerParams,
    },
    resources::image::{ImageDecoder, fit_dimensions, resample},
};

use super::texture_library::normalize_path;

/// Host pixel storage of a texture.
///
/// `Owned` data belongs to the texture and is dropped after upload. `Shared`
/// data is supplied by the caller, who keeps ownership; the texture only holds
/// a reference until the upload.
#[derive(Clone, Debug)]
pub enum CpuPixels {
    Owned(Vec<u8>),
    Shared(Arc<[u8]>),
}

impl CpuPixels {
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            CpuPixels::Owned(v) => v,
            CpuPixels::Shared(s) => s,
        }
    }

    pub fn is_owned(&self) -> bool {
        matches!(self, CpuPixels::Owned(_))
    }
}

impl From<Vec<u8>> for CpuPixels {
    fn from(value: Vec<u8>) -> Self {
        CpuPixels::Owned(value)
    }
}

impl From<Arc<[u8]>> for CpuPixels {
    fn from(value: Arc<[u8]>) -> Self {
        CpuPixels::Shared(value)
    }
}

/// Everything that decides whether a device image can be updated in place.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct TextureShape {
    pub dimension: ImageDimension,
    pub width: u32,
    pub height: u32,
    pub depth: u32,
    pub channels: u32,
    pub element: ElementType,
    pub color_space: ColorSpace,
}

impl TextureShape {
    pub fn new_2d(
        width: u32,
        height: u32,
        channels: u32,
        element: ElementType,
        color_space: ColorSpace,
    ) -> Self {
        Self {
            dimension: ImageDimension::D2,
            width,
            height,
            depth: 1,
            channels,
            element,
            color_space,
        }
    }

    pub fn new_3d(
        width: u32,
        height: u32,
        depth: u32,
        channels: u32,
        element: ElementType,
        color_space: ColorSpace,
    ) -> Self {
        Self {
            dimension: ImageDimension::D3,
            depth,
            ..Self::new_2d(width, height, channels, element, color_space)
        }
    }

    pub fn format(&self) -> PixelFormat {
        PixelFormat::derive(self.element, self.channels, self.color_space)
    }

    pub fn byte_size(&self) -> usize {
        self.width as usize
            * self.height as usize
            * self.depth.max(1) as usize
            * self.format().bytes_per_pixel()
    }
}

/// Coarse lifecycle state, mostly useful for inspection and tests.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum TextureState {
    /// No shape known yet, nothing to upload.
    Empty,
    /// Host data differs from the device image (or there is no device image).
    Dirty,
    /// The device image matches the host state.
    Resident,
}

#[derive(Copy, Clone, Debug)]
struct Resident {
    image: ImageHandle,
    shape: TextureShape,
}

#[derive(Debug)]
pub struct Texture {
    name: String,
    shape: Option<TextureShape>,
    pixels: Option<CpuPixels>,
    dirty: bool,
    resident: Option<Resident>,
    sampler: SamplerParams,
    render_target: bool,
}

impl Default for Texture {
    fn default() -> Self {
        Self::new()
    }
}

impl Texture {
    pub fn new() -> Self {
        Self {
            name: String::new(),
            shape: None,
            pixels: None,
            dirty: false,
            resident: None,
            sampler: SamplerParams::default(),
            render_target: false,
        }
    }

    /// A texture meant to be a framebuffer colour attachment.
    pub(crate) fn render_surface() -> Self {
        let mut texture = Self::new();
        texture.sampler = SamplerParams::render_target();
        texture.render_target = true;
        texture
    }

    /// Decodes `path` and installs it as the new host data.
    ///
    /// HDR images are always stored as linear `f32`, whatever `color_space`
    /// says. The decoded size is scaled to `target_width` (keeping the aspect
    /// ratio) and then clamped to `max_dimension`; the image is resampled when
    /// the result differs from the decoded size.
    ///
    /// Returns `false` and leaves the texture untouched when the file cannot
    /// be decoded.
    pub fn load(
        &mut self,
        path: &str,
        color_space: ColorSpace,
        target_width: Option<u32>,
        decoder: &dyn ImageDecoder,
        max_dimension: u32,
    ) -> bool {
        let path = normalize_path(path);
        let image = match decoder.decode(Path::new(&path)) {
            Ok(image) => image,
            Err(e) => {
                log::warn!("Could not load texture {}: {:#}", path, e);
                return false;
            }
        };
        let (element, color_space) = if image.hdr {
            (ElementType::F32, ColorSpace::Linear)
        } else {
            (image.element, color_space)
        };
        let (width, height) =
            fit_dimensions(image.width, image.height, target_width, max_dimension);
        log::info!(
            "Loaded texture {} ({}x{}, {} channels, {})",
            path,
            image.width,
            image.height,
            image.channels,
            element
        );
        let channels = image.channels;
        let pixels = if (width, height) != (image.width, image.height) {
            log::info!("Resampling {} to {}x{}", path, width, height);
            match resample(&image, width, height, color_space) {
                Ok(pixels) => pixels,
                Err(e) => {
                    log::warn!("Could not resample texture {}: {:#}", path, e);
                    return false;
                }
            }
        } else {
            image.pixels
        };

        self.pixels = Some(CpuPixels::Owned(pixels));
        self.shape = Some(TextureShape::new_2d(
            width,
            height,
            channels,
            element,
            color_space,
        ));
        self.name = path;
        self.dirty = true;
        true
    }

    /// Installs caller supplied 2D data and marks the texture dirty.
    pub fn create(
        &mut self,
        width: u32,
        height: u32,
        channels: u32,
        element: ElementType,
        pixels: impl Into<CpuPixels>,
        color_space: ColorSpace,
    ) {
        self.shape = Some(TextureShape::new_2d(
            width,
            height,
            channels,
            element,
            color_space,
        ));
        self.pixels = Some(pixels.into());
        self.dirty = true;
    }

    /// Installs caller supplied volume data and marks the texture dirty.
    pub fn create_volume(
        &mut self,
        width: u32,
        height: u32,
        depth: u32,
        channels: u32,
        element: ElementType,
        pixels: impl Into<CpuPixels>,
        color_space: ColorSpace,
    ) {
        self.shape = Some(TextureShape::new_3d(
            width,
            height,
            depth,
            channels,
            element,
            color_space,
        ));
        self.pixels = Some(pixels.into());
        self.dirty = true;
    }

    /// Sets a shape without host data; the device image is allocated uninitialized.
    pub(crate) fn create_uninitialized(&mut self, shape: TextureShape) {
        self.shape = Some(shape);
        self.pixels = None;
        self.dirty = true;
    }

    /// Brings the device image in line with the host state.
    ///
    /// Same shape as the resident image: upload in place. Different shape or
    /// nothing resident: destroy, allocate, upload. Either way mips are
    /// regenerated after an upload and the host pixels are dropped.
    pub fn create_or_update_device(&mut self, device: &mut dyn RenderDevice) {
        let Some(shape) = self.shape.filter(|s| s.channels > 0) else {
            return;
        };
        let pixels = self.pixels.take();
        let data = pixels.as_ref().map(CpuPixels::as_bytes).filter(|data| {
            let ok = data.len() >= shape.byte_size();
            if !ok {
                log::error!(
                    "Texture {} has {} bytes but its shape needs {}",
                    self.name,
                    data.len(),
                    shape.byte_size()
                );
            }
            ok
        });

        let image = match self.resident {
            Some(resident) if resident.shape == shape => {
                log::debug!("Updating texture {} in place", self.name);
                resident.image
            }
            _ => {
                self.release(device);
                log::debug!(
                    "Allocating texture {} ({}x{}x{})",
                    self.name,
                    shape.width,
                    shape.height,
                    shape.depth
                );
                let image = device.create_image(&ImageDesc {
                    dimension: shape.dimension,
                    width: shape.width,
                    height: shape.height,
                    depth: shape.depth,
                    format: shape.format(),
                    sampler: self.sampler,
                    render_target: self.render_target,
                });
                self.resident = Some(Resident { image, shape });
                image
            }
        };
        if let Some(data) = data {
            device.write_image(image, &data[..shape.byte_size()]);
            if self.sampler.uses_mipmaps() {
                device.generate_mipmaps(image);
            }
        }
        self.dirty = false;
    }

    /// Binds the device image to `slot`, materializing it first if needed.
    ///
    /// Does nothing when there is no data to materialize.
    pub fn bind(&mut self, device: &mut dyn RenderDevice, slot: u32) {
        if self.resident.is_none() || self.dirty {
            if self.channels() == 0 {
                return;
            }
            self.create_or_update_device(device);
        }
        if let Some(resident) = self.resident {
            device.bind_image(slot, Some(resident.image));
        }
    }

    /// Replaces layer `layer` of a volume texture on the device.
    ///
    /// Returns `false` for 2D textures, out of range layers or when nothing
    /// could be materialized.
    pub fn update_layer(&mut self, device: &mut dyn RenderDevice, layer: u32, data: &[u8]) -> bool {
        let Some(shape) = self.shape.filter(|s| s.dimension == ImageDimension::D3) else {
            log::warn!("update_layer on non-volume texture {}", self.name);
            return false;
        };
        if layer >= shape.depth {
            log::warn!("Layer {} out of range for texture {}", layer, self.name);
            return false;
        }
        if self.resident.is_none() || self.dirty {
            self.create_or_update_device(device);
        }
        match self.resident {
            Some(resident) => {
                device.write_image_layer(resident.image, layer, data);
                true
            }
            None => false,
        }
    }

    /// Destroys the device image. Host data, if still present, stays and is
    /// uploaded again on the next bind.
    pub fn release(&mut self, device: &mut dyn RenderDevice) {
        if let Some(resident) = self.resident.take() {
            device.destroy_image(resident.image);
        }
        self.dirty = self.pixels.is_some();
    }

    pub fn state(&self) -> TextureState {
        match (self.shape, self.resident) {
            (None, _) => TextureState::Empty,
            (Some(_), Some(_)) if !self.dirty => TextureState::Resident,
            _ => TextureState::Dirty,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_name(&mut self, name: &str) {
        self.name = name.to_string();
    }

    pub fn shape(&self) -> Option<TextureShape> {
        self.shape
    }

    pub fn width(&self) -> u32 {
        self.shape.map_or(0, |s| s.width)
    }

    pub fn height(&self) -> u32 {
        self.shape.map_or(0, |s| s.height)
    }

    pub fn depth(&self) -> u32 {
        self.shape.map_or(0, |s| s.depth)
    }

    pub fn channels(&self) -> u32 {
        self.shape.map_or(0, |s| s.channels)
    }

    pub fn element(&self) -> Option<ElementType> {
        self.shape.map(|s| s.element)
    }

    pub fn color_space(&self) -> ColorSpace {
        self.shape.map_or(ColorSpace::Linear, |s| s.color_space)
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Host pixels still waiting for upload.
    pub fn pixels(&self) -> Option<&CpuPixels> {
        self.pixels.as_ref()
    }

    pub fn handle(&self) -> Option<ImageHandle> {
        self.resident.map(|r| r.image)
    }

    pub fn sampler(&self) -> SamplerParams {
        self.sampler
    }

    /// Changes sampling; applies to the next allocation of the device image.
    pub fn set_sampler(&mut self, sampler: SamplerParams) {
        self.sampler = sampler;
    }
}

impl Drop for Texture {
    fn drop(&mut self) {
        if let Some(resident) = self.resident {
            log::debug!(
                "Texture {} dropped without release, image {:?} stays on the device",
                self.name,
                resident.image
            );
        }
    }
}
