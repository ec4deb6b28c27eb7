//! The device interface the resource layer is written against.
//!
//! Every GPU-backed wrapper in [`crate::data_structures`] talks to a
//! [`RenderDevice`] instead of a concrete API. Two implementations ship with the
//! crate:
//!
//! - [`wgpu_device::WgpuDevice`] drives a real GPU through wgpu
//! - [`headless::HeadlessDevice`] keeps every object in host memory and counts
//!   allocations, uploads and draws, which is what the tests assert against
//!
//! The interface is deliberately close to a classic bind-and-draw API: images,
//! framebuffers, buffers and programs are referred to by copyable handles, and
//! the device carries "ambient" state (framebuffer bindings, viewport, scissor
//! box and three toggles) that off-screen passes snapshot and restore.

use std::fmt;

use cgmath::{Matrix3, Matrix4, Vector2, Vector3, Vector4};

pub mod headless;
pub mod mipmap;
pub mod wgpu_device;

macro_rules! device_handle {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(u64);

        impl $name {
            pub fn new(id: u64) -> Self {
                Self(id)
            }

            pub fn id(&self) -> u64 {
                self.0
            }
        }
    };
}

device_handle!(
    /// A 2D or 3D image object (colour or depth).
    ImageHandle
);
device_handle!(
    /// A framebuffer object combining a colour image and an optional depth surface.
    FramebufferHandle
);
device_handle!(
    /// A vertex or index buffer.
    BufferHandle
);
device_handle!(
    /// A linked shader program.
    ProgramHandle
);

/// Scalar type of one channel of a pixel.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ElementType {
    U8,
    U16,
    U32,
    F32,
}

impl ElementType {
    pub fn size(&self) -> usize {
        match self {
            ElementType::U8 => 1,
            ElementType::U16 => 2,
            ElementType::U32 | ElementType::F32 => 4,
        }
    }
}

/// Whether 8-bit colour data is stored perceptually encoded (sRGB) or linear.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub enum ColorSpace {
    #[default]
    Linear,
    Srgb,
}

impl ColorSpace {
    pub fn from_srgb_flag(srgb: bool) -> Self {
        if srgb { ColorSpace::Srgb } else { ColorSpace::Linear }
    }

    pub fn is_srgb(&self) -> bool {
        matches!(self, ColorSpace::Srgb)
    }
}

/// Channel arrangement of pixel data crossing the host/device boundary.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ChannelLayout {
    Red,
    Rg,
    Rgb,
    Rgba,
}

impl ChannelLayout {
    /// Layout used when uploading `channels` interleaved channels.
    pub fn from_channels(channels: u32) -> Self {
        match channels {
            1 => ChannelLayout::Red,
            2 => ChannelLayout::Rg,
            4 => ChannelLayout::Rgba,
            _ => ChannelLayout::Rgb,
        }
    }

    /// Layout used when reading back a surface with `channels` channels.
    ///
    /// Only single channel and RGB survive as-is, everything else is read as RGBA.
    pub fn for_readback(channels: u32) -> Self {
        match channels {
            1 => ChannelLayout::Red,
            3 => ChannelLayout::Rgb,
            _ => ChannelLayout::Rgba,
        }
    }

    pub fn channels(&self) -> u32 {
        match self {
            ChannelLayout::Red => 1,
            ChannelLayout::Rg => 2,
            ChannelLayout::Rgb => 3,
            ChannelLayout::Rgba => 4,
        }
    }
}

/// Sized storage format of a device image.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum InternalFormat {
    R8,
    Rg8,
    Rgb8,
    Rgba8,
    Srgb8,
    Srgb8Alpha8,
    R16Ui,
    Rg16Ui,
    Rgb16Ui,
    Rgba16Ui,
    R32Ui,
    Rg32Ui,
    Rgb32Ui,
    Rgba32Ui,
    R32F,
    Rg32F,
    Rgb32F,
    Rgba32F,
}

/// Storage format plus the layout of the host data that feeds it.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct PixelFormat {
    pub internal: InternalFormat,
    pub layout: ChannelLayout,
    pub element: ElementType,
}

impl PixelFormat {
    /// Derives the device format for `channels` channels of `element`.
    ///
    /// sRGB only exists for 8-bit RGB and RGBA; it is ignored for every other
    /// combination. Channel counts outside 1..=4 fall back to the RGB form.
    pub fn derive(element: ElementType, channels: u32, color_space: ColorSpace) -> Self {
        use InternalFormat::*;
        let srgb = color_space.is_srgb();
        let internal = match (element, channels) {
            (ElementType::U8, 1) => R8,
            (ElementType::U8, 2) => Rg8,
            (ElementType::U8, 4) if srgb => Srgb8Alpha8,
            (ElementType::U8, 4) => Rgba8,
            (ElementType::U8, _) if srgb => Srgb8,
            (ElementType::U8, _) => Rgb8,
            (ElementType::U16, 1) => R16Ui,
            (ElementType::U16, 2) => Rg16Ui,
            (ElementType::U16, 4) => Rgba16Ui,
            (ElementType::U16, _) => Rgb16Ui,
            (ElementType::U32, 1) => R32Ui,
            (ElementType::U32, 2) => Rg32Ui,
            (ElementType::U32, 4) => Rgba32Ui,
            (ElementType::U32, _) => Rgb32Ui,
            (ElementType::F32, 1) => R32F,
            (ElementType::F32, 2) => Rg32F,
            (ElementType::F32, 4) => Rgba32F,
            (ElementType::F32, _) => Rgb32F,
        };
        Self {
            internal,
            layout: ChannelLayout::from_channels(channels),
            element,
        }
    }

    pub fn channels(&self) -> u32 {
        self.layout.channels()
    }

    pub fn bytes_per_pixel(&self) -> usize {
        self.layout.channels() as usize * self.element.size()
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ImageDimension {
    D2,
    D3,
}

/// Texture coordinate wrapping.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Wrap {
    Repeat,
    ClampToEdge,
    MirroredRepeat,
}

/// Minification filter.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Filter {
    Nearest,
    Linear,
    LinearMipmapLinear,
}

/// Sampling parameters attached to an image object.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct SamplerParams {
    pub min_filter: Filter,
    pub wrap_s: Wrap,
    pub wrap_t: Wrap,
    pub wrap_r: Wrap,
}

impl Default for SamplerParams {
    fn default() -> Self {
        Self {
            min_filter: Filter::LinearMipmapLinear,
            wrap_s: Wrap::Repeat,
            wrap_t: Wrap::Repeat,
            wrap_r: Wrap::Repeat,
        }
    }
}

impl SamplerParams {
    /// Filtering used for render target colour surfaces: no mips, linear.
    pub fn render_target() -> Self {
        Self {
            min_filter: Filter::Linear,
            ..Default::default()
        }
    }

    pub fn uses_mipmaps(&self) -> bool {
        matches!(self.min_filter, Filter::LinearMipmapLinear)
    }
}

/// Everything the device needs to allocate an image object.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct ImageDesc {
    pub dimension: ImageDimension,
    pub width: u32,
    pub height: u32,
    pub depth: u32,
    pub format: PixelFormat,
    pub sampler: SamplerParams,
    /// The image will be attached to a framebuffer.
    pub render_target: bool,
}

impl ImageDesc {
    pub fn byte_size(&self) -> usize {
        self.width as usize * self.height as usize * self.depth.max(1) as usize
            * self.format.bytes_per_pixel()
    }

    pub fn layer_size(&self) -> usize {
        self.width as usize * self.height as usize * self.format.bytes_per_pixel()
    }
}

/// Precision of a depth surface.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum DepthPrecision {
    Default,
    Float32,
}

/// Result of a framebuffer completeness check.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum FramebufferStatus {
    Complete,
    Incomplete(&'static str),
}

impl FramebufferStatus {
    pub fn is_complete(&self) -> bool {
        matches!(self, FramebufferStatus::Complete)
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    pub fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }
}

/// The three boolean render-state toggles.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Capability {
    CullFace,
    DepthTest,
    ScissorTest,
}

/// Device-global state that an off-screen pass must leave untouched.
///
/// `None` framebuffers denote the default (window) framebuffer.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct AmbientState {
    pub draw_framebuffer: Option<FramebufferHandle>,
    pub read_framebuffer: Option<FramebufferHandle>,
    pub viewport: Rect,
    pub scissor: Rect,
    pub cull_face: bool,
    pub depth_test: bool,
    pub scissor_test: bool,
}

impl AmbientState {
    pub fn capability(&self, capability: Capability) -> bool {
        match capability {
            Capability::CullFace => self.cull_face,
            Capability::DepthTest => self.depth_test,
            Capability::ScissorTest => self.scissor_test,
        }
    }

    pub fn set_capability(&mut self, capability: Capability, enabled: bool) {
        match capability {
            Capability::CullFace => self.cull_face = enabled,
            Capability::DepthTest => self.depth_test = enabled,
            Capability::ScissorTest => self.scissor_test = enabled,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum BufferUsage {
    Vertex,
    Index,
}

/// Device buffers making up one drawable mesh.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct MeshBinding {
    pub positions: BufferHandle,
    pub normals: Option<BufferHandle>,
    pub tex_coords: Option<BufferHandle>,
    pub indices: BufferHandle,
    pub vertex_count: u32,
    pub index_count: u32,
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub enum UniformValue {
    Float(f32),
    Int(i32),
    Vec2(Vector2<f32>),
    Vec3(Vector3<f32>),
    Vec4(Vector4<f32>),
    Mat3(Matrix3<f32>),
    Mat4(Matrix4<f32>),
}

macro_rules! uniform_from {
    ($ty:ty, $variant:ident) => {
        impl From<$ty> for UniformValue {
            fn from(value: $ty) -> Self {
                UniformValue::$variant(value)
            }
        }
    };
}

uniform_from!(f32, Float);
uniform_from!(i32, Int);
uniform_from!(Vector2<f32>, Vec2);
uniform_from!(Vector3<f32>, Vec3);
uniform_from!(Vector4<f32>, Vec4);
uniform_from!(Matrix3<f32>, Mat3);
uniform_from!(Matrix4<f32>, Mat4);

impl From<bool> for UniformValue {
    fn from(value: bool) -> Self {
        UniformValue::Int(value as i32)
    }
}

/// Named uniform values handed to a draw call.
///
/// Insertion order is kept so devices that upload uniforms one by one do so
/// deterministically. Setting an existing name replaces its value.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ShaderParams {
    values: Vec<(String, UniformValue)>,
}

impl ShaderParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, name: &str, value: impl Into<UniformValue>) -> &mut Self {
        let value = value.into();
        match self.values.iter_mut().find(|(n, _)| n == name) {
            Some((_, slot)) => *slot = value,
            None => self.values.push((name.to_string(), value)),
        }
        self
    }

    pub fn get(&self, name: &str) -> Option<&UniformValue> {
        self.values.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    pub fn float(&self, name: &str) -> Option<f32> {
        match self.get(name)? {
            UniformValue::Float(f) => Some(*f),
            UniformValue::Int(i) => Some(*i as f32),
            _ => None,
        }
    }

    pub fn vec3(&self, name: &str) -> Option<Vector3<f32>> {
        match self.get(name)? {
            UniformValue::Vec3(v) => Some(*v),
            UniformValue::Vec4(v) => Some(v.truncate()),
            _ => None,
        }
    }

    pub fn vec4(&self, name: &str) -> Option<Vector4<f32>> {
        match self.get(name)? {
            UniformValue::Vec4(v) => Some(*v),
            UniformValue::Vec3(v) => Some(v.extend(1.0)),
            _ => None,
        }
    }

    pub fn mat4(&self, name: &str) -> Option<Matrix4<f32>> {
        match self.get(name)? {
            UniformValue::Mat4(m) => Some(*m),
            UniformValue::Mat3(m) => Some((*m).into()),
            _ => None,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &UniformValue)> {
        self.values.iter().map(|(n, v)| (n.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Abstract GPU device consumed by the resource layer.
///
/// Object creation never fails through this interface: backends report
/// allocation problems through logging and framebuffer completeness, which is
/// how the resource layer treats device-state errors (reported, non-fatal).
/// Program builds are the exception since a broken shader is a caller error.
pub trait RenderDevice {
    /// Largest width or height a 2D image may have.
    fn max_texture_dimension(&self) -> u32;

    fn create_image(&mut self, desc: &ImageDesc) -> ImageHandle;
    /// Uploads the whole image (all layers for 3D images).
    fn write_image(&mut self, image: ImageHandle, data: &[u8]);
    /// Uploads one layer of a 3D image.
    fn write_image_layer(&mut self, image: ImageHandle, layer: u32, data: &[u8]);
    fn generate_mipmaps(&mut self, image: ImageHandle);
    fn destroy_image(&mut self, image: ImageHandle);
    fn bind_image(&mut self, slot: u32, image: Option<ImageHandle>);
    fn bound_image(&self, slot: u32) -> Option<ImageHandle>;

    fn create_depth_surface(
        &mut self,
        width: u32,
        height: u32,
        precision: DepthPrecision,
    ) -> ImageHandle;
    fn create_framebuffer(
        &mut self,
        color: ImageHandle,
        depth: Option<ImageHandle>,
    ) -> FramebufferHandle;
    fn framebuffer_status(&self, framebuffer: FramebufferHandle) -> FramebufferStatus;
    fn destroy_framebuffer(&mut self, framebuffer: FramebufferHandle);
    /// Synchronously reads the colour attachment of `framebuffer`.
    ///
    /// The returned bytes are tightly packed rows of `layout` channels of `element`.
    fn read_pixels(
        &mut self,
        framebuffer: FramebufferHandle,
        layout: ChannelLayout,
        element: ElementType,
    ) -> Vec<u8>;

    fn ambient_state(&self) -> AmbientState;
    fn set_ambient_state(&mut self, state: &AmbientState);
    /// Binds `framebuffer` for drawing and reading; `None` is the window.
    fn bind_framebuffer(&mut self, framebuffer: Option<FramebufferHandle>);
    fn set_viewport(&mut self, viewport: Rect);
    fn set_capability(&mut self, capability: Capability, enabled: bool);
    /// Clears the bound draw framebuffer.
    fn clear(&mut self, color: [f32; 4], depth: bool);

    fn create_buffer(&mut self, usage: BufferUsage, data: &[u8]) -> BufferHandle;
    /// Overwrites the contents of `buffer`; `data` has the buffer's size.
    fn write_buffer(&mut self, buffer: BufferHandle, data: &[u8]);
    fn destroy_buffer(&mut self, buffer: BufferHandle);

    fn create_program(&mut self, label: &str, vertex: &str, fragment: &str)
    -> anyhow::Result<ProgramHandle>;
    fn destroy_program(&mut self, program: ProgramHandle);
    fn draw_indexed(&mut self, program: ProgramHandle, mesh: &MeshBinding, params: &ShaderParams);
}

impl fmt::Display for ElementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ElementType::U8 => "u8",
            ElementType::U16 => "u16",
            ElementType::U32 => "u32",
            ElementType::F32 => "f32",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn srgb_only_applies_to_8bit_colour() {
        let f = PixelFormat::derive(ElementType::U8, 4, ColorSpace::Srgb);
        assert_eq!(f.internal, InternalFormat::Srgb8Alpha8);
        let f = PixelFormat::derive(ElementType::U8, 3, ColorSpace::Srgb);
        assert_eq!(f.internal, InternalFormat::Srgb8);
        let f = PixelFormat::derive(ElementType::U8, 1, ColorSpace::Srgb);
        assert_eq!(f.internal, InternalFormat::R8);
        let f = PixelFormat::derive(ElementType::F32, 4, ColorSpace::Srgb);
        assert_eq!(f.internal, InternalFormat::Rgba32F);
    }

    #[test]
    fn odd_channel_counts_fall_back_to_rgb() {
        let f = PixelFormat::derive(ElementType::U16, 7, ColorSpace::Linear);
        assert_eq!(f.internal, InternalFormat::Rgb16Ui);
        assert_eq!(f.layout, ChannelLayout::Rgb);
        assert_eq!(f.bytes_per_pixel(), 6);
    }

    #[test]
    fn readback_layout_collapses_two_channels_to_rgba() {
        assert_eq!(ChannelLayout::for_readback(1), ChannelLayout::Red);
        assert_eq!(ChannelLayout::for_readback(2), ChannelLayout::Rgba);
        assert_eq!(ChannelLayout::for_readback(3), ChannelLayout::Rgb);
        assert_eq!(ChannelLayout::for_readback(4), ChannelLayout::Rgba);
    }

    #[test]
    fn shader_params_replace_by_name() {
        let mut params = ShaderParams::new();
        params.set("roughness", 0.2f32).set("roughness", 0.7f32);
        assert_eq!(params.len(), 1);
        assert_eq!(params.float("roughness"), Some(0.7));
        params.set("diffuse_enabled", true);
        assert_eq!(params.float("diffuse_enabled"), Some(1.0));
    }
}
