//! [`RenderDevice`] backed by wgpu.
//!
//! Every call that touches the GPU records and submits its own command
//! encoder, so the ordering the caller sees is the ordering of its calls.
//! Window frames are bracketed by [`WgpuDevice::begin_frame`] and
//! [`WgpuDevice::end_frame`]; the default framebuffer is only drawable in
//! between.

use std::{borrow::Cow, collections::HashMap, iter};

use anyhow::bail;
use wgpu::util::DeviceExt;

use super::{
    AmbientState, BufferHandle, BufferUsage, Capability, ChannelLayout, DepthPrecision,
    ElementType, Filter, FramebufferHandle, FramebufferStatus, ImageDesc, ImageDimension,
    ImageHandle, InternalFormat, MeshBinding, PixelFormat, ProgramHandle, Rect, RenderDevice,
    SamplerParams, ShaderParams, Wrap, mipmap,
};
use crate::pipelines::basic::{self, DepthMode, DrawUniforms};

const WINDOW_DEPTH_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth24Plus;

struct GpuImage {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    sampler: Option<wgpu::Sampler>,
    format: wgpu::TextureFormat,
    width: u32,
    height: u32,
    depth: u32,
    /// Layout of the host data; `None` for depth surfaces.
    host: Option<PixelFormat>,
    mip_levels: u32,
    /// Level 0 as last uploaded, held until the chain is generated.
    base_level: Option<Vec<u8>>,
}

impl GpuImage {
    fn sampleable(&self) -> bool {
        self.sampler.is_some()
            && self.texture.dimension() == wgpu::TextureDimension::D2
            && self.host.is_some_and(|host| host.element == ElementType::U8)
    }
}

struct GpuFramebuffer {
    color: ImageHandle,
    depth: Option<ImageHandle>,
}

struct GpuProgram {
    vertex: wgpu::ShaderModule,
    fragment: wgpu::ShaderModule,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
struct PipelineKey {
    program: ProgramHandle,
    color_format: wgpu::TextureFormat,
    depth: Option<DepthMode>,
    cull: bool,
}

struct WindowTarget {
    view: wgpu::TextureView,
    format: wgpu::TextureFormat,
    width: u32,
    height: u32,
}

/// Formats and size of whatever the draw framebuffer currently resolves to.
#[derive(Copy, Clone)]
struct TargetInfo {
    color_format: wgpu::TextureFormat,
    depth_format: Option<wgpu::TextureFormat>,
    width: u32,
    height: u32,
}

pub struct WgpuDevice {
    device: wgpu::Device,
    queue: wgpu::Queue,
    next_id: u64,
    images: HashMap<ImageHandle, GpuImage>,
    framebuffers: HashMap<FramebufferHandle, GpuFramebuffer>,
    buffers: HashMap<BufferHandle, wgpu::Buffer>,
    programs: HashMap<ProgramHandle, GpuProgram>,
    pipelines: HashMap<PipelineKey, wgpu::RenderPipeline>,
    bindings: HashMap<u32, ImageHandle>,
    state: AmbientState,
    uniform_layout: wgpu::BindGroupLayout,
    texture_layout: wgpu::BindGroupLayout,
    pipeline_layout: wgpu::PipelineLayout,
    fallback_view: wgpu::TextureView,
    fallback_sampler: wgpu::Sampler,
    zero_buffer: wgpu::Buffer,
    window: Option<WindowTarget>,
    window_depth: Option<(u32, u32, wgpu::TextureView)>,
}

impl WgpuDevice {
    pub fn new(device: wgpu::Device, queue: wgpu::Queue) -> Self {
        let uniform_layout = basic::uniform_layout(&device);
        let texture_layout = basic::texture_layout(&device);
        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Render Pipeline Layout"),
            bind_group_layouts: &[Some(&uniform_layout), Some(&texture_layout)],
            immediate_size: 0,
        });

        // Bound in place of images the shader cannot sample.
        let fallback = device.create_texture_with_data(
            &queue,
            &wgpu::TextureDescriptor {
                label: Some("fallback_white"),
                size: wgpu::Extent3d {
                    width: 1,
                    height: 1,
                    depth_or_array_layers: 1,
                },
                mip_level_count: 1,
                sample_count: 1,
                dimension: wgpu::TextureDimension::D2,
                format: wgpu::TextureFormat::Rgba8Unorm,
                usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
                view_formats: &[],
            },
            wgpu::util::TextureDataOrder::LayerMajor,
            &[255, 255, 255, 255],
        );
        let fallback_view = fallback.create_view(&wgpu::TextureViewDescriptor::default());
        let fallback_sampler = device.create_sampler(&wgpu::SamplerDescriptor::default());
        let zero_buffer = zero_buffer(&device, 0);

        Self {
            device,
            queue,
            next_id: 1,
            images: HashMap::new(),
            framebuffers: HashMap::new(),
            buffers: HashMap::new(),
            programs: HashMap::new(),
            pipelines: HashMap::new(),
            bindings: HashMap::new(),
            state: AmbientState::default(),
            uniform_layout,
            texture_layout,
            pipeline_layout,
            fallback_view,
            fallback_sampler,
            zero_buffer,
            window: None,
            window_depth: None,
        }
    }

    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }

    /// Makes `view` the default framebuffer until [`Self::end_frame`].
    pub fn begin_frame(
        &mut self,
        view: wgpu::TextureView,
        format: wgpu::TextureFormat,
        width: u32,
        height: u32,
    ) {
        let stale = match &self.window_depth {
            Some((w, h, _)) => *w != width || *h != height,
            None => true,
        };
        if stale {
            let texture = self.device.create_texture(&wgpu::TextureDescriptor {
                label: Some("window_depth"),
                size: wgpu::Extent3d {
                    width: width.max(1),
                    height: height.max(1),
                    depth_or_array_layers: 1,
                },
                mip_level_count: 1,
                sample_count: 1,
                dimension: wgpu::TextureDimension::D2,
                format: WINDOW_DEPTH_FORMAT,
                usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
                view_formats: &[],
            });
            let depth_view = texture.create_view(&wgpu::TextureViewDescriptor::default());
            self.window_depth = Some((width, height, depth_view));
        }
        self.window = Some(WindowTarget {
            view,
            format,
            width,
            height,
        });
    }

    pub fn end_frame(&mut self) {
        self.window = None;
    }

    fn next_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn target_info(&self) -> Option<TargetInfo> {
        match self.state.draw_framebuffer {
            Some(fb) => {
                let fb = self.framebuffers.get(&fb)?;
                let color = self.images.get(&fb.color)?;
                Some(TargetInfo {
                    color_format: color.format,
                    depth_format: fb
                        .depth
                        .and_then(|d| self.images.get(&d))
                        .map(|d| d.format),
                    width: color.width,
                    height: color.height,
                })
            }
            None => {
                let window = self.window.as_ref()?;
                Some(TargetInfo {
                    color_format: window.format,
                    depth_format: self.window_depth.as_ref().map(|_| WINDOW_DEPTH_FORMAT),
                    width: window.width,
                    height: window.height,
                })
            }
        }
    }

    fn target_views(&self) -> Option<(&wgpu::TextureView, Option<&wgpu::TextureView>)> {
        match self.state.draw_framebuffer {
            Some(fb) => {
                let fb = self.framebuffers.get(&fb)?;
                let color = &self.images.get(&fb.color)?.view;
                let depth = fb.depth.and_then(|d| self.images.get(&d)).map(|d| &d.view);
                Some((color, depth))
            }
            None => {
                let window = self.window.as_ref()?;
                let depth = self.window_depth.as_ref().map(|(_, _, view)| view);
                Some((&window.view, depth))
            }
        }
    }

    fn ensure_pipeline(&mut self, key: PipelineKey) -> bool {
        if self.pipelines.contains_key(&key) {
            return true;
        }
        let Some(program) = self.programs.get(&key.program) else {
            return false;
        };
        let blend = (!is_float(key.color_format)).then_some(wgpu::BlendState::REPLACE);
        let pipeline = basic::mk_render_pipeline(
            &self.device,
            &self.pipeline_layout,
            &program.vertex,
            &program.fragment,
            key.color_format,
            blend,
            key.depth,
            key.cull.then_some(wgpu::Face::Back),
        );
        self.pipelines.insert(key, pipeline);
        true
    }

    /// Grows the shared zero buffer so it covers `vertex_count` vec3 attributes.
    fn ensure_zero_buffer(&mut self, vertex_count: u32) {
        let needed = vertex_count as u64 * std::mem::size_of::<[f32; 3]>() as u64;
        if self.zero_buffer.size() < needed {
            self.zero_buffer = zero_buffer(&self.device, needed);
        }
    }

    /// Viewport in wgpu's top-left convention, clipped to the target.
    fn pass_viewport(&self, width: u32, height: u32) -> Rect {
        let v = self.state.viewport;
        if v.width == 0 || v.height == 0 {
            return Rect::new(0, 0, width, height);
        }
        flip_and_clip(v, width, height)
    }

    fn read_texture(&self, image: &GpuImage) -> Vec<u8> {
        let texel = image.format.block_copy_size(None).unwrap_or(4);
        let unpadded = image.width * texel;
        let align = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
        let padded = unpadded.div_ceil(align) * align;

        let output_buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("readback"),
            size: padded as wgpu::BufferAddress * image.height as wgpu::BufferAddress,
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Readback Encoder"),
            });
        encoder.copy_texture_to_buffer(
            wgpu::TexelCopyTextureInfo {
                aspect: wgpu::TextureAspect::All,
                texture: &image.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
            },
            wgpu::TexelCopyBufferInfo {
                buffer: &output_buffer,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(padded),
                    rows_per_image: Some(image.height),
                },
            },
            wgpu::Extent3d {
                width: image.width,
                height: image.height,
                depth_or_array_layers: 1,
            },
        );
        self.queue.submit(iter::once(encoder.finish()));

        let buffer_slice = output_buffer.slice(..);
        // The mapping must be requested before polling, or the wait never ends.
        let (tx, rx) = futures_intrusive::channel::shared::oneshot_channel();
        buffer_slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        if let Err(e) = self.device.poll(wgpu::PollType::Wait {
            submission_index: None,
            timeout: None,
        }) {
            log::error!("Device poll failed during readback: {}", e);
            return Vec::new();
        }
        match futures::executor::block_on(rx.receive()) {
            Some(Ok(())) => {}
            Some(Err(e)) => {
                log::error!("Could not map readback buffer: {}", e);
                return Vec::new();
            }
            None => {
                log::error!("Readback mapping was dropped");
                return Vec::new();
            }
        }

        let mut pixels = Vec::with_capacity((unpadded * image.height) as usize);
        {
            let data = buffer_slice.get_mapped_range();
            for row in data.chunks(padded as usize) {
                pixels.extend_from_slice(&row[..unpadded as usize]);
            }
        }
        output_buffer.unmap();
        pixels
    }
}

fn zero_buffer(device: &wgpu::Device, size: u64) -> wgpu::Buffer {
    device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("zero_attributes"),
        size: size.max(16),
        usage: wgpu::BufferUsages::VERTEX,
        mapped_at_creation: false,
    })
}

fn flip_and_clip(rect: Rect, width: u32, height: u32) -> Rect {
    let x0 = rect.x.clamp(0, width as i32);
    let x1 = (rect.x + rect.width as i32).clamp(0, width as i32);
    // bottom-left origin to top-left
    let top = height as i32 - (rect.y + rect.height as i32);
    let y0 = top.clamp(0, height as i32);
    let y1 = (top + rect.height as i32).clamp(0, height as i32);
    Rect::new(x0, y0, (x1 - x0) as u32, (y1 - y0) as u32)
}

fn texture_format(format: PixelFormat) -> wgpu::TextureFormat {
    use InternalFormat::*;
    use wgpu::TextureFormat as T;
    match format.internal {
        R8 => T::R8Unorm,
        Rg8 => T::Rg8Unorm,
        Rgb8 | Rgba8 => T::Rgba8Unorm,
        Srgb8 | Srgb8Alpha8 => T::Rgba8UnormSrgb,
        R16Ui => T::R16Uint,
        Rg16Ui => T::Rg16Uint,
        Rgb16Ui | Rgba16Ui => T::Rgba16Uint,
        R32Ui => T::R32Uint,
        Rg32Ui => T::Rg32Uint,
        Rgb32Ui | Rgba32Ui => T::Rgba32Uint,
        R32F => T::R32Float,
        Rg32F => T::Rg32Float,
        Rgb32F | Rgba32F => T::Rgba32Float,
    }
}

/// Channels stored on the device. wgpu has no three-channel formats.
fn device_channels(format: PixelFormat) -> u32 {
    match format.layout {
        ChannelLayout::Rgb => 4,
        other => other.channels(),
    }
}

fn is_integer(format: wgpu::TextureFormat) -> bool {
    use wgpu::TextureFormat as T;
    matches!(
        format,
        T::R16Uint | T::Rg16Uint | T::Rgba16Uint | T::R32Uint | T::Rg32Uint | T::Rgba32Uint
    )
}

fn is_float(format: wgpu::TextureFormat) -> bool {
    use wgpu::TextureFormat as T;
    matches!(format, T::R32Float | T::Rg32Float | T::Rgba32Float)
}

fn opaque(element: ElementType) -> f64 {
    match element {
        ElementType::U8 => u8::MAX as f64,
        ElementType::U16 => u16::MAX as f64,
        ElementType::U32 => u32::MAX as f64,
        ElementType::F32 => 1.0,
    }
}

/// Widens tightly packed RGB texels to RGBA with an opaque alpha.
fn pad_to_rgba(data: &[u8], element: ElementType) -> Vec<u8> {
    let es = element.size();
    let mut alpha = vec![0u8; es];
    mipmap::write_component(&mut alpha, element, opaque(element));
    let mut out = Vec::with_capacity(data.len() / 3 * 4);
    for texel in data.chunks_exact(3 * es) {
        out.extend_from_slice(texel);
        out.extend_from_slice(&alpha);
    }
    out
}

/// Repacks texels between channel counts and element types.
///
/// U8 converts to and from F32 as normalized values. Missing channels read as
/// zero.
fn convert_texels(
    data: &[u8],
    src_channels: u32,
    src_element: ElementType,
    dst_channels: u32,
    dst_element: ElementType,
) -> Vec<u8> {
    let (sc, dc) = (src_channels as usize, dst_channels as usize);
    let (ss, ds) = (src_element.size(), dst_element.size());
    let scale = match (src_element, dst_element) {
        (ElementType::U8, ElementType::F32) => 1.0 / 255.0,
        (ElementType::F32, ElementType::U8) => 255.0,
        _ => 1.0,
    };
    let texels = data.len() / (sc * ss);
    let mut out = vec![0u8; texels * dc * ds];
    for t in 0..texels {
        for c in 0..dc.min(sc) {
            let i = (t * sc + c) * ss;
            let value = mipmap::read_component(&data[i..i + ss], src_element) * scale;
            let o = (t * dc + c) * ds;
            mipmap::write_component(&mut out[o..o + ds], dst_element, value);
        }
    }
    out
}

fn address_mode(wrap: Wrap) -> wgpu::AddressMode {
    match wrap {
        Wrap::Repeat => wgpu::AddressMode::Repeat,
        Wrap::ClampToEdge => wgpu::AddressMode::ClampToEdge,
        Wrap::MirroredRepeat => wgpu::AddressMode::MirrorRepeat,
    }
}

fn sampler_descriptor(params: &SamplerParams) -> wgpu::SamplerDescriptor<'static> {
    wgpu::SamplerDescriptor {
        label: Some("image_sampler"),
        address_mode_u: address_mode(params.wrap_s),
        address_mode_v: address_mode(params.wrap_t),
        address_mode_w: address_mode(params.wrap_r),
        mag_filter: wgpu::FilterMode::Linear,
        min_filter: match params.min_filter {
            Filter::Nearest => wgpu::FilterMode::Nearest,
            Filter::Linear | Filter::LinearMipmapLinear => wgpu::FilterMode::Linear,
        },
        mipmap_filter: if params.uses_mipmaps() {
            wgpu::MipmapFilterMode::Linear
        } else {
            wgpu::MipmapFilterMode::Nearest
        },
        ..Default::default()
    }
}

impl RenderDevice for WgpuDevice {
    fn max_texture_dimension(&self) -> u32 {
        self.device.limits().max_texture_dimension_2d
    }

    fn create_image(&mut self, desc: &ImageDesc) -> ImageHandle {
        let format = texture_format(desc.format);
        let d3 = desc.dimension == ImageDimension::D3;
        let mip_levels = if desc.sampler.uses_mipmaps() && !d3 && !desc.render_target {
            mipmap::level_count(desc.width, desc.height)
        } else {
            1
        };
        let mut usage = wgpu::TextureUsages::TEXTURE_BINDING
            | wgpu::TextureUsages::COPY_DST
            | wgpu::TextureUsages::COPY_SRC;
        if desc.render_target {
            usage |= wgpu::TextureUsages::RENDER_ATTACHMENT;
        }
        let texture = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some("image"),
            size: wgpu::Extent3d {
                width: desc.width.max(1),
                height: desc.height.max(1),
                depth_or_array_layers: if d3 { desc.depth.max(1) } else { 1 },
            },
            mip_level_count: mip_levels,
            sample_count: 1,
            dimension: if d3 {
                wgpu::TextureDimension::D3
            } else {
                wgpu::TextureDimension::D2
            },
            format,
            usage,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        let sampler = self.device.create_sampler(&sampler_descriptor(&desc.sampler));

        let handle = ImageHandle::new(self.next_id());
        self.images.insert(
            handle,
            GpuImage {
                texture,
                view,
                sampler: Some(sampler),
                format,
                width: desc.width.max(1),
                height: desc.height.max(1),
                depth: if d3 { desc.depth.max(1) } else { 1 },
                host: Some(desc.format),
                mip_levels,
                base_level: None,
            },
        );
        handle
    }

    fn write_image(&mut self, image: ImageHandle, data: &[u8]) {
        let Some(gpu) = self.images.get_mut(&image) else {
            log::warn!("write to unknown image {:?}", image);
            return;
        };
        let Some(host) = gpu.host else {
            log::warn!("write to depth surface {:?}", image);
            return;
        };
        let expected = gpu.width as usize * gpu.height as usize * gpu.depth as usize
            * host.bytes_per_pixel();
        if data.len() < expected {
            log::warn!(
                "image {:?} needs {} bytes, got {}",
                image,
                expected,
                data.len()
            );
            return;
        }
        let data = match host.layout {
            ChannelLayout::Rgb => Cow::Owned(pad_to_rgba(&data[..expected], host.element)),
            _ => Cow::Borrowed(&data[..expected]),
        };
        let row = gpu.width * device_channels(host) * host.element.size() as u32;
        self.queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                aspect: wgpu::TextureAspect::All,
                texture: &gpu.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
            },
            &data,
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(row),
                rows_per_image: Some(gpu.height),
            },
            wgpu::Extent3d {
                width: gpu.width,
                height: gpu.height,
                depth_or_array_layers: gpu.depth,
            },
        );
        if gpu.mip_levels > 1 {
            gpu.base_level = Some(data.into_owned());
        }
    }

    fn write_image_layer(&mut self, image: ImageHandle, layer: u32, data: &[u8]) {
        let Some(gpu) = self.images.get(&image) else {
            log::warn!("write to unknown image {:?}", image);
            return;
        };
        let Some(host) = gpu.host else {
            return;
        };
        if gpu.texture.dimension() != wgpu::TextureDimension::D3 || layer >= gpu.depth {
            log::warn!("layer {} out of range for {:?}", layer, image);
            return;
        }
        let expected = gpu.width as usize * gpu.height as usize * host.bytes_per_pixel();
        if data.len() < expected {
            log::warn!("layer {} of {:?} is short: {} bytes", layer, image, data.len());
            return;
        }
        let data = match host.layout {
            ChannelLayout::Rgb => Cow::Owned(pad_to_rgba(&data[..expected], host.element)),
            _ => Cow::Borrowed(&data[..expected]),
        };
        self.queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                aspect: wgpu::TextureAspect::All,
                texture: &gpu.texture,
                mip_level: 0,
                origin: wgpu::Origin3d {
                    x: 0,
                    y: 0,
                    z: layer,
                },
            },
            &data,
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(gpu.width * device_channels(host) * host.element.size() as u32),
                rows_per_image: Some(gpu.height),
            },
            wgpu::Extent3d {
                width: gpu.width,
                height: gpu.height,
                depth_or_array_layers: 1,
            },
        );
    }

    fn generate_mipmaps(&mut self, image: ImageHandle) {
        let Some(gpu) = self.images.get_mut(&image) else {
            return;
        };
        let (Some(host), Some(mut level)) = (gpu.host, gpu.base_level.take()) else {
            return;
        };
        let channels = device_channels(host);
        let (mut width, mut height) = (gpu.width, gpu.height);
        for mip_level in 1..gpu.mip_levels {
            let (nw, nh, data) = mipmap::downsample(&level, width, height, channels, host.element);
            self.queue.write_texture(
                wgpu::TexelCopyTextureInfo {
                    aspect: wgpu::TextureAspect::All,
                    texture: &gpu.texture,
                    mip_level,
                    origin: wgpu::Origin3d::ZERO,
                },
                &data,
                wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(nw * channels * host.element.size() as u32),
                    rows_per_image: Some(nh),
                },
                wgpu::Extent3d {
                    width: nw,
                    height: nh,
                    depth_or_array_layers: 1,
                },
            );
            (width, height, level) = (nw, nh, data);
        }
    }

    fn destroy_image(&mut self, image: ImageHandle) {
        if let Some(gpu) = self.images.remove(&image) {
            gpu.texture.destroy();
        }
        self.bindings.retain(|_, bound| *bound != image);
    }

    fn bind_image(&mut self, slot: u32, image: Option<ImageHandle>) {
        match image {
            Some(image) => self.bindings.insert(slot, image),
            None => self.bindings.remove(&slot),
        };
    }

    fn bound_image(&self, slot: u32) -> Option<ImageHandle> {
        self.bindings.get(&slot).copied()
    }

    fn create_depth_surface(
        &mut self,
        width: u32,
        height: u32,
        precision: DepthPrecision,
    ) -> ImageHandle {
        let format = match precision {
            DepthPrecision::Default => wgpu::TextureFormat::Depth24Plus,
            DepthPrecision::Float32 => wgpu::TextureFormat::Depth32Float,
        };
        let texture = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some("depth_surface"),
            size: wgpu::Extent3d {
                width: width.max(1),
                height: height.max(1),
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::TEXTURE_BINDING,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        let handle = ImageHandle::new(self.next_id());
        self.images.insert(
            handle,
            GpuImage {
                texture,
                view,
                sampler: None,
                format,
                width: width.max(1),
                height: height.max(1),
                depth: 1,
                host: None,
                mip_levels: 1,
                base_level: None,
            },
        );
        handle
    }

    fn create_framebuffer(
        &mut self,
        color: ImageHandle,
        depth: Option<ImageHandle>,
    ) -> FramebufferHandle {
        let handle = FramebufferHandle::new(self.next_id());
        self.framebuffers
            .insert(handle, GpuFramebuffer { color, depth });
        handle
    }

    fn framebuffer_status(&self, framebuffer: FramebufferHandle) -> FramebufferStatus {
        let Some(fb) = self.framebuffers.get(&framebuffer) else {
            return FramebufferStatus::Incomplete("unknown framebuffer");
        };
        let Some(color) = self.images.get(&fb.color) else {
            return FramebufferStatus::Incomplete("missing colour attachment");
        };
        if !color
            .texture
            .usage()
            .contains(wgpu::TextureUsages::RENDER_ATTACHMENT)
            || color.texture.dimension() != wgpu::TextureDimension::D2
        {
            return FramebufferStatus::Incomplete("colour attachment is not renderable");
        }
        if let Some(depth) = fb.depth {
            match self.images.get(&depth) {
                Some(d) if d.host.is_none() && d.width == color.width && d.height == color.height => {}
                _ => return FramebufferStatus::Incomplete("depth attachment size mismatch"),
            }
        }
        FramebufferStatus::Complete
    }

    fn destroy_framebuffer(&mut self, framebuffer: FramebufferHandle) {
        self.framebuffers.remove(&framebuffer);
        if self.state.draw_framebuffer == Some(framebuffer) {
            self.state.draw_framebuffer = None;
        }
        if self.state.read_framebuffer == Some(framebuffer) {
            self.state.read_framebuffer = None;
        }
    }

    fn read_pixels(
        &mut self,
        framebuffer: FramebufferHandle,
        layout: ChannelLayout,
        element: ElementType,
    ) -> Vec<u8> {
        let Some(image) = self
            .framebuffers
            .get(&framebuffer)
            .and_then(|fb| self.images.get(&fb.color))
        else {
            log::warn!("read from unknown framebuffer {:?}", framebuffer);
            return Vec::new();
        };
        let Some(host) = image.host else {
            return Vec::new();
        };
        let raw = self.read_texture(image);
        if raw.is_empty() {
            return raw;
        }
        convert_texels(
            &raw,
            device_channels(host),
            host.element,
            layout.channels(),
            element,
        )
    }

    fn ambient_state(&self) -> AmbientState {
        self.state
    }

    fn set_ambient_state(&mut self, state: &AmbientState) {
        self.state = *state;
    }

    fn bind_framebuffer(&mut self, framebuffer: Option<FramebufferHandle>) {
        self.state.draw_framebuffer = framebuffer;
        self.state.read_framebuffer = framebuffer;
    }

    fn set_viewport(&mut self, viewport: Rect) {
        self.state.viewport = viewport;
    }

    fn set_capability(&mut self, capability: Capability, enabled: bool) {
        self.state.set_capability(capability, enabled);
    }

    fn clear(&mut self, color: [f32; 4], depth: bool) {
        let Some((color_view, depth_view)) = self.target_views() else {
            log::warn!("clear without a drawable framebuffer");
            return;
        };
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Clear Encoder"),
            });
        {
            let _pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("Clear Pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: color_view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color {
                            r: color[0] as f64,
                            g: color[1] as f64,
                            b: color[2] as f64,
                            a: color[3] as f64,
                        }),
                        store: wgpu::StoreOp::Store,
                    },
                    depth_slice: None,
                })],
                depth_stencil_attachment: depth_view.filter(|_| depth).map(|view| {
                    wgpu::RenderPassDepthStencilAttachment {
                        view,
                        depth_ops: Some(wgpu::Operations {
                            load: wgpu::LoadOp::Clear(1.0),
                            store: wgpu::StoreOp::Store,
                        }),
                        stencil_ops: None,
                    }
                }),
                ..Default::default()
            });
        }
        self.queue.submit(iter::once(encoder.finish()));
    }

    fn create_buffer(&mut self, usage: BufferUsage, data: &[u8]) -> BufferHandle {
        let usage = match usage {
            BufferUsage::Vertex => wgpu::BufferUsages::VERTEX,
            BufferUsage::Index => wgpu::BufferUsages::INDEX,
        } | wgpu::BufferUsages::COPY_DST;
        let buffer = self
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("mesh_buffer"),
                contents: data,
                usage,
            });
        let handle = BufferHandle::new(self.next_id());
        self.buffers.insert(handle, buffer);
        handle
    }

    fn write_buffer(&mut self, buffer: BufferHandle, data: &[u8]) {
        match self.buffers.get(&buffer) {
            Some(stored) if data.len() as u64 <= stored.size() => {
                self.queue.write_buffer(stored, 0, data);
            }
            Some(_) => log::warn!("write of {} bytes overflows buffer {:?}", data.len(), buffer),
            None => log::warn!("write to unknown buffer {:?}", buffer),
        }
    }

    fn destroy_buffer(&mut self, buffer: BufferHandle) {
        if let Some(stored) = self.buffers.remove(&buffer) {
            stored.destroy();
        }
    }

    fn create_program(
        &mut self,
        label: &str,
        vertex: &str,
        fragment: &str,
    ) -> anyhow::Result<ProgramHandle> {
        if vertex.trim().is_empty() || fragment.trim().is_empty() {
            bail!("program {label} has an empty shader stage");
        }
        let vertex_module = self
            .device
            .create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some(label),
                source: wgpu::ShaderSource::Wgsl(vertex.into()),
            });
        let fragment_module = if fragment == vertex {
            vertex_module.clone()
        } else {
            self.device
                .create_shader_module(wgpu::ShaderModuleDescriptor {
                    label: Some(label),
                    source: wgpu::ShaderSource::Wgsl(fragment.into()),
                })
        };
        let handle = ProgramHandle::new(self.next_id());
        self.programs.insert(
            handle,
            GpuProgram {
                vertex: vertex_module,
                fragment: fragment_module,
            },
        );
        Ok(handle)
    }

    fn destroy_program(&mut self, program: ProgramHandle) {
        self.programs.remove(&program);
        self.pipelines.retain(|key, _| key.program != program);
    }

    fn draw_indexed(&mut self, program: ProgramHandle, mesh: &MeshBinding, params: &ShaderParams) {
        let Some(target) = self.target_info() else {
            log::warn!("draw without a drawable framebuffer");
            return;
        };
        if is_integer(target.color_format) {
            log::warn!("skipping draw into integer target {:?}", target.color_format);
            return;
        }
        let key = PipelineKey {
            program,
            color_format: target.color_format,
            depth: target.depth_format.map(|format| DepthMode {
                format,
                test: self.state.depth_test,
            }),
            cull: self.state.cull_face,
        };
        if !self.ensure_pipeline(key) {
            log::warn!("draw with unknown program {:?}", program);
            return;
        }
        self.ensure_zero_buffer(mesh.vertex_count);

        let (Some(positions), Some(indices)) = (
            self.buffers.get(&mesh.positions),
            self.buffers.get(&mesh.indices),
        ) else {
            log::warn!("draw with released mesh buffers");
            return;
        };
        let normals = mesh
            .normals
            .and_then(|b| self.buffers.get(&b))
            .unwrap_or(&self.zero_buffer);
        let tex_coords = mesh
            .tex_coords
            .and_then(|b| self.buffers.get(&b))
            .unwrap_or(&self.zero_buffer);

        let uniform_buffer = self
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("draw_uniforms"),
                contents: bytemuck::cast_slice(&[DrawUniforms::from_params(params)]),
                usage: wgpu::BufferUsages::UNIFORM,
            });
        let uniform_bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            layout: &self.uniform_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: uniform_buffer.as_entire_binding(),
            }],
            label: Some("draw_uniform_bind_group"),
        });
        let (texture_view, sampler) = match self
            .bindings
            .get(&0)
            .and_then(|image| self.images.get(image))
            .filter(|image| image.sampleable())
        {
            Some(image) => (&image.view, image.sampler.as_ref().unwrap_or(&self.fallback_sampler)),
            None => (&self.fallback_view, &self.fallback_sampler),
        };
        let texture_bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            layout: &self.texture_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(texture_view),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::Sampler(sampler),
                },
            ],
            label: Some("diffuse_bind_group"),
        });

        let Some((color_view, depth_view)) = self.target_views() else {
            return;
        };
        let Some(pipeline) = self.pipelines.get(&key) else {
            return;
        };
        let viewport = self.pass_viewport(target.width, target.height);
        if viewport.width == 0 || viewport.height == 0 {
            return;
        }
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Draw Encoder"),
            });
        {
            let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("Draw Pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: color_view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Load,
                        store: wgpu::StoreOp::Store,
                    },
                    depth_slice: None,
                })],
                depth_stencil_attachment: depth_view.map(|view| {
                    wgpu::RenderPassDepthStencilAttachment {
                        view,
                        depth_ops: Some(wgpu::Operations {
                            load: wgpu::LoadOp::Load,
                            store: wgpu::StoreOp::Store,
                        }),
                        stencil_ops: None,
                    }
                }),
                ..Default::default()
            });
            render_pass.set_viewport(
                viewport.x as f32,
                viewport.y as f32,
                viewport.width as f32,
                viewport.height as f32,
                0.0,
                1.0,
            );
            if self.state.scissor_test {
                let scissor = flip_and_clip(self.state.scissor, target.width, target.height);
                render_pass.set_scissor_rect(
                    scissor.x as u32,
                    scissor.y as u32,
                    scissor.width,
                    scissor.height,
                );
            }
            render_pass.set_pipeline(pipeline);
            render_pass.set_bind_group(0, &uniform_bind_group, &[]);
            render_pass.set_bind_group(1, &texture_bind_group, &[]);
            render_pass.set_vertex_buffer(0, positions.slice(..));
            render_pass.set_vertex_buffer(1, normals.slice(..));
            render_pass.set_vertex_buffer(2, tex_coords.slice(..));
            render_pass.set_index_buffer(indices.slice(..), wgpu::IndexFormat::Uint32);
            render_pass.draw_indexed(0..mesh.index_count, 0, 0..1);
        }
        self.queue.submit(iter::once(encoder.finish()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::ColorSpace;

    #[test]
    fn rgb_data_gains_opaque_alpha() {
        let padded = pad_to_rgba(&[1, 2, 3, 4, 5, 6], ElementType::U8);
        assert_eq!(padded, vec![1, 2, 3, 255, 4, 5, 6, 255]);
    }

    #[test]
    fn readback_normalizes_between_u8_and_f32() {
        let floats = convert_texels(&[255, 0, 51, 255], 4, ElementType::U8, 3, ElementType::F32);
        let floats: Vec<f32> = bytemuck::pod_collect_to_vec(&floats);
        assert_eq!(floats, vec![1.0, 0.0, 0.2]);

        let bytes: Vec<u8> = bytemuck::cast_slice(&[0.5f32, 1.0]).to_vec();
        let back = convert_texels(&bytes, 2, ElementType::F32, 4, ElementType::U8);
        assert_eq!(back, vec![128, 255, 0, 0]);
    }

    #[test]
    fn viewport_flips_to_top_left_origin() {
        let rect = flip_and_clip(Rect::new(0, 0, 100, 50), 100, 200);
        assert_eq!(rect, Rect::new(0, 150, 100, 50));
        let clipped = flip_and_clip(Rect::new(-10, 190, 50, 50), 100, 200);
        assert_eq!(clipped, Rect::new(0, 0, 40, 10));
    }

    #[test]
    fn three_channel_formats_are_widened() {
        let rgb = PixelFormat::derive(ElementType::F32, 3, ColorSpace::Linear);
        assert_eq!(texture_format(rgb), wgpu::TextureFormat::Rgba32Float);
        assert_eq!(device_channels(rgb), 4);
        let srgb = PixelFormat::derive(ElementType::U8, 3, ColorSpace::Srgb);
        assert_eq!(texture_format(srgb), wgpu::TextureFormat::Rgba8UnormSrgb);
    }
}
