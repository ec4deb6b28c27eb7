//! A [`RenderDevice`] that lives entirely in host memory.
//!
//! Images, buffers and framebuffers are plain byte vectors and draws are only
//! recorded. Every call that would allocate or transfer data on a real device
//! bumps a counter in [`DeviceStats`], so callers can check that the resource
//! layer reuses device objects instead of reallocating them.

use std::collections::HashMap;

use anyhow::bail;

use super::{
    AmbientState, BufferHandle, BufferUsage, Capability, ChannelLayout, DepthPrecision,
    ElementType, FramebufferHandle, FramebufferStatus, ImageDesc, ImageDimension, ImageHandle,
    MeshBinding, ProgramHandle, Rect, RenderDevice, ShaderParams,
};

/// Running totals of device calls.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct DeviceStats {
    pub images_created: usize,
    pub images_destroyed: usize,
    pub depth_surfaces_created: usize,
    pub image_uploads: usize,
    pub layer_uploads: usize,
    pub mipmap_generations: usize,
    pub framebuffers_created: usize,
    pub framebuffers_destroyed: usize,
    pub buffers_created: usize,
    pub buffer_writes: usize,
    pub buffers_destroyed: usize,
    pub programs_created: usize,
    pub programs_destroyed: usize,
    pub draws: usize,
    pub clears: usize,
    pub readbacks: usize,
}

impl DeviceStats {
    /// Objects currently alive on the device.
    pub fn live_images(&self) -> usize {
        self.images_created + self.depth_surfaces_created - self.images_destroyed
    }

    pub fn live_buffers(&self) -> usize {
        self.buffers_created - self.buffers_destroyed
    }
}

#[derive(Debug)]
struct HostImage {
    desc: Option<ImageDesc>,
    width: u32,
    height: u32,
    data: Vec<u8>,
}

#[derive(Debug)]
struct HostFramebuffer {
    color: ImageHandle,
    depth: Option<ImageHandle>,
}

/// One recorded draw call.
#[derive(Clone, Debug)]
pub struct RecordedDraw {
    pub program: ProgramHandle,
    pub mesh: MeshBinding,
    pub params: ShaderParams,
    pub framebuffer: Option<FramebufferHandle>,
    pub bound_image: Option<ImageHandle>,
}

#[derive(Debug)]
pub struct HeadlessDevice {
    max_texture_dimension: u32,
    next_id: u64,
    images: HashMap<ImageHandle, HostImage>,
    framebuffers: HashMap<FramebufferHandle, HostFramebuffer>,
    buffers: HashMap<BufferHandle, Vec<u8>>,
    programs: HashMap<ProgramHandle, String>,
    bindings: HashMap<u32, ImageHandle>,
    state: AmbientState,
    stats: DeviceStats,
    draws: Vec<RecordedDraw>,
}

impl Default for HeadlessDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl HeadlessDevice {
    pub const DEFAULT_MAX_TEXTURE_DIMENSION: u32 = 8192;

    pub fn new() -> Self {
        Self::with_max_texture_dimension(Self::DEFAULT_MAX_TEXTURE_DIMENSION)
    }

    pub fn with_max_texture_dimension(max_texture_dimension: u32) -> Self {
        Self {
            max_texture_dimension,
            next_id: 1,
            images: HashMap::new(),
            framebuffers: HashMap::new(),
            buffers: HashMap::new(),
            programs: HashMap::new(),
            bindings: HashMap::new(),
            state: AmbientState::default(),
            stats: DeviceStats::default(),
            draws: Vec::new(),
        }
    }

    pub fn stats(&self) -> DeviceStats {
        self.stats
    }

    pub fn draws(&self) -> &[RecordedDraw] {
        &self.draws
    }

    /// The description an image was created with; `None` for depth surfaces.
    pub fn image_desc(&self, image: ImageHandle) -> Option<ImageDesc> {
        self.images.get(&image).and_then(|i| i.desc)
    }

    pub fn image_data(&self, image: ImageHandle) -> Option<&[u8]> {
        self.images.get(&image).map(|i| i.data.as_slice())
    }

    pub fn buffer_data(&self, buffer: BufferHandle) -> Option<&[u8]> {
        self.buffers.get(&buffer).map(Vec::as_slice)
    }

    pub fn framebuffer_attachments(
        &self,
        framebuffer: FramebufferHandle,
    ) -> Option<(ImageHandle, Option<ImageHandle>)> {
        self.framebuffers
            .get(&framebuffer)
            .map(|fb| (fb.color, fb.depth))
    }

    pub fn live_images(&self) -> usize {
        self.images.len()
    }

    fn next_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }
}

impl RenderDevice for HeadlessDevice {
    fn max_texture_dimension(&self) -> u32 {
        self.max_texture_dimension
    }

    fn create_image(&mut self, desc: &ImageDesc) -> ImageHandle {
        let handle = ImageHandle::new(self.next_id());
        self.images.insert(
            handle,
            HostImage {
                desc: Some(*desc),
                width: desc.width,
                height: desc.height,
                data: vec![0; desc.byte_size()],
            },
        );
        self.stats.images_created += 1;
        handle
    }

    fn write_image(&mut self, image: ImageHandle, data: &[u8]) {
        let Some(host) = self.images.get_mut(&image) else {
            log::warn!("write to unknown image {:?}", image);
            return;
        };
        let len = host.data.len().min(data.len());
        host.data[..len].copy_from_slice(&data[..len]);
        self.stats.image_uploads += 1;
    }

    fn write_image_layer(&mut self, image: ImageHandle, layer: u32, data: &[u8]) {
        let Some(host) = self.images.get_mut(&image) else {
            log::warn!("write to unknown image {:?}", image);
            return;
        };
        let Some(desc) = host.desc.filter(|d| d.dimension == ImageDimension::D3) else {
            log::warn!("layer write to a 2D image {:?}", image);
            return;
        };
        if layer >= desc.depth {
            log::warn!("layer {} out of range for {:?}", layer, image);
            return;
        }
        let size = desc.layer_size();
        let start = layer as usize * size;
        let len = size.min(data.len());
        host.data[start..start + len].copy_from_slice(&data[..len]);
        self.stats.layer_uploads += 1;
    }

    fn generate_mipmaps(&mut self, _image: ImageHandle) {
        self.stats.mipmap_generations += 1;
    }

    fn destroy_image(&mut self, image: ImageHandle) {
        if self.images.remove(&image).is_some() {
            self.stats.images_destroyed += 1;
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
        let handle = ImageHandle::new(self.next_id());
        let texel = match precision {
            DepthPrecision::Default => 3,
            DepthPrecision::Float32 => 4,
        };
        self.images.insert(
            handle,
            HostImage {
                desc: None,
                width,
                height,
                data: vec![0; width as usize * height as usize * texel],
            },
        );
        self.stats.depth_surfaces_created += 1;
        handle
    }

    fn create_framebuffer(
        &mut self,
        color: ImageHandle,
        depth: Option<ImageHandle>,
    ) -> FramebufferHandle {
        let handle = FramebufferHandle::new(self.next_id());
        self.framebuffers
            .insert(handle, HostFramebuffer { color, depth });
        self.stats.framebuffers_created += 1;
        handle
    }

    fn framebuffer_status(&self, framebuffer: FramebufferHandle) -> FramebufferStatus {
        let Some(fb) = self.framebuffers.get(&framebuffer) else {
            return FramebufferStatus::Incomplete("unknown framebuffer");
        };
        let Some(color) = self.images.get(&fb.color) else {
            return FramebufferStatus::Incomplete("missing colour attachment");
        };
        if color.width == 0 || color.height == 0 {
            return FramebufferStatus::Incomplete("zero sized attachment");
        }
        if let Some(depth) = fb.depth {
            match self.images.get(&depth) {
                Some(d) if d.width == color.width && d.height == color.height => {}
                _ => return FramebufferStatus::Incomplete("depth attachment size mismatch"),
            }
        }
        FramebufferStatus::Complete
    }

    fn destroy_framebuffer(&mut self, framebuffer: FramebufferHandle) {
        if self.framebuffers.remove(&framebuffer).is_some() {
            self.stats.framebuffers_destroyed += 1;
        }
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
        self.stats.readbacks += 1;
        let Some(image) = self
            .framebuffers
            .get(&framebuffer)
            .and_then(|fb| self.images.get(&fb.color))
        else {
            log::warn!("read from unknown framebuffer {:?}", framebuffer);
            return Vec::new();
        };
        let pixels = image.width as usize * image.height as usize;
        let out_texel = layout.channels() as usize * element.size();
        let Some(desc) = image.desc else {
            return vec![0; pixels * out_texel];
        };
        // Reinterpret the stored texels through the requested layout, padding
        // missing channels with zero.
        let in_texel = desc.format.bytes_per_pixel();
        let copy = in_texel.min(out_texel);
        let mut out = vec![0; pixels * out_texel];
        for p in 0..pixels {
            out[p * out_texel..p * out_texel + copy]
                .copy_from_slice(&image.data[p * in_texel..p * in_texel + copy]);
        }
        out
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

    fn clear(&mut self, color: [f32; 4], _depth: bool) {
        self.stats.clears += 1;
        let Some(fb) = self
            .state
            .draw_framebuffer
            .and_then(|fb| self.framebuffers.get(&fb))
        else {
            return;
        };
        let Some(image) = self.images.get_mut(&fb.color) else {
            return;
        };
        let Some(desc) = image.desc else {
            return;
        };
        if desc.format.element != ElementType::U8 {
            return;
        }
        let channels = desc.format.channels() as usize;
        let texel: Vec<u8> = color
            .iter()
            .take(channels)
            .map(|c| (c.clamp(0.0, 1.0) * 255.0).round() as u8)
            .collect();
        for chunk in image.data.chunks_exact_mut(channels) {
            chunk.copy_from_slice(&texel);
        }
    }

    fn create_buffer(&mut self, _usage: BufferUsage, data: &[u8]) -> BufferHandle {
        let handle = BufferHandle::new(self.next_id());
        self.buffers.insert(handle, data.to_vec());
        self.stats.buffers_created += 1;
        handle
    }

    fn write_buffer(&mut self, buffer: BufferHandle, data: &[u8]) {
        match self.buffers.get_mut(&buffer) {
            Some(stored) => {
                stored.clear();
                stored.extend_from_slice(data);
                self.stats.buffer_writes += 1;
            }
            None => log::warn!("write to unknown buffer {:?}", buffer),
        }
    }

    fn destroy_buffer(&mut self, buffer: BufferHandle) {
        if self.buffers.remove(&buffer).is_some() {
            self.stats.buffers_destroyed += 1;
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
        let handle = ProgramHandle::new(self.next_id());
        self.programs.insert(handle, label.to_string());
        self.stats.programs_created += 1;
        Ok(handle)
    }

    fn destroy_program(&mut self, program: ProgramHandle) {
        if self.programs.remove(&program).is_some() {
            self.stats.programs_destroyed += 1;
        }
    }

    fn draw_indexed(&mut self, program: ProgramHandle, mesh: &MeshBinding, params: &ShaderParams) {
        self.stats.draws += 1;
        self.draws.push(RecordedDraw {
            program,
            mesh: *mesh,
            params: params.clone(),
            framebuffer: self.state.draw_framebuffer,
            bound_image: self.bound_image(0),
        });
    }
}
