//! Off-screen render targets.
//!
//! A [`RenderTarget`] couples a colour [`Texture`] with an optional depth
//! surface behind one device framebuffer. Using it snapshots the device's
//! ambient state and finishing restores that snapshot, so an off-screen pass
//! leaves the caller's bindings, viewport, scissor box and toggles as they were.

use bytemuck::Pod;

use crate::device::{
    AmbientState, Capability, ChannelLayout, DepthPrecision, ElementType, FramebufferHandle,
    FramebufferStatus, ImageHandle, Rect, RenderDevice,
};

use super::texture::{Texture, TextureShape};

/// Host element types a render target can be read back into.
pub trait ReadbackElement: Pod {
    const ELEMENT: ElementType;
}

impl ReadbackElement for u8 {
    const ELEMENT: ElementType = ElementType::U8;
}

impl ReadbackElement for u16 {
    const ELEMENT: ElementType = ElementType::U16;
}

impl ReadbackElement for u32 {
    const ELEMENT: ElementType = ElementType::U32;
}

impl ReadbackElement for f32 {
    const ELEMENT: ElementType = ElementType::F32;
}

/// Parameters that decide whether `configure` has to reallocate.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
struct TargetConfig {
    width: u32,
    height: u32,
    element: ElementType,
    channels: u32,
    with_depth: bool,
}

#[derive(Debug)]
pub struct RenderTarget {
    color: Texture,
    depth: Option<ImageHandle>,
    framebuffer: Option<FramebufferHandle>,
    config: Option<TargetConfig>,
    saved: Option<AmbientState>,
}

impl Default for RenderTarget {
    fn default() -> Self {
        Self::new()
    }
}

impl RenderTarget {
    pub fn new() -> Self {
        Self {
            color: Texture::render_surface(),
            depth: None,
            framebuffer: None,
            config: None,
            saved: None,
        }
    }

    /// Allocates the colour surface, the optional depth surface and the
    /// framebuffer joining them.
    ///
    /// Calling it again with the same parameters while the framebuffer exists
    /// does nothing. An incomplete framebuffer is logged, not returned.
    pub fn configure(
        &mut self,
        device: &mut dyn RenderDevice,
        width: u32,
        height: u32,
        element: ElementType,
        channels: u32,
        with_depth: bool,
    ) {
        let config = TargetConfig {
            width,
            height,
            element,
            channels,
            with_depth,
        };
        if self.framebuffer.is_some() && self.config == Some(config) {
            return;
        }
        self.release(device);

        let ambient = Self::store_state(device);
        let bound = device.bound_image(0);

        self.color.create_uninitialized(TextureShape::new_2d(
            width,
            height,
            channels,
            element,
            Default::default(),
        ));
        self.color.create_or_update_device(device);
        let Some(color) = self.color.handle() else {
            log::error!("Render target colour surface could not be allocated");
            Self::restore_state(device, &ambient);
            return;
        };
        if with_depth {
            let precision = match element {
                ElementType::F32 => DepthPrecision::Float32,
                _ => DepthPrecision::Default,
            };
            self.depth = Some(device.create_depth_surface(width, height, precision));
        }
        let framebuffer = device.create_framebuffer(color, self.depth);
        if let FramebufferStatus::Incomplete(reason) = device.framebuffer_status(framebuffer) {
            log::error!("Framebuffer is not complete: {}", reason);
        }
        self.framebuffer = Some(framebuffer);
        self.config = Some(config);

        device.bind_image(0, bound);
        Self::restore_state(device, &ambient);
    }

    /// Makes this target the active render destination.
    ///
    /// The previous ambient state is saved for [`end`](Self::end). Nested use
    /// keeps the outermost snapshot. With `set_viewport` the viewport is set to
    /// the whole target.
    pub fn begin(&mut self, device: &mut dyn RenderDevice, set_viewport: bool) {
        let Some(framebuffer) = self.framebuffer else {
            log::warn!("Render target used before configure");
            return;
        };
        if self.saved.is_some() {
            log::warn!("Render target is already in use, keeping the first saved state");
            Self::store_state(device);
        } else {
            self.saved = Some(Self::store_state(device));
        }
        device.bind_framebuffer(Some(framebuffer));
        if set_viewport {
            device.set_viewport(Rect::new(0, 0, self.width(), self.height()));
        }
    }

    /// Restores the state saved by [`begin`](Self::begin).
    pub fn end(&mut self, device: &mut dyn RenderDevice) {
        match self.saved.take() {
            Some(state) => Self::restore_state(device, &state),
            None => log::warn!("Render target finished without being used"),
        }
    }

    /// Runs `pass` between [`begin`](Self::begin) and [`end`](Self::end).
    pub fn render_into<R>(
        &mut self,
        device: &mut dyn RenderDevice,
        set_viewport: bool,
        pass: impl FnOnce(&mut dyn RenderDevice) -> R,
    ) -> R {
        self.begin(device, set_viewport);
        let result = pass(device);
        self.end(device);
        result
    }

    /// Reads the colour surface back into a new host buffer.
    ///
    /// The buffer holds `width * height * n` values of `T`, where `n` is 1 for
    /// single channel targets, 3 for RGB targets and 4 otherwise.
    pub fn read_pixels<T: ReadbackElement>(&self, device: &mut dyn RenderDevice) -> Vec<T> {
        let Some(framebuffer) = self.framebuffer else {
            return Vec::new();
        };
        let layout = ChannelLayout::for_readback(self.color.channels());
        let bytes = device.read_pixels(framebuffer, layout, T::ELEMENT);
        bytemuck::pod_collect_to_vec(&bytes)
    }

    /// Binds the colour surface for sampling.
    pub fn bind(&mut self, device: &mut dyn RenderDevice, slot: u32) {
        self.color.bind(device, slot);
    }

    /// Binds the depth surface for sampling; nothing happens without one.
    pub fn bind_depth(&self, device: &mut dyn RenderDevice, slot: u32) {
        if let Some(depth) = self.depth {
            device.bind_image(slot, Some(depth));
        }
    }

    /// Destroys the framebuffer and both surfaces.
    pub fn release(&mut self, device: &mut dyn RenderDevice) {
        if let Some(framebuffer) = self.framebuffer.take() {
            device.destroy_framebuffer(framebuffer);
        }
        if let Some(depth) = self.depth.take() {
            device.destroy_image(depth);
        }
        self.color.release(device);
        self.config = None;
    }

    pub fn color(&self) -> &Texture {
        &self.color
    }

    pub fn framebuffer(&self) -> Option<FramebufferHandle> {
        self.framebuffer
    }

    pub fn depth(&self) -> Option<ImageHandle> {
        self.depth
    }

    pub fn width(&self) -> u32 {
        self.color.width()
    }

    pub fn height(&self) -> u32 {
        self.color.height()
    }

    pub fn is_in_use(&self) -> bool {
        self.saved.is_some()
    }

    /// Captures the ambient state and switches the scissor test off, which
    /// every pass on a render target expects.
    fn store_state(device: &mut dyn RenderDevice) -> AmbientState {
        let state = device.ambient_state();
        device.set_capability(Capability::ScissorTest, false);
        state
    }

    fn restore_state(device: &mut dyn RenderDevice, state: &AmbientState) {
        device.set_ambient_state(state);
    }
}
