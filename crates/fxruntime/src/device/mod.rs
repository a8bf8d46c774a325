//! Abstraction over the host's graphics device.
//!
//! The runtime never creates a device of its own: the hook layer hands it the
//! device the host application renders with, and every effect draw goes
//! through [`GraphicsDevice`]. Resources are addressed by small copyable
//! handles. Getters never touch reference counts; only [`GraphicsDevice::add_ref`]
//! and [`GraphicsDevice::release`] do, which is what the depth tracker relies
//! on to observe host-side lifetimes.
//!
//! - `headless` is an in-memory implementation used by tests and the host
//!   harness.

pub mod headless;

use std::ops::BitOr;

use thiserror::Error;

/// Upper bound for simultaneously bound render targets.
pub const MAX_RENDER_TARGETS: usize = 8;
/// Upper bound for sampler slots a pass may bind.
pub const MAX_SAMPLERS: usize = 16;
/// Vertex constant register reserved for the texel size of the current pass.
pub const TEXEL_SIZE_REGISTER: u32 = 255;

macro_rules! handle {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub u64);
    };
}

handle!(
    /// Identity of a 2D surface (render target, depth-stencil or texture level).
    SurfaceId
);
handle!(
    /// Identity of a (possibly mipmapped) texture.
    TextureId
);
handle!(
    /// Identity of a captured device state block.
    StateBlockId
);
handle!(
    /// Identity of a vertex buffer together with its input layout.
    VertexBufferId
);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Format {
    Unknown,
    A8R8G8B8,
    X8R8G8B8,
    A8B8G8R8,
    X8B8G8R8,
    R5G6B5,
    A2R10G10B10,
    A16B16G16R16,
    A16B16G16R16F,
    A32B32G32R32F,
    R32F,
    L8,
    A8L8,
    Dxt1,
    Dxt3,
    Dxt5,
    Ati1,
    Ati2,
    D16,
    D24S8,
    D24X8,
    D32,
    /// Depth-stencil format that can also be sampled as a texture.
    Intz,
}

impl Format {
    pub fn is_depth(self) -> bool {
        matches!(
            self,
            Format::D16 | Format::D24S8 | Format::D24X8 | Format::D32 | Format::Intz
        )
    }

    /// Whether a depth surface of this format can be bound directly as a texture.
    pub fn is_shader_readable_depth(self) -> bool {
        matches!(self, Format::Intz)
    }

    /// Bytes per pixel for uncompressed formats, `None` for block compressed ones.
    pub fn bytes_per_pixel(self) -> Option<u32> {
        match self {
            Format::L8 => Some(1),
            Format::A8L8 | Format::R5G6B5 | Format::D16 => Some(2),
            Format::A8R8G8B8
            | Format::X8R8G8B8
            | Format::A8B8G8R8
            | Format::X8B8G8R8
            | Format::A2R10G10B10
            | Format::R32F
            | Format::D24S8
            | Format::D24X8
            | Format::D32
            | Format::Intz => Some(4),
            Format::A16B16G16R16 | Format::A16B16G16R16F => Some(8),
            Format::A32B32G32R32F => Some(16),
            Format::Unknown
            | Format::Dxt1
            | Format::Dxt3
            | Format::Dxt5
            | Format::Ati1
            | Format::Ati2 => None,
        }
    }

    /// The alpha-carrying twin of an alpha-less 8-bit layout.
    pub fn with_alpha(self) -> Format {
        match self {
            Format::X8R8G8B8 => Format::A8R8G8B8,
            Format::X8B8G8R8 => Format::A8B8G8R8,
            other => other,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SurfaceDesc {
    pub width: u32,
    pub height: u32,
    pub format: Format,
    /// Multisample count; 0 and 1 both mean single-sampled.
    pub samples: u32,
}

impl SurfaceDesc {
    pub fn is_multisampled(&self) -> bool {
        self.samples > 1
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextureUsage {
    Plain,
    RenderTarget,
    DepthStencil,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextureDesc {
    pub width: u32,
    pub height: u32,
    pub levels: u32,
    pub format: Format,
    pub usage: TextureUsage,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
    pub min_z: f32,
    pub max_z: f32,
}

impl Viewport {
    /// Viewport covering a whole surface, as the device sets it when render
    /// target 0 changes.
    pub fn covering(width: u32, height: u32) -> Self {
        Self {
            x: 0,
            y: 0,
            width,
            height,
            min_z: 0.0,
            max_z: 1.0,
        }
    }
}

/// Capabilities the runtime cares about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceCaps {
    pub simultaneous_render_targets: u32,
    /// Number of float4 shader constant registers per stage.
    pub constant_registers: u32,
    /// Device was created with mixed software/hardware vertex processing.
    pub mixed_vertex_processing: bool,
    pub vendor_id: u32,
    pub device_id: u32,
}

impl DeviceCaps {
    pub fn render_target_count(&self) -> usize {
        (self.simultaneous_render_targets as usize).clamp(1, MAX_RENDER_TARGETS)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ClearFlags(u8);

impl ClearFlags {
    pub const TARGET: ClearFlags = ClearFlags(1);
    pub const DEPTH: ClearFlags = ClearFlags(2);
    pub const STENCIL: ClearFlags = ClearFlags(4);

    pub fn contains(self, other: ClearFlags) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for ClearFlags {
    type Output = ClearFlags;

    fn bitor(self, rhs: ClearFlags) -> ClearFlags {
        ClearFlags(self.0 | rhs.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrimitiveKind {
    PointList,
    LineList,
    LineStrip,
    TriangleList,
    TriangleStrip,
    TriangleFan,
}

impl PrimitiveKind {
    /// Converts a primitive count into the number of vertices it consumes.
    pub fn vertex_count(self, primitives: u32) -> u32 {
        match self {
            PrimitiveKind::PointList => primitives,
            PrimitiveKind::LineList => primitives.saturating_mul(2),
            PrimitiveKind::LineStrip => primitives.saturating_add(1),
            PrimitiveKind::TriangleList => primitives.saturating_mul(3),
            PrimitiveKind::TriangleStrip | PrimitiveKind::TriangleFan => {
                primitives.saturating_add(2)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TextureFilter {
    None,
    #[default]
    Point,
    Linear,
    Anisotropic,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AddressMode {
    Wrap,
    Mirror,
    #[default]
    Clamp,
    Border,
    MirrorOnce,
}

/// Per-sampler state applied together with a pass's texture bindings.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SamplerState {
    pub address_u: AddressMode,
    pub address_v: AddressMode,
    pub address_w: AddressMode,
    pub border_color: u32,
    pub mag_filter: TextureFilter,
    pub min_filter: TextureFilter,
    pub mip_filter: TextureFilter,
    pub mip_lod_bias: f32,
    pub max_mip_level: u32,
    pub max_anisotropy: u32,
    pub srgb: bool,
}

impl Default for SamplerState {
    fn default() -> Self {
        Self {
            address_u: AddressMode::Clamp,
            address_v: AddressMode::Clamp,
            address_w: AddressMode::Clamp,
            border_color: 0,
            mag_filter: TextureFilter::Linear,
            min_filter: TextureFilter::Linear,
            mip_filter: TextureFilter::Linear,
            mip_lod_bias: 0.0,
            max_mip_level: 0,
            max_anisotropy: 1,
            srgb: false,
        }
    }
}

/// Pixels read back from a surface, `pitch` bytes per row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SurfaceReadback {
    pub width: u32,
    pub height: u32,
    pub format: Format,
    pub pitch: usize,
    pub data: Vec<u8>,
}

#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("failed to create {what}: {reason}")]
    Creation { what: &'static str, reason: String },
    #[error("{call} failed: {reason}")]
    Call { call: &'static str, reason: String },
    #[error("unknown resource handle")]
    UnknownResource,
}

/// Calls the runtime issues against the host device.
pub trait GraphicsDevice {
    fn caps(&self) -> DeviceCaps;

    fn create_render_target(
        &mut self,
        width: u32,
        height: u32,
        format: Format,
    ) -> Result<SurfaceId, DeviceError>;
    fn create_depth_stencil(
        &mut self,
        width: u32,
        height: u32,
        format: Format,
    ) -> Result<SurfaceId, DeviceError>;
    fn create_texture(&mut self, desc: &TextureDesc) -> Result<TextureId, DeviceError>;
    /// Creates a state block holding all pipeline state, shader constants
    /// included, initialised with the current device state.
    fn create_state_block(&mut self) -> Result<StateBlockId, DeviceError>;
    /// Starts recording: state set until [`GraphicsDevice::end_state_block`]
    /// goes into the new block instead of the device.
    fn begin_state_block(&mut self) -> Result<(), DeviceError>;
    fn end_state_block(&mut self) -> Result<StateBlockId, DeviceError>;
    /// Creates the three-vertex buffer (one float attribute holding 0, 1, 2)
    /// used by every effect pass.
    fn create_fullscreen_triangle(&mut self) -> Result<VertexBufferId, DeviceError>;

    /// Adds a reference to a surface and returns the new count.
    fn add_ref(&mut self, surface: SurfaceId) -> u32;
    /// Drops a reference to a surface and returns the remaining count.
    fn release(&mut self, surface: SurfaceId) -> u32;
    fn release_texture(&mut self, texture: TextureId);
    fn release_state_block(&mut self, block: StateBlockId);
    fn release_vertex_buffer(&mut self, buffer: VertexBufferId);

    fn surface_desc(&self, surface: SurfaceId) -> Option<SurfaceDesc>;
    fn texture_desc(&self, texture: TextureId) -> Option<TextureDesc>;
    fn texture_surface(&self, texture: TextureId, level: u32) -> Option<SurfaceId>;
    /// Texture owning `surface`, if it is a texture level.
    fn surface_container(&self, surface: SurfaceId) -> Option<TextureId>;

    fn capture_state_block(&mut self, block: StateBlockId);
    fn apply_state_block(&mut self, block: StateBlockId);

    fn viewport(&self) -> Viewport;
    fn set_viewport(&mut self, viewport: &Viewport);
    fn render_target(&self, index: u32) -> Option<SurfaceId>;
    /// Binds a render target; binding slot 0 resets the viewport to the
    /// target's size.
    fn set_render_target(&mut self, index: u32, surface: Option<SurfaceId>);
    fn depth_stencil(&self) -> Option<SurfaceId>;
    fn set_depth_stencil(&mut self, surface: Option<SurfaceId>);
    fn software_vertex_processing(&self) -> bool;
    fn set_software_vertex_processing(&mut self, enabled: bool);

    fn set_render_state(&mut self, state: u32, value: u32);
    fn set_texture(&mut self, sampler: u32, texture: Option<TextureId>);
    fn set_sampler_state(&mut self, sampler: u32, state: &SamplerState);
    fn set_vertex_shader_constants(&mut self, start_register: u32, data: &[f32]);
    fn set_pixel_shader_constants(&mut self, start_register: u32, data: &[f32]);
    fn set_stream_source(&mut self, buffer: Option<VertexBufferId>);

    fn begin_scene(&mut self) -> Result<(), DeviceError>;
    fn end_scene(&mut self);
    fn clear(&mut self, flags: ClearFlags, color: u32, depth: f32, stencil: u32);
    fn draw_primitive(&mut self, kind: PrimitiveKind, start_vertex: u32, primitive_count: u32);
    fn stretch_rect(&mut self, source: SurfaceId, dest: SurfaceId, filter: TextureFilter);
    fn generate_mip_sublevels(&mut self, texture: TextureId, filter: TextureFilter);
    /// Replaces level 0 of a texture with `data` laid out in the texture's format.
    fn update_texture(&mut self, texture: TextureId, data: &[u8]) -> Result<(), DeviceError>;
    fn read_surface(&mut self, surface: SurfaceId) -> Result<SurfaceReadback, DeviceError>;
}

/// A device resource the runtime created and must release itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum OwnedResource {
    Surface(SurfaceId),
    Texture(TextureId),
    StateBlock(StateBlockId),
    VertexBuffer(VertexBufferId),
}

impl OwnedResource {
    pub(crate) fn release(self, device: &mut dyn GraphicsDevice) {
        match self {
            OwnedResource::Surface(surface) => {
                device.release(surface);
            }
            OwnedResource::Texture(texture) => device.release_texture(texture),
            OwnedResource::StateBlock(block) => device.release_state_block(block),
            OwnedResource::VertexBuffer(buffer) => device.release_vertex_buffer(buffer),
        }
    }
}

/// Ordered set of owned resources, released last-created first.
#[derive(Debug, Default)]
pub(crate) struct ResourceScope {
    resources: Vec<OwnedResource>,
}

impl ResourceScope {
    pub(crate) fn track(&mut self, resource: OwnedResource) {
        self.resources.push(resource);
    }

    pub(crate) fn len(&self) -> usize {
        self.resources.len()
    }

    pub(crate) fn release_all(&mut self, device: &mut dyn GraphicsDevice) {
        while let Some(resource) = self.resources.pop() {
            resource.release(device);
        }
    }
}
