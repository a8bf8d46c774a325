//! In-memory [`GraphicsDevice`] that keeps real bookkeeping (reference counts,
//! bindings, state blocks, pixel data for colour surfaces) without a GPU.
//!
//! Besides the trait it offers a few host-side helpers so tests and the
//! `fxhost` harness can play the part of the application: creating the back
//! buffer and the application's own depth surfaces, filling surfaces with a
//! colour, and inspecting the ordered log of [`DeviceCall`]s.

use std::collections::{BTreeMap, HashMap, HashSet};

use super::{
    ClearFlags, DeviceCaps, DeviceError, Format, GraphicsDevice, PrimitiveKind, SamplerState,
    StateBlockId, SurfaceDesc, SurfaceId, SurfaceReadback, TextureDesc, TextureFilter, TextureId,
    TextureUsage, VertexBufferId, Viewport, MAX_RENDER_TARGETS, MAX_SAMPLERS,
};

/// Device calls worth asserting on, in issue order.
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceCall {
    BeginScene,
    EndScene,
    CaptureStateBlock(StateBlockId),
    ApplyStateBlock(StateBlockId),
    SetRenderTarget {
        index: u32,
        surface: Option<SurfaceId>,
    },
    SetDepthStencil(Option<SurfaceId>),
    SetTexture {
        sampler: u32,
        texture: Option<TextureId>,
    },
    SetVertexConstants {
        start_register: u32,
        registers: u32,
    },
    SetPixelConstants {
        start_register: u32,
        registers: u32,
    },
    Clear {
        flags: ClearFlags,
        depth: f32,
    },
    Draw {
        kind: PrimitiveKind,
        primitive_count: u32,
    },
    StretchRect {
        source: SurfaceId,
        dest: SurfaceId,
    },
    GenerateMips(TextureId),
    UpdateTexture {
        texture: TextureId,
        bytes: usize,
    },
    ReadSurface(SurfaceId),
}

#[derive(Debug, Clone, PartialEq)]
struct BoundState {
    viewport: Viewport,
    render_targets: [Option<SurfaceId>; MAX_RENDER_TARGETS],
    depth_stencil: Option<SurfaceId>,
    software_vertex_processing: bool,
    textures: [Option<TextureId>; MAX_SAMPLERS],
    samplers: [SamplerState; MAX_SAMPLERS],
    render_states: BTreeMap<u32, u32>,
    vertex_constants: Vec<f32>,
    pixel_constants: Vec<f32>,
    stream: Option<VertexBufferId>,
}

/// State held by a state block. Full blocks hold every sampler, render
/// state, the stream source and all shader constants; recorded blocks hold
/// only what was set while recording. Render targets, depth-stencil and the
/// viewport are never part of a block.
#[derive(Debug, Clone, Default, PartialEq)]
struct BlockState {
    full: bool,
    textures: BTreeMap<u32, Option<TextureId>>,
    samplers: BTreeMap<u32, SamplerState>,
    render_states: BTreeMap<u32, u32>,
    stream: Option<Option<VertexBufferId>>,
    vertex_constants: BTreeMap<u32, [f32; 4]>,
    pixel_constants: BTreeMap<u32, [f32; 4]>,
}

fn registers_of(constants: &[f32]) -> BTreeMap<u32, [f32; 4]> {
    (0..(constants.len() / 4) as u32)
        .map(|register| (register, read_register(constants, register)))
        .collect()
}

fn record_registers(registers: &mut BTreeMap<u32, [f32; 4]>, start_register: u32, data: &[f32]) {
    for (offset, chunk) in data.chunks(4).enumerate() {
        let mut value = [0.0; 4];
        value[..chunk.len()].copy_from_slice(chunk);
        registers.insert(start_register + offset as u32, value);
    }
}

impl BoundState {
    fn block(&self) -> BlockState {
        BlockState {
            full: true,
            textures: (0..MAX_SAMPLERS as u32).zip(self.textures).collect(),
            samplers: (0..MAX_SAMPLERS as u32).zip(self.samplers).collect(),
            render_states: self.render_states.clone(),
            stream: Some(self.stream),
            vertex_constants: registers_of(&self.vertex_constants),
            pixel_constants: registers_of(&self.pixel_constants),
        }
    }

    /// Refreshes the states a block holds from the current state.
    fn capture_into(&self, block: &mut BlockState) {
        if block.full {
            *block = self.block();
            return;
        }
        for (sampler, texture) in block.textures.iter_mut() {
            *texture = self.textures.get(*sampler as usize).copied().flatten();
        }
        for (sampler, state) in block.samplers.iter_mut() {
            if let Some(current) = self.samplers.get(*sampler as usize) {
                *state = *current;
            }
        }
        for (key, value) in block.render_states.iter_mut() {
            if let Some(current) = self.render_states.get(key) {
                *value = *current;
            }
        }
        if block.stream.is_some() {
            block.stream = Some(self.stream);
        }
        for (register, value) in block.vertex_constants.iter_mut() {
            *value = read_register(&self.vertex_constants, *register);
        }
        for (register, value) in block.pixel_constants.iter_mut() {
            *value = read_register(&self.pixel_constants, *register);
        }
    }

    fn apply_block(&mut self, block: &BlockState) {
        for (sampler, texture) in &block.textures {
            if let Some(slot) = self.textures.get_mut(*sampler as usize) {
                *slot = *texture;
            }
        }
        for (sampler, state) in &block.samplers {
            if let Some(slot) = self.samplers.get_mut(*sampler as usize) {
                *slot = *state;
            }
        }
        if block.full {
            self.render_states = block.render_states.clone();
        } else {
            self.render_states
                .extend(block.render_states.iter().map(|(key, value)| (*key, *value)));
        }
        if let Some(stream) = block.stream {
            self.stream = stream;
        }
        for (register, value) in &block.vertex_constants {
            write_registers(&mut self.vertex_constants, *register, value);
        }
        for (register, value) in &block.pixel_constants {
            write_registers(&mut self.pixel_constants, *register, value);
        }
    }
}

#[derive(Debug)]
struct SurfaceEntry {
    desc: SurfaceDesc,
    refs: u32,
    container: Option<TextureId>,
    pixels: Vec<u8>,
}

#[derive(Debug)]
struct TextureEntry {
    desc: TextureDesc,
    levels: Vec<SurfaceId>,
    data: Vec<u8>,
}

#[derive(Debug)]
pub struct HeadlessDevice {
    caps: DeviceCaps,
    next_id: u64,
    surfaces: HashMap<SurfaceId, SurfaceEntry>,
    textures: HashMap<TextureId, TextureEntry>,
    state_blocks: HashMap<StateBlockId, BlockState>,
    vertex_buffers: HashSet<VertexBufferId>,
    state: BoundState,
    recording: Option<BlockState>,
    in_scene: bool,
    unsupported: HashSet<Format>,
    exhausted: bool,
    calls: Vec<DeviceCall>,
}

impl HeadlessDevice {
    pub fn new(caps: DeviceCaps) -> Self {
        let registers = caps.constant_registers as usize * 4;
        Self {
            caps,
            next_id: 1,
            surfaces: HashMap::new(),
            textures: HashMap::new(),
            state_blocks: HashMap::new(),
            vertex_buffers: HashSet::new(),
            state: BoundState {
                viewport: Viewport::covering(0, 0),
                render_targets: [None; MAX_RENDER_TARGETS],
                depth_stencil: None,
                software_vertex_processing: false,
                textures: [None; MAX_SAMPLERS],
                samplers: [SamplerState::default(); MAX_SAMPLERS],
                render_states: BTreeMap::new(),
                vertex_constants: vec![0.0; registers],
                pixel_constants: vec![0.0; registers],
                stream: None,
            },
            recording: None,
            in_scene: false,
            unsupported: HashSet::new(),
            exhausted: false,
            calls: Vec::new(),
        }
    }

    /// Capabilities of a typical shader model 3 part.
    pub fn default_caps() -> DeviceCaps {
        DeviceCaps {
            simultaneous_render_targets: 4,
            constant_registers: 256,
            mixed_vertex_processing: false,
            vendor_id: 0x10DE,
            device_id: 0x0001,
        }
    }

    /// Makes every creation call with `format` fail, as on hardware without support.
    pub fn set_format_supported(&mut self, format: Format, supported: bool) {
        if supported {
            self.unsupported.remove(&format);
        } else {
            self.unsupported.insert(format);
        }
    }

    /// Makes every subsequent creation call fail.
    pub fn set_exhausted(&mut self, exhausted: bool) {
        self.exhausted = exhausted;
    }

    /// Creates a surface the way the application would, holding one reference.
    pub fn create_host_surface(&mut self, desc: SurfaceDesc) -> SurfaceId {
        self.insert_surface(desc, None)
    }

    pub fn fill_surface(&mut self, surface: SurfaceId, color: u32) {
        if let Some(entry) = self.surfaces.get_mut(&surface) {
            fill_pixels(&mut entry.pixels, entry.desc.format, color);
        }
    }

    pub fn ref_count(&self, surface: SurfaceId) -> Option<u32> {
        self.surfaces.get(&surface).map(|entry| entry.refs)
    }

    pub fn is_alive(&self, surface: SurfaceId) -> bool {
        self.surfaces.contains_key(&surface)
    }

    pub fn texture_alive(&self, texture: TextureId) -> bool {
        self.textures.contains_key(&texture)
    }

    pub fn live_textures(&self) -> usize {
        self.textures.len()
    }

    pub fn live_state_blocks(&self) -> usize {
        self.state_blocks.len()
    }

    pub fn texture_data(&self, texture: TextureId) -> Option<&[u8]> {
        self.textures.get(&texture).map(|entry| entry.data.as_slice())
    }

    pub fn render_state(&self, key: u32) -> Option<u32> {
        self.state.render_states.get(&key).copied()
    }

    pub fn bound_texture(&self, sampler: u32) -> Option<TextureId> {
        self.state.textures.get(sampler as usize).copied().flatten()
    }

    pub fn sampler_state(&self, sampler: u32) -> Option<SamplerState> {
        self.state.samplers.get(sampler as usize).copied()
    }

    pub fn stream_source(&self) -> Option<VertexBufferId> {
        self.state.stream
    }

    /// Reads back one float4 vertex constant register.
    pub fn vertex_constant(&self, register: u32) -> [f32; 4] {
        read_register(&self.state.vertex_constants, register)
    }

    pub fn pixel_constant(&self, register: u32) -> [f32; 4] {
        read_register(&self.state.pixel_constants, register)
    }

    pub fn in_scene(&self) -> bool {
        self.in_scene
    }

    pub fn calls(&self) -> &[DeviceCall] {
        &self.calls
    }

    pub fn take_calls(&mut self) -> Vec<DeviceCall> {
        std::mem::take(&mut self.calls)
    }

    fn allocate_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn insert_surface(&mut self, desc: SurfaceDesc, container: Option<TextureId>) -> SurfaceId {
        let id = SurfaceId(self.allocate_id());
        let pixel_bytes = if desc.format.is_depth() {
            0
        } else {
            desc.format.bytes_per_pixel().unwrap_or(0) as usize
                * desc.width as usize
                * desc.height as usize
        };
        self.surfaces.insert(
            id,
            SurfaceEntry {
                desc,
                refs: 1,
                container,
                pixels: vec![0; pixel_bytes],
            },
        );
        id
    }

    fn check_creation(&self, what: &'static str, format: Format) -> Result<(), DeviceError> {
        if self.exhausted {
            return Err(DeviceError::Creation {
                what,
                reason: "out of video memory".into(),
            });
        }
        if self.unsupported.contains(&format) {
            return Err(DeviceError::Creation {
                what,
                reason: format!("format {format:?} is not supported"),
            });
        }
        Ok(())
    }
}

fn read_register(constants: &[f32], register: u32) -> [f32; 4] {
    let start = register as usize * 4;
    let mut out = [0.0; 4];
    if let Some(values) = constants.get(start..start + 4) {
        out.copy_from_slice(values);
    }
    out
}

fn write_registers(constants: &mut [f32], start_register: u32, data: &[f32]) {
    let start = start_register as usize * 4;
    if start >= constants.len() {
        return;
    }
    let len = data.len().min(constants.len() - start);
    constants[start..start + len].copy_from_slice(&data[..len]);
}

fn fill_pixels(pixels: &mut [u8], format: Format, color: u32) {
    let Some(bpp) = format.bytes_per_pixel() else {
        return;
    };
    let bytes = color.to_le_bytes();
    for pixel in pixels.chunks_exact_mut(bpp as usize) {
        let len = pixel.len().min(4);
        pixel[..len].copy_from_slice(&bytes[..len]);
    }
}

impl GraphicsDevice for HeadlessDevice {
    fn caps(&self) -> DeviceCaps {
        self.caps
    }

    fn create_render_target(
        &mut self,
        width: u32,
        height: u32,
        format: Format,
    ) -> Result<SurfaceId, DeviceError> {
        self.check_creation("render target", format)?;
        Ok(self.insert_surface(
            SurfaceDesc {
                width,
                height,
                format,
                samples: 0,
            },
            None,
        ))
    }

    fn create_depth_stencil(
        &mut self,
        width: u32,
        height: u32,
        format: Format,
    ) -> Result<SurfaceId, DeviceError> {
        self.check_creation("depth-stencil surface", format)?;
        Ok(self.insert_surface(
            SurfaceDesc {
                width,
                height,
                format,
                samples: 0,
            },
            None,
        ))
    }

    fn create_texture(&mut self, desc: &TextureDesc) -> Result<TextureId, DeviceError> {
        self.check_creation("texture", desc.format)?;
        if desc.usage == TextureUsage::DepthStencil && !desc.format.is_depth() {
            return Err(DeviceError::Creation {
                what: "texture",
                reason: format!("{:?} cannot be used as depth-stencil", desc.format),
            });
        }
        let id = TextureId(self.allocate_id());
        let levels = desc.levels.max(1);
        let mut surfaces = Vec::with_capacity(levels as usize);
        for level in 0..levels {
            let surface = self.insert_surface(
                SurfaceDesc {
                    width: (desc.width >> level).max(1),
                    height: (desc.height >> level).max(1),
                    format: desc.format,
                    samples: 0,
                },
                Some(id),
            );
            surfaces.push(surface);
        }
        self.textures.insert(
            id,
            TextureEntry {
                desc: TextureDesc { levels, ..*desc },
                levels: surfaces,
                data: Vec::new(),
            },
        );
        Ok(id)
    }

    fn create_state_block(&mut self) -> Result<StateBlockId, DeviceError> {
        if self.exhausted {
            return Err(DeviceError::Creation {
                what: "state block",
                reason: "out of memory".into(),
            });
        }
        let id = StateBlockId(self.allocate_id());
        self.state_blocks.insert(id, self.state.block());
        Ok(id)
    }

    fn create_fullscreen_triangle(&mut self) -> Result<VertexBufferId, DeviceError> {
        if self.exhausted {
            return Err(DeviceError::Creation {
                what: "vertex buffer",
                reason: "out of video memory".into(),
            });
        }
        let id = VertexBufferId(self.allocate_id());
        self.vertex_buffers.insert(id);
        Ok(id)
    }

    fn add_ref(&mut self, surface: SurfaceId) -> u32 {
        match self.surfaces.get_mut(&surface) {
            Some(entry) => {
                entry.refs += 1;
                entry.refs
            }
            None => 0,
        }
    }

    fn release(&mut self, surface: SurfaceId) -> u32 {
        let Some(entry) = self.surfaces.get_mut(&surface) else {
            return 0;
        };
        entry.refs = entry.refs.saturating_sub(1);
        let remaining = entry.refs;
        if remaining == 0 && entry.container.is_none() {
            self.surfaces.remove(&surface);
        }
        remaining
    }

    fn release_texture(&mut self, texture: TextureId) {
        if let Some(entry) = self.textures.remove(&texture) {
            for surface in entry.levels {
                self.surfaces.remove(&surface);
            }
        }
    }

    fn release_state_block(&mut self, block: StateBlockId) {
        self.state_blocks.remove(&block);
    }

    fn release_vertex_buffer(&mut self, buffer: VertexBufferId) {
        self.vertex_buffers.remove(&buffer);
    }

    fn surface_desc(&self, surface: SurfaceId) -> Option<SurfaceDesc> {
        self.surfaces.get(&surface).map(|entry| entry.desc)
    }

    fn texture_desc(&self, texture: TextureId) -> Option<TextureDesc> {
        self.textures.get(&texture).map(|entry| entry.desc)
    }

    fn texture_surface(&self, texture: TextureId, level: u32) -> Option<SurfaceId> {
        self.textures
            .get(&texture)
            .and_then(|entry| entry.levels.get(level as usize).copied())
    }

    fn surface_container(&self, surface: SurfaceId) -> Option<TextureId> {
        self.surfaces.get(&surface).and_then(|entry| entry.container)
    }

    fn begin_state_block(&mut self) -> Result<(), DeviceError> {
        if self.recording.is_some() {
            return Err(DeviceError::Call {
                call: "begin_state_block",
                reason: "a state block is already being recorded".into(),
            });
        }
        self.recording = Some(BlockState::default());
        Ok(())
    }

    fn end_state_block(&mut self) -> Result<StateBlockId, DeviceError> {
        let recorded = self.recording.take().ok_or_else(|| DeviceError::Call {
            call: "end_state_block",
            reason: "no state block is being recorded".into(),
        })?;
        if self.exhausted {
            return Err(DeviceError::Creation {
                what: "state block",
                reason: "out of memory".into(),
            });
        }
        let id = StateBlockId(self.allocate_id());
        self.state_blocks.insert(id, recorded);
        Ok(id)
    }

    fn capture_state_block(&mut self, block: StateBlockId) {
        self.calls.push(DeviceCall::CaptureStateBlock(block));
        if let Some(slot) = self.state_blocks.get_mut(&block) {
            self.state.capture_into(slot);
        }
    }

    fn apply_state_block(&mut self, block: StateBlockId) {
        self.calls.push(DeviceCall::ApplyStateBlock(block));
        if let Some(saved) = self.state_blocks.get(&block) {
            self.state.apply_block(saved);
        }
    }

    fn viewport(&self) -> Viewport {
        self.state.viewport
    }

    fn set_viewport(&mut self, viewport: &Viewport) {
        self.state.viewport = *viewport;
    }

    fn render_target(&self, index: u32) -> Option<SurfaceId> {
        self.state.render_targets.get(index as usize).copied().flatten()
    }

    fn set_render_target(&mut self, index: u32, surface: Option<SurfaceId>) {
        self.calls.push(DeviceCall::SetRenderTarget { index, surface });
        if let Some(slot) = self.state.render_targets.get_mut(index as usize) {
            *slot = surface;
        }
        if index == 0 {
            if let Some(desc) = surface.and_then(|surface| self.surface_desc(surface)) {
                self.state.viewport = Viewport::covering(desc.width, desc.height);
            }
        }
    }

    fn depth_stencil(&self) -> Option<SurfaceId> {
        self.state.depth_stencil
    }

    fn set_depth_stencil(&mut self, surface: Option<SurfaceId>) {
        self.calls.push(DeviceCall::SetDepthStencil(surface));
        self.state.depth_stencil = surface;
    }

    fn software_vertex_processing(&self) -> bool {
        self.state.software_vertex_processing
    }

    fn set_software_vertex_processing(&mut self, enabled: bool) {
        self.state.software_vertex_processing = enabled;
    }

    fn set_render_state(&mut self, state: u32, value: u32) {
        match self.recording.as_mut() {
            Some(block) => {
                block.render_states.insert(state, value);
            }
            None => {
                self.state.render_states.insert(state, value);
            }
        }
    }

    fn set_texture(&mut self, sampler: u32, texture: Option<TextureId>) {
        if let Some(block) = self.recording.as_mut() {
            block.textures.insert(sampler, texture);
            return;
        }
        self.calls.push(DeviceCall::SetTexture { sampler, texture });
        if let Some(slot) = self.state.textures.get_mut(sampler as usize) {
            *slot = texture;
        }
    }

    fn set_sampler_state(&mut self, sampler: u32, state: &SamplerState) {
        if let Some(block) = self.recording.as_mut() {
            block.samplers.insert(sampler, *state);
            return;
        }
        if let Some(slot) = self.state.samplers.get_mut(sampler as usize) {
            *slot = *state;
        }
    }

    fn set_vertex_shader_constants(&mut self, start_register: u32, data: &[f32]) {
        if let Some(block) = self.recording.as_mut() {
            record_registers(&mut block.vertex_constants, start_register, data);
            return;
        }
        self.calls.push(DeviceCall::SetVertexConstants {
            start_register,
            registers: (data.len() / 4) as u32,
        });
        write_registers(&mut self.state.vertex_constants, start_register, data);
    }

    fn set_pixel_shader_constants(&mut self, start_register: u32, data: &[f32]) {
        if let Some(block) = self.recording.as_mut() {
            record_registers(&mut block.pixel_constants, start_register, data);
            return;
        }
        self.calls.push(DeviceCall::SetPixelConstants {
            start_register,
            registers: (data.len() / 4) as u32,
        });
        write_registers(&mut self.state.pixel_constants, start_register, data);
    }

    fn set_stream_source(&mut self, buffer: Option<VertexBufferId>) {
        match self.recording.as_mut() {
            Some(block) => block.stream = Some(buffer),
            None => self.state.stream = buffer,
        }
    }

    fn begin_scene(&mut self) -> Result<(), DeviceError> {
        if self.in_scene {
            return Err(DeviceError::Call {
                call: "begin_scene",
                reason: "scene already active".into(),
            });
        }
        self.in_scene = true;
        self.calls.push(DeviceCall::BeginScene);
        Ok(())
    }

    fn end_scene(&mut self) {
        self.in_scene = false;
        self.calls.push(DeviceCall::EndScene);
    }

    fn clear(&mut self, flags: ClearFlags, color: u32, depth: f32, _stencil: u32) {
        self.calls.push(DeviceCall::Clear { flags, depth });
        if !flags.contains(ClearFlags::TARGET) {
            return;
        }
        let targets = self.state.render_targets;
        for surface in targets.into_iter().flatten() {
            if let Some(entry) = self.surfaces.get_mut(&surface) {
                fill_pixels(&mut entry.pixels, entry.desc.format, color);
            }
        }
    }

    fn draw_primitive(&mut self, kind: PrimitiveKind, _start_vertex: u32, primitive_count: u32) {
        let bound = self
            .state
            .stream
            .is_some_and(|buffer| self.vertex_buffers.contains(&buffer));
        if !bound {
            tracing::warn!(?kind, primitive_count, "draw without a vertex stream dropped");
            return;
        }
        self.calls.push(DeviceCall::Draw {
            kind,
            primitive_count,
        });
    }

    fn stretch_rect(&mut self, source: SurfaceId, dest: SurfaceId, _filter: TextureFilter) {
        self.calls.push(DeviceCall::StretchRect { source, dest });
        let Some(pixels) = self.surfaces.get(&source).map(|entry| entry.pixels.clone()) else {
            return;
        };
        if let Some(entry) = self.surfaces.get_mut(&dest) {
            let len = pixels.len().min(entry.pixels.len());
            entry.pixels[..len].copy_from_slice(&pixels[..len]);
        }
    }

    fn generate_mip_sublevels(&mut self, texture: TextureId, _filter: TextureFilter) {
        self.calls.push(DeviceCall::GenerateMips(texture));
    }

    fn update_texture(&mut self, texture: TextureId, data: &[u8]) -> Result<(), DeviceError> {
        let entry = self
            .textures
            .get_mut(&texture)
            .ok_or(DeviceError::UnknownResource)?;
        entry.data = data.to_vec();
        self.calls.push(DeviceCall::UpdateTexture {
            texture,
            bytes: data.len(),
        });
        Ok(())
    }

    fn read_surface(&mut self, surface: SurfaceId) -> Result<SurfaceReadback, DeviceError> {
        self.calls.push(DeviceCall::ReadSurface(surface));
        let entry = self
            .surfaces
            .get(&surface)
            .ok_or(DeviceError::UnknownResource)?;
        let bpp = entry
            .desc
            .format
            .bytes_per_pixel()
            .ok_or_else(|| DeviceError::Call {
                call: "read_surface",
                reason: format!("{:?} cannot be read back", entry.desc.format),
            })?;
        Ok(SurfaceReadback {
            width: entry.desc.width,
            height: entry.desc.height,
            format: entry.desc.format,
            pitch: (entry.desc.width * bpp) as usize,
            data: entry.pixels.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device() -> HeadlessDevice {
        HeadlessDevice::new(HeadlessDevice::default_caps())
    }

    #[test]
    fn reference_counts_track_add_and_release() {
        let mut device = device();
        let surface = device.create_host_surface(SurfaceDesc {
            width: 64,
            height: 64,
            format: Format::D24S8,
            samples: 0,
        });
        assert_eq!(device.add_ref(surface), 2);
        assert_eq!(device.release(surface), 1);
        assert_eq!(device.release(surface), 0);
        assert!(!device.is_alive(surface));
    }

    #[test]
    fn binding_render_target_zero_resets_viewport() {
        let mut device = device();
        let target = device
            .create_render_target(320, 200, Format::A8R8G8B8)
            .unwrap();
        device.set_viewport(&Viewport::covering(10, 10));
        device.set_render_target(0, Some(target));
        assert_eq!(device.viewport(), Viewport::covering(320, 200));
    }

    #[test]
    fn state_blocks_restore_captured_state() {
        let mut device = device();
        device.set_render_state(7, 1);
        let block = device.create_state_block().unwrap();
        device.set_render_state(7, 2);
        device.apply_state_block(block);
        assert_eq!(device.render_state(7), Some(1));
    }

    #[test]
    fn full_blocks_restore_shader_constants() {
        let mut device = device();
        device.set_vertex_shader_constants(0, &[9.0; 4]);
        device.set_pixel_shader_constants(255, &[7.0; 4]);
        let block = device.create_state_block().unwrap();
        device.set_vertex_shader_constants(0, &[1.0; 4]);
        device.set_pixel_shader_constants(255, &[2.0; 4]);
        device.apply_state_block(block);
        assert_eq!(device.vertex_constant(0), [9.0; 4]);
        assert_eq!(device.pixel_constant(255), [7.0; 4]);
    }

    #[test]
    fn recorded_blocks_hold_only_recorded_states() {
        let mut device = device();
        let triangle = device.create_fullscreen_triangle().unwrap();
        device.set_stream_source(Some(triangle));
        device.set_render_state(7, 42);

        device.begin_state_block().unwrap();
        device.set_render_state(9, 1);
        let block = device.end_state_block().unwrap();
        assert_eq!(device.render_state(9), None);

        device.set_render_state(7, 5);
        device.apply_state_block(block);
        assert_eq!(device.render_state(7), Some(5));
        assert_eq!(device.render_state(9), Some(1));
        assert_eq!(device.stream_source(), Some(triangle));
        assert!(device.end_state_block().is_err());
    }

    #[test]
    fn draws_without_a_stream_are_dropped() {
        let mut device = device();
        device.draw_primitive(PrimitiveKind::TriangleList, 0, 1);
        assert!(device.calls().is_empty());
        let triangle = device.create_fullscreen_triangle().unwrap();
        device.set_stream_source(Some(triangle));
        device.draw_primitive(PrimitiveKind::TriangleList, 0, 1);
        assert_eq!(device.calls().len(), 1);
    }

    #[test]
    fn unsupported_formats_fail_creation() {
        let mut device = device();
        device.set_format_supported(Format::Intz, false);
        let err = device
            .create_texture(&TextureDesc {
                width: 4,
                height: 4,
                levels: 1,
                format: Format::Intz,
                usage: TextureUsage::DepthStencil,
            })
            .unwrap_err();
        assert!(matches!(err, DeviceError::Creation { .. }));
    }

    #[test]
    fn textures_expose_level_surfaces() {
        let mut device = device();
        let texture = device
            .create_texture(&TextureDesc {
                width: 64,
                height: 32,
                levels: 3,
                format: Format::A8R8G8B8,
                usage: TextureUsage::RenderTarget,
            })
            .unwrap();
        let level2 = device.texture_surface(texture, 2).unwrap();
        assert_eq!(device.surface_desc(level2).unwrap().width, 16);
        assert_eq!(device.surface_container(level2), Some(texture));
        device.release_texture(texture);
        assert!(!device.is_alive(level2));
    }
}
