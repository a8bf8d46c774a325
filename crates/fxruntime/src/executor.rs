//! Per-frame device resources and execution of techniques against them.

use crate::device::{
    ClearFlags, DeviceError, GraphicsDevice, OwnedResource, PrimitiveKind, ResourceScope,
    StateBlockId, SurfaceDesc, SurfaceId, TextureDesc, TextureFilter, TextureId, TextureUsage,
    VertexBufferId, TEXEL_SIZE_REGISTER,
};
use crate::effect::{BuildEnvironment, Effect};
use crate::stats::FrameStats;

/// Resources the runtime creates once per device (re)initialisation.
#[derive(Debug)]
pub struct FrameResources {
    /// The host's back buffer.
    pub backbuffer: SurfaceId,
    pub backbuffer_desc: SurfaceDesc,
    /// Single-sampled, alpha-carrying copy of the back buffer; equal to
    /// `backbuffer` when no resolve is needed.
    pub resolved: SurfaceId,
    /// Texture effects sample the back buffer from.
    pub backbuffer_texture: TextureId,
    pub backbuffer_texture_surface: SurfaceId,
    pub default_depth: SurfaceId,
    /// Block used to capture the host's state around effect rendering.
    pub state_block: StateBlockId,
    pub triangle: VertexBufferId,
    resources: ResourceScope,
}

impl FrameResources {
    /// Creates everything the executor needs for `backbuffer`. Resources
    /// created before a failure are released again.
    pub fn create(
        device: &mut dyn GraphicsDevice,
        backbuffer: SurfaceId,
    ) -> Result<Self, DeviceError> {
        let mut resources = ResourceScope::default();
        match Self::create_tracked(device, backbuffer, &mut resources) {
            Ok(mut frame) => {
                frame.resources = resources;
                Ok(frame)
            }
            Err(err) => {
                resources.release_all(device);
                Err(err)
            }
        }
    }

    fn create_tracked(
        device: &mut dyn GraphicsDevice,
        backbuffer: SurfaceId,
        resources: &mut ResourceScope,
    ) -> Result<Self, DeviceError> {
        let desc = device
            .surface_desc(backbuffer)
            .ok_or(DeviceError::UnknownResource)?;
        let format = desc.format.with_alpha();

        let resolved = if desc.is_multisampled() || format != desc.format {
            let surface = device.create_render_target(desc.width, desc.height, format)?;
            resources.track(OwnedResource::Surface(surface));
            surface
        } else {
            backbuffer
        };

        let backbuffer_texture = device.create_texture(&TextureDesc {
            width: desc.width,
            height: desc.height,
            levels: 1,
            format,
            usage: TextureUsage::RenderTarget,
        })?;
        resources.track(OwnedResource::Texture(backbuffer_texture));
        let backbuffer_texture_surface = device
            .texture_surface(backbuffer_texture, 0)
            .ok_or(DeviceError::UnknownResource)?;

        let default_depth =
            device.create_depth_stencil(desc.width, desc.height, crate::device::Format::D24S8)?;
        resources.track(OwnedResource::Surface(default_depth));

        let state_block = device.create_state_block()?;
        resources.track(OwnedResource::StateBlock(state_block));

        let triangle = device.create_fullscreen_triangle()?;
        resources.track(OwnedResource::VertexBuffer(triangle));

        Ok(Self {
            backbuffer,
            backbuffer_desc: desc,
            resolved,
            backbuffer_texture,
            backbuffer_texture_surface,
            default_depth,
            state_block,
            triangle,
            resources: ResourceScope::default(),
        })
    }

    pub fn needs_resolve(&self) -> bool {
        self.resolved != self.backbuffer
    }

    pub fn build_environment(&self, depth_texture: Option<TextureId>) -> BuildEnvironment {
        BuildEnvironment {
            width: self.backbuffer_desc.width,
            height: self.backbuffer_desc.height,
            backbuffer_texture: self.backbuffer_texture,
            depth_texture,
        }
    }

    pub fn release(mut self, device: &mut dyn GraphicsDevice) {
        self.resources.release_all(device);
    }
}

/// Uploads the effect's constant storage to vertex and pixel registers,
/// leaving the texel size register untouched.
pub fn upload_constants(device: &mut dyn GraphicsDevice, effect: &Effect) {
    let capacity = device.caps().constant_registers.min(TEXEL_SIZE_REGISTER) as usize;
    let registers = effect.storage.registers().min(capacity);
    if registers == 0 {
        return;
    }
    let data = &effect.storage.as_floats()[..registers * 4];
    device.set_vertex_shader_constants(0, data);
    device.set_pixel_shader_constants(0, data);
}

/// Draws every pass of one technique.
///
/// Render target slot 0 falls back to the resolved back buffer when a pass
/// leaves it empty.
pub fn render_technique(
    device: &mut dyn GraphicsDevice,
    frame: &FrameResources,
    effect: &Effect,
    technique: usize,
    stats: &mut FrameStats,
) {
    let Some(technique) = effect.techniques.get(technique) else {
        return;
    };
    upload_constants(device, effect);

    let render_target_count = device.caps().render_target_count();
    let mut depth_cleared = false;

    for pass in &technique.passes {
        device.apply_state_block(pass.state_block);
        device.set_stream_source(Some(frame.triangle));

        device.stretch_rect(
            frame.resolved,
            frame.backbuffer_texture_surface,
            TextureFilter::None,
        );

        for (slot, binding) in pass.samplers.iter().enumerate() {
            let texture = effect
                .textures
                .get(binding.texture)
                .and_then(|texture| texture.handle);
            device.set_texture(slot as u32, texture);
            device.set_sampler_state(slot as u32, &binding.state);
        }

        for index in 0..render_target_count {
            let target = match pass.render_targets[index] {
                None if index == 0 => Some(frame.resolved),
                other => other,
            };
            device.set_render_target(index as u32, target);
        }

        let viewport = device.viewport();
        let texel_size = [
            -1.0 / viewport.width.max(1) as f32,
            1.0 / viewport.height.max(1) as f32,
            0.0,
            0.0,
        ];
        device.set_vertex_shader_constants(TEXEL_SIZE_REGISTER, &texel_size);

        let fullscreen = viewport.width == frame.backbuffer_desc.width
            && viewport.height == frame.backbuffer_desc.height;
        device.set_depth_stencil(fullscreen.then_some(frame.default_depth));

        if fullscreen && !depth_cleared {
            device.clear(
                ClearFlags::TARGET | ClearFlags::DEPTH | ClearFlags::STENCIL,
                0,
                1.0,
                0,
            );
            depth_cleared = true;
        } else {
            device.clear(ClearFlags::TARGET, 0, 0.0, 0);
        }

        device.draw_primitive(PrimitiveKind::TriangleList, 0, 1);
        stats.record_draw(PrimitiveKind::TriangleList.vertex_count(1));

        for target in pass.render_targets.iter().take(render_target_count).flatten() {
            if *target == frame.resolved {
                continue;
            }
            let Some(texture) = device.surface_container(*target) else {
                continue;
            };
            if device.texture_desc(texture).is_some_and(|desc| desc.levels > 1) {
                device.generate_mip_sublevels(texture, TextureFilter::Linear);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::headless::{DeviceCall, HeadlessDevice};
    use crate::device::{Format, Viewport};
    use crate::effect::{
        Annotations, EffectBuilder, Pass, PixelFormat, Technique, TextureDecl, TextureOrigin,
        UniformDecl,
    };
    use crate::storage::BaseType;

    fn host(format: Format, samples: u32) -> (HeadlessDevice, SurfaceId) {
        let mut device = HeadlessDevice::new(HeadlessDevice::default_caps());
        let backbuffer = device.create_host_surface(SurfaceDesc {
            width: 64,
            height: 32,
            format,
            samples,
        });
        device.set_render_target(0, Some(backbuffer));
        (device, backbuffer)
    }

    fn texture(name: &str, width: u32, height: u32, levels: u32) -> TextureDecl {
        TextureDecl {
            name: name.into(),
            width,
            height,
            levels,
            format: PixelFormat::Rgba8,
            origin: TextureOrigin::Image,
            annotations: Annotations::new(),
        }
    }

    #[test]
    fn resolve_is_only_created_when_needed() {
        let (mut device, backbuffer) = host(Format::A8R8G8B8, 0);
        let frame = FrameResources::create(&mut device, backbuffer).unwrap();
        assert!(!frame.needs_resolve());
        frame.release(&mut device);

        let (mut device, backbuffer) = host(Format::X8R8G8B8, 0);
        let frame = FrameResources::create(&mut device, backbuffer).unwrap();
        assert!(frame.needs_resolve());
        assert_eq!(
            device.surface_desc(frame.resolved).unwrap().format,
            Format::A8R8G8B8
        );

        let (mut device, backbuffer) = host(Format::A8R8G8B8, 4);
        let frame = FrameResources::create(&mut device, backbuffer).unwrap();
        assert!(frame.needs_resolve());
    }

    #[test]
    fn failed_creation_releases_partial_resources() {
        let (mut device, backbuffer) = host(Format::X8R8G8B8, 0);
        device.set_format_supported(Format::D24S8, false);
        let err = FrameResources::create(&mut device, backbuffer).unwrap_err();
        assert!(matches!(err, DeviceError::Creation { .. }));
        assert_eq!(device.live_textures(), 0);
        assert_eq!(device.live_state_blocks(), 0);
    }

    #[test]
    fn passes_follow_the_fixed_sequence() {
        let (mut device, backbuffer) = host(Format::A8R8G8B8, 0);
        let frame = FrameResources::create(&mut device, backbuffer).unwrap();
        let mut builder = EffectBuilder::new(&mut device, frame.build_environment(None));

        let half = builder.add_texture(texture("half", 32, 16, 1)).unwrap();
        let mipped = builder.add_texture(texture("mipped", 64, 32, 4)).unwrap();
        let uniform = builder
            .add_uniform(UniformDecl {
                name: "Strength".into(),
                base: BaseType::Float,
                rows: 1,
                columns: 4,
                elements: 1,
                annotations: Annotations::new(),
            })
            .unwrap();
        builder.initialize_uniform(uniform, &[1.0f32, 2.0, 3.0, 4.0]);

        let mut technique = Technique::new("Blur");
        technique.enabled = true;
        let mut first = Pass::new(builder.record_pass_state(&[]).unwrap());
        first.render_targets[0] = builder.texture_surface(half, 0);
        let mut second = Pass::new(builder.record_pass_state(&[]).unwrap());
        second.render_targets[0] = builder.texture_surface(mipped, 0);
        let third = Pass::new(builder.record_pass_state(&[]).unwrap());
        technique.passes = vec![first, second, third];
        builder.add_technique(technique);
        let (effect, _) = builder.finish();

        device.take_calls();
        let mut stats = FrameStats::default();
        render_technique(&mut device, &frame, &effect, 0, &mut stats);
        let calls = device.take_calls();

        let clears: Vec<_> = calls
            .iter()
            .filter_map(|call| match call {
                DeviceCall::Clear { flags, depth } => Some((*flags, *depth)),
                _ => None,
            })
            .collect();
        assert_eq!(
            clears,
            vec![
                (ClearFlags::TARGET, 0.0),
                (
                    ClearFlags::TARGET | ClearFlags::DEPTH | ClearFlags::STENCIL,
                    1.0
                ),
                (ClearFlags::TARGET, 0.0),
            ]
        );

        let mips: Vec<_> = calls
            .iter()
            .filter(|call| matches!(call, DeviceCall::GenerateMips(_)))
            .collect();
        assert_eq!(mips.len(), 1);

        let draws = calls
            .iter()
            .filter(|call| matches!(call, DeviceCall::Draw { .. }))
            .count();
        assert_eq!(draws, 3);
        stats.end_frame(std::time::Duration::from_millis(16));
        assert_eq!((stats.draw_calls, stats.vertices), (3, 9));

        assert_eq!(device.vertex_constant(0), [1.0, 2.0, 3.0, 4.0]);
        assert_eq!(device.pixel_constant(0), [1.0, 2.0, 3.0, 4.0]);
        assert_eq!(
            device.vertex_constant(TEXEL_SIZE_REGISTER),
            [-1.0 / 64.0, 1.0 / 32.0, 0.0, 0.0]
        );
        assert_eq!(device.render_target(0), Some(frame.resolved));
        assert_eq!(device.depth_stencil(), Some(frame.default_depth));
    }

    #[test]
    fn pass_blocks_only_touch_their_own_states() {
        let (mut device, backbuffer) = host(Format::A8R8G8B8, 0);
        let frame = FrameResources::create(&mut device, backbuffer).unwrap();
        device.set_render_state(7, 42);
        let mut builder = EffectBuilder::new(&mut device, frame.build_environment(None));
        let mut technique = Technique::new("Tint");
        technique.enabled = true;
        technique
            .passes
            .push(Pass::new(builder.record_pass_state(&[(9, 1)]).unwrap()));
        builder.add_technique(technique);
        let (effect, _) = builder.finish();
        assert_eq!(device.render_state(9), None);

        device.set_render_state(7, 5);
        device.set_stream_source(None);
        device.take_calls();
        let mut stats = FrameStats::default();
        render_technique(&mut device, &frame, &effect, 0, &mut stats);

        assert_eq!(device.render_state(7), Some(5));
        assert_eq!(device.render_state(9), Some(1));
        assert_eq!(device.stream_source(), Some(frame.triangle));
        let draws = device
            .calls()
            .iter()
            .filter(|call| matches!(call, DeviceCall::Draw { .. }))
            .count();
        assert_eq!(draws, 1);
    }

    #[test]
    fn constant_upload_leaves_texel_register_free() {
        let (mut device, _) = host(Format::A8R8G8B8, 0);
        let mut effect = Effect::default();
        effect.storage.allocate(BaseType::Float, 300 * 16);
        device.take_calls();
        upload_constants(&mut device, &effect);
        assert!(device.calls().contains(&DeviceCall::SetVertexConstants {
            start_register: 0,
            registers: 255,
        }));
        assert_eq!(device.viewport(), Viewport::covering(64, 32));
    }
}
