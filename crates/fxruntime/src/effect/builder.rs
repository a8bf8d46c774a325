use thiserror::Error;

use crate::device::{
    DeviceError, GraphicsDevice, OwnedResource, StateBlockId, SurfaceId, TextureDesc, TextureId,
    TextureUsage,
};
use crate::storage::{BaseType, UniformValue};

use super::{Annotations, Effect, PixelFormat, Technique, Texture, TextureOrigin, Uniform};

#[derive(Debug, Error)]
pub enum CompileError {
    #[error(transparent)]
    Device(#[from] DeviceError),
    #[error("backend error: {0}")]
    Backend(String),
    #[error("invalid effect: {0}")]
    Invalid(String),
}

/// Frame resources an effect may reference while it is being built.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BuildEnvironment {
    pub width: u32,
    pub height: u32,
    /// Texture mirroring the back buffer each pass.
    pub backbuffer_texture: TextureId,
    /// Current depth replacement texture, if a depth source is selected.
    pub depth_texture: Option<TextureId>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TextureDecl {
    pub name: String,
    pub width: u32,
    pub height: u32,
    pub levels: u32,
    pub format: PixelFormat,
    pub origin: TextureOrigin,
    pub annotations: Annotations,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UniformDecl {
    pub name: String,
    pub base: BaseType,
    pub rows: u32,
    pub columns: u32,
    pub elements: u32,
    pub annotations: Annotations,
}

impl UniformDecl {
    pub fn byte_size(&self) -> usize {
        (self.rows.max(1) * self.columns.max(1) * self.elements.max(1)) as usize * 4
    }
}

/// Collects the resources of an effect under construction.
///
/// Everything created through the builder is tracked; [`EffectBuilder::discard`]
/// releases it all, so a failed compile leaves nothing behind.
pub struct EffectBuilder<'a> {
    device: &'a mut dyn GraphicsDevice,
    environment: BuildEnvironment,
    effect: Effect,
    warnings: Vec<String>,
}

impl<'a> EffectBuilder<'a> {
    pub fn new(device: &'a mut dyn GraphicsDevice, environment: BuildEnvironment) -> Self {
        Self {
            device,
            environment,
            effect: Effect::default(),
            warnings: Vec::new(),
        }
    }

    pub fn device(&mut self) -> &mut dyn GraphicsDevice {
        &mut *self.device
    }

    pub fn environment(&self) -> &BuildEnvironment {
        &self.environment
    }

    /// Declares a texture and returns its index.
    ///
    /// Image textures get an owned device texture; buffer mirrors borrow the
    /// frame's back-buffer or depth texture.
    pub fn add_texture(&mut self, decl: TextureDecl) -> Result<usize, CompileError> {
        if self.effect.textures.iter().any(|t| t.name == decl.name) {
            return Err(CompileError::Invalid(format!(
                "texture '{}' declared twice",
                decl.name
            )));
        }
        let (width, height, levels, handle) = match decl.origin {
            TextureOrigin::Image => {
                let usage = if decl.format.is_compressed() {
                    TextureUsage::Plain
                } else {
                    TextureUsage::RenderTarget
                };
                let levels = decl.levels.max(1);
                let texture = self.device.create_texture(&TextureDesc {
                    width: decl.width,
                    height: decl.height,
                    levels,
                    format: decl.format.device_format(),
                    usage,
                })?;
                self.effect.resources.track(OwnedResource::Texture(texture));
                (decl.width, decl.height, levels, Some(texture))
            }
            TextureOrigin::ColorBuffer => (
                self.environment.width,
                self.environment.height,
                1,
                Some(self.environment.backbuffer_texture),
            ),
            TextureOrigin::DepthBuffer => (
                self.environment.width,
                self.environment.height,
                1,
                self.environment.depth_texture,
            ),
        };
        self.effect.textures.push(Texture {
            name: decl.name,
            width,
            height,
            levels,
            format: decl.format,
            origin: decl.origin,
            handle,
            annotations: decl.annotations,
            storage_size: 0,
        });
        Ok(self.effect.textures.len() - 1)
    }

    pub fn texture(&self, index: usize) -> Option<&Texture> {
        self.effect.textures.get(index)
    }

    pub fn texture_index(&self, name: &str) -> Option<usize> {
        self.effect.textures.iter().position(|t| t.name == name)
    }

    /// Level surface of a declared texture, for use as a render target.
    pub fn texture_surface(&self, index: usize, level: u32) -> Option<SurfaceId> {
        let handle = self.effect.textures.get(index)?.handle?;
        self.device.texture_surface(handle, level)
    }

    /// Declares a uniform, allocating its slot in constant storage.
    pub fn add_uniform(&mut self, decl: UniformDecl) -> Result<usize, CompileError> {
        if self.effect.uniforms.iter().any(|u| u.name == decl.name) {
            return Err(CompileError::Invalid(format!(
                "uniform '{}' declared twice",
                decl.name
            )));
        }
        let layout = self.effect.storage.allocate(decl.base, decl.byte_size());
        self.effect.uniforms.push(Uniform {
            name: decl.name,
            rows: decl.rows,
            columns: decl.columns,
            elements: decl.elements,
            layout,
            annotations: decl.annotations,
        });
        Ok(self.effect.uniforms.len() - 1)
    }

    pub fn initialize_uniform<V: UniformValue>(&mut self, index: usize, values: &[V]) {
        if let Some(uniform) = self.effect.uniforms.get(index) {
            let layout = uniform.layout;
            self.effect.storage.set(&layout, values);
        }
    }

    /// Records a pass state block holding only `render_states`; everything
    /// else on the device is left to the executor and the host.
    pub fn record_pass_state(
        &mut self,
        render_states: &[(u32, u32)],
    ) -> Result<StateBlockId, CompileError> {
        self.device.begin_state_block()?;
        for (state, value) in render_states {
            self.device.set_render_state(*state, *value);
        }
        let block = self.device.end_state_block()?;
        self.effect.resources.track(OwnedResource::StateBlock(block));
        Ok(block)
    }

    pub fn add_technique(&mut self, technique: Technique) -> usize {
        self.effect.techniques.push(technique);
        self.effect.techniques.len() - 1
    }

    pub fn warning(&mut self, message: impl Into<String>) {
        self.warnings.push(message.into());
    }

    /// Number of device resources created so far.
    pub fn resource_count(&self) -> usize {
        self.effect.resources.len()
    }

    pub fn finish(self) -> (Effect, Vec<String>) {
        (self.effect, self.warnings)
    }

    pub fn discard(self) {
        let EffectBuilder { device, effect, .. } = self;
        effect.release(device);
    }
}
