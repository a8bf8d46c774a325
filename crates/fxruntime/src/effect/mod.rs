//! Compiled effect tree: techniques, uniforms, textures and the constant
//! storage they share, plus the builder a toolchain fills while compiling.

mod annotation;
mod builder;
mod technique;
mod texture;

pub use annotation::{AnnotationValue, Annotations};
pub use builder::{BuildEnvironment, CompileError, EffectBuilder, TextureDecl, UniformDecl};
pub use technique::{Pass, SamplerBinding, Technique, ToggleBinding, ToggleCause};
pub use texture::{PixelFormat, Texture, TextureOrigin};

use crate::device::{GraphicsDevice, ResourceScope};
use crate::storage::{BaseType, ConstantStorage, UniformLayout, UniformValue};

#[derive(Debug, Clone, PartialEq)]
pub struct Uniform {
    pub name: String,
    pub rows: u32,
    pub columns: u32,
    pub elements: u32,
    pub layout: UniformLayout,
    pub annotations: Annotations,
}

impl Uniform {
    pub fn base_type(&self) -> BaseType {
        self.layout.base
    }

    /// Annotated `source`, if the value is driven by the runtime.
    pub fn source(&self) -> Option<&str> {
        self.annotations.string("source").filter(|s| !s.is_empty())
    }
}

/// An effect compiled against one device.
///
/// Owns every device resource the builder created for it; they are released
/// together by [`Effect::release`].
#[derive(Debug, Default)]
pub struct Effect {
    pub techniques: Vec<Technique>,
    pub uniforms: Vec<Uniform>,
    pub textures: Vec<Texture>,
    pub storage: ConstantStorage,
    pub(crate) resources: ResourceScope,
}

impl Effect {
    pub fn uniform(&self, name: &str) -> Option<&Uniform> {
        self.uniforms.iter().find(|u| u.name == name)
    }

    pub fn texture(&self, name: &str) -> Option<&Texture> {
        self.textures.iter().find(|t| t.name == name)
    }

    pub fn technique(&self, name: &str) -> Option<&Technique> {
        self.techniques.iter().find(|t| t.name == name)
    }

    pub fn technique_mut(&mut self, name: &str) -> Option<&mut Technique> {
        self.techniques.iter_mut().find(|t| t.name == name)
    }

    /// Writes a uniform by name. Returns `false` for unknown names or when the
    /// stored bytes did not change.
    pub fn set_uniform<V: UniformValue>(&mut self, name: &str, values: &[V]) -> bool {
        match self.uniforms.iter().find(|u| u.name == name) {
            Some(uniform) => self.storage.set(&uniform.layout, values),
            None => false,
        }
    }

    pub fn get_uniform<V: UniformValue>(&self, name: &str, out: &mut [V]) -> usize {
        match self.uniform(name) {
            Some(uniform) => self.storage.get(&uniform.layout, out),
            None => 0,
        }
    }

    /// Rebinds every depth-tagged texture to `handle`.
    pub fn rebind_depth_textures(&mut self, handle: Option<crate::device::TextureId>) {
        for texture in &mut self.textures {
            if texture.origin == TextureOrigin::DepthBuffer {
                texture.change_source(handle);
            }
        }
    }

    pub fn release(mut self, device: &mut dyn GraphicsDevice) {
        self.resources.release_all(device);
    }
}
